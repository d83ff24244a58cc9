use crate::{ConfigError, ReleasePolicy, StaticPool, StaticPoolConfig, SubpoolConfig};

/// Builder for creating an instance of [`StaticPool`].
///
/// Subpools are added in routing order, so their page sizes must be strictly ascending.
/// At least one subpool and the [release policy][ReleasePolicy] are mandatory.
///
/// # Examples
///
/// ```
/// use static_pool::{ReleasePolicy, StaticPool};
///
/// let pool = StaticPool::builder()
///     .subpool(64, 32)
///     .subpool(256, 8)
///     .subpool(1024, 2)
///     .release_policy(ReleasePolicy::ZeroPage)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.page_sizes(), &[64, 256, 1024]);
/// ```
///
/// Invalid layouts are reported when building:
///
/// ```
/// use static_pool::{ConfigError, ReleasePolicy, StaticPool};
///
/// let result = StaticPool::builder()
///     .subpool(256, 8)
///     .subpool(64, 32)
///     .release_policy(ReleasePolicy::ZeroPage)
///     .build();
///
/// assert!(matches!(
///     result,
///     Err(ConfigError::PageSizesNotAscending { .. })
/// ));
/// ```
#[derive(Debug)]
#[must_use]
pub struct StaticPoolBuilder {
    subpools: Vec<SubpoolConfig>,
    release_policy: Option<ReleasePolicy>,
}

impl StaticPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            subpools: Vec::new(),
            release_policy: None,
        }
    }

    /// Adds a subpool of `slot_count` pages of `page_size` bytes each.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(128, 16)
    ///     .release_policy(ReleasePolicy::RetainBytes)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 16);
    /// ```
    #[inline]
    pub fn subpool(mut self, page_size: usize, slot_count: usize) -> Self {
        self.subpools.push(SubpoolConfig::new(page_size, slot_count));
        self
    }

    /// Adds several subpools at once, in iteration order.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool, SubpoolConfig};
    ///
    /// let layout = [SubpoolConfig::new(32, 10), SubpoolConfig::new(512, 2)];
    ///
    /// let pool = StaticPool::builder()
    ///     .subpools(layout)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.subpool_count(), 2);
    /// ```
    #[inline]
    pub fn subpools(mut self, subpools: impl IntoIterator<Item = SubpoolConfig>) -> Self {
        self.subpools.extend(subpools);
        self
    }

    /// Sets what happens to page contents when a reservation is released.
    #[inline]
    pub fn release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = Some(policy);
        self
    }

    /// Validates the configuration and builds the pool, committing all of its memory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingReleasePolicy`] if no release policy was set and any error
    /// of [`StaticPoolConfig::validate()`] if the layout is unusable.
    pub fn build(self) -> Result<StaticPool, ConfigError> {
        let release_policy = self
            .release_policy
            .ok_or(ConfigError::MissingReleasePolicy)?;

        StaticPool::from_config(&StaticPoolConfig::new(self.subpools, release_policy))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(StaticPoolBuilder: Send, std::fmt::Debug);

    #[test]
    fn builder_new_creates_empty_state() {
        let builder = StaticPoolBuilder::new();

        assert!(builder.subpools.is_empty());
        assert!(builder.release_policy.is_none());
    }

    #[test]
    fn subpool_and_subpools_append_in_order() {
        let builder = StaticPoolBuilder::new()
            .subpool(8, 1)
            .subpools([SubpoolConfig::new(16, 2), SubpoolConfig::new(32, 3)])
            .subpool(64, 4);

        assert_eq!(
            builder.subpools,
            vec![
                SubpoolConfig::new(8, 1),
                SubpoolConfig::new(16, 2),
                SubpoolConfig::new(32, 3),
                SubpoolConfig::new(64, 4),
            ]
        );
    }

    #[test]
    fn release_policy_sets_policy() {
        let builder = StaticPoolBuilder::new().release_policy(ReleasePolicy::RetainBytes);
        assert_eq!(builder.release_policy, Some(ReleasePolicy::RetainBytes));

        let builder = builder.release_policy(ReleasePolicy::ZeroPage);
        assert_eq!(builder.release_policy, Some(ReleasePolicy::ZeroPage));
    }

    #[test]
    fn build_without_release_policy_fails() {
        let result = StaticPoolBuilder::new().subpool(16, 1).build();

        assert!(matches!(result, Err(ConfigError::MissingReleasePolicy)));
    }

    #[test]
    fn build_without_subpools_fails() {
        let result = StaticPoolBuilder::new()
            .release_policy(ReleasePolicy::ZeroPage)
            .build();

        assert!(matches!(result, Err(ConfigError::NoSubpools)));
    }

    #[test]
    fn build_with_zero_slot_count_fails() {
        let result = StaticPoolBuilder::new()
            .subpool(16, 2)
            .subpool(32, 0)
            .release_policy(ReleasePolicy::ZeroPage)
            .build();

        assert!(matches!(
            result,
            Err(ConfigError::ZeroSlotCount { subpool_index: 1 })
        ));
    }

    #[test]
    fn built_pool_keeps_configuration() {
        let pool = StaticPoolBuilder::new()
            .subpool(16, 2)
            .subpool(64, 1)
            .release_policy(ReleasePolicy::RetainBytes)
            .build()
            .unwrap();

        assert_eq!(
            pool.config(),
            &StaticPoolConfig::new(
                vec![SubpoolConfig::new(16, 2), SubpoolConfig::new(64, 1)],
                ReleasePolicy::RetainBytes
            )
        );
    }
}
