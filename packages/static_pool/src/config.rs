use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Upper bound on subpools and on slots per subpool, set by the 16-bit indexes
/// carried in a [`StoreAddress`][crate::StoreAddress].
pub(crate) const MAX_INDEXABLE: usize = 1 << 16;

/// Determines what happens to the bytes of a page when its reservation is released.
///
/// There is no default - every pool configuration has to make this choice explicitly.
///
/// # Examples
///
/// ```
/// use static_pool::{ReleasePolicy, StaticPool};
///
/// // Telecommands may carry key material, so released pages are scrubbed.
/// let pool = StaticPool::builder()
///     .subpool(256, 8)
///     .release_policy(ReleasePolicy::ZeroPage)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReleasePolicy {
    /// The written part of the page is overwritten with zeroes on release, so no residue of
    /// a payload is ever visible to a later reservation of the same slot.
    ZeroPage,

    /// The page is left as it is on release. Releasing costs the same regardless of payload
    /// length, but later reservations of the slot may observe old bytes in
    /// [`reserve_with()`][crate::StaticPool::reserve_with].
    RetainBytes,
}

/// Layout of one subpool: how large its pages are and how many of them it holds.
///
/// # Examples
///
/// ```
/// use static_pool::SubpoolConfig;
///
/// let config = SubpoolConfig::new(64, 32);
///
/// assert_eq!(config.page_size(), 64);
/// assert_eq!(config.slot_count(), 32);
/// assert_eq!(config.footprint_bytes(), Some(2048));
/// ```
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SubpoolConfig {
    page_size: usize,
    slot_count: usize,
}

impl SubpoolConfig {
    /// Describes a subpool of `slot_count` pages of `page_size` bytes each.
    ///
    /// The values are validated when the pool is built, not here.
    #[must_use]
    pub const fn new(page_size: usize, slot_count: usize) -> Self {
        Self {
            page_size,
            slot_count,
        }
    }

    /// Capacity of each page in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the subpool.
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Bytes of page storage this subpool commits, or `None` if the product overflows.
    #[must_use]
    pub const fn footprint_bytes(&self) -> Option<usize> {
        self.page_size.checked_mul(self.slot_count)
    }
}

/// The complete, static layout of a [`StaticPool`][crate::StaticPool].
///
/// Subpools are listed in ascending order of page size. The order matters: a payload is
/// always placed in the first subpool whose pages are large enough, so a misordered list is
/// rejected by [`validate()`][Self::validate] instead of silently producing wasteful routing.
///
/// The configuration can be assembled in code or loaded from TOML:
///
/// ```
/// use static_pool::{ReleasePolicy, StaticPoolConfig};
///
/// let config = StaticPoolConfig::from_toml_str(
///     r#"
///     release_policy = "zero_page"
///
///     [[subpools]]
///     page_size = 16
///     slot_count = 2
///
///     [[subpools]]
///     page_size = 64
///     slot_count = 1
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.subpools().len(), 2);
/// assert_eq!(config.release_policy(), ReleasePolicy::ZeroPage);
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StaticPoolConfig {
    subpools: Vec<SubpoolConfig>,
    release_policy: ReleasePolicy,
}

impl StaticPoolConfig {
    /// Assembles a configuration. The values are validated when the pool is built.
    #[must_use]
    pub fn new(subpools: Vec<SubpoolConfig>, release_policy: ReleasePolicy) -> Self {
        Self {
            subpools,
            release_policy,
        }
    }

    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not a well-formed configuration and any
    /// of the validation errors of [`validate()`][Self::validate] if the layout is unusable.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// The subpool layouts, in routing order.
    #[must_use]
    pub fn subpools(&self) -> &[SubpoolConfig] {
        &self.subpools
    }

    /// What happens to page contents on release.
    #[must_use]
    pub fn release_policy(&self) -> ReleasePolicy {
        self.release_policy
    }

    /// Total bytes of page storage the configuration commits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FootprintOverflow`] if the total does not fit in `usize`.
    pub fn footprint_bytes(&self) -> Result<usize, ConfigError> {
        self.subpools.iter().try_fold(0_usize, |total, subpool| {
            subpool
                .footprint_bytes()
                .and_then(|bytes| total.checked_add(bytes))
                .ok_or(ConfigError::FootprintOverflow)
        })
    }

    /// Checks that a pool can be built from this configuration.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::NoSubpools`] if the list of subpools is empty.
    /// * [`ConfigError::TooManySubpools`] if there are more than 65536 subpools.
    /// * [`ConfigError::ZeroPageSize`] or [`ConfigError::ZeroSlotCount`] for empty subpools.
    /// * [`ConfigError::TooManySlots`] if a subpool has more than 65536 slots.
    /// * [`ConfigError::PageSizesNotAscending`] if page sizes are not strictly ascending.
    /// * [`ConfigError::FootprintOverflow`] if the total size does not fit in `usize`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subpools.is_empty() {
            return Err(ConfigError::NoSubpools);
        }

        if self.subpools.len() > MAX_INDEXABLE {
            return Err(ConfigError::TooManySubpools {
                count: self.subpools.len(),
            });
        }

        let mut previous_page_size = None;

        for (subpool_index, subpool) in self.subpools.iter().enumerate() {
            if subpool.page_size == 0 {
                return Err(ConfigError::ZeroPageSize { subpool_index });
            }

            if subpool.slot_count == 0 {
                return Err(ConfigError::ZeroSlotCount { subpool_index });
            }

            if subpool.slot_count > MAX_INDEXABLE {
                return Err(ConfigError::TooManySlots {
                    subpool_index,
                    slot_count: subpool.slot_count,
                });
            }

            if let Some(previous_page_size) = previous_page_size {
                if subpool.page_size <= previous_page_size {
                    return Err(ConfigError::PageSizesNotAscending {
                        subpool_index,
                        page_size: subpool.page_size,
                        previous_page_size,
                    });
                }
            }

            previous_page_size = Some(subpool.page_size);
        }

        self.footprint_bytes()?;

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn config(subpools: &[(usize, usize)]) -> StaticPoolConfig {
        StaticPoolConfig::new(
            subpools
                .iter()
                .map(|&(page_size, slot_count)| SubpoolConfig::new(page_size, slot_count))
                .collect(),
            ReleasePolicy::ZeroPage,
        )
    }

    #[test]
    fn ascending_layout_is_valid() {
        config(&[(8, 12), (16, 6), (32, 3)]).validate().unwrap();
    }

    #[test]
    fn single_subpool_is_valid() {
        config(&[(1, 1)]).validate().unwrap();
    }

    #[test]
    fn empty_layout_is_rejected() {
        assert!(matches!(
            config(&[]).validate(),
            Err(ConfigError::NoSubpools)
        ));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(matches!(
            config(&[(8, 1), (0, 1)]).validate(),
            Err(ConfigError::ZeroPageSize { subpool_index: 1 })
        ));
    }

    #[test]
    fn zero_slot_count_is_rejected() {
        assert!(matches!(
            config(&[(8, 0)]).validate(),
            Err(ConfigError::ZeroSlotCount { subpool_index: 0 })
        ));
    }

    #[test]
    fn descending_page_sizes_are_rejected() {
        assert!(matches!(
            config(&[(16, 6), (32, 3), (8, 12)]).validate(),
            Err(ConfigError::PageSizesNotAscending {
                subpool_index: 2,
                page_size: 8,
                previous_page_size: 32
            })
        ));
    }

    #[test]
    fn duplicate_page_sizes_are_rejected() {
        assert!(matches!(
            config(&[(16, 6), (16, 3)]).validate(),
            Err(ConfigError::PageSizesNotAscending {
                subpool_index: 1,
                ..
            })
        ));
    }

    #[test]
    fn slot_count_limit_is_inclusive() {
        config(&[(1, MAX_INDEXABLE)]).validate().unwrap();

        assert!(matches!(
            config(&[(1, MAX_INDEXABLE + 1)]).validate(),
            Err(ConfigError::TooManySlots {
                subpool_index: 0,
                slot_count
            }) if slot_count == MAX_INDEXABLE + 1
        ));
    }

    #[test]
    fn too_many_subpools_are_rejected() {
        let subpools: Vec<_> = (1..=MAX_INDEXABLE + 1).map(|size| (size, 1)).collect();

        assert!(matches!(
            config(&subpools).validate(),
            Err(ConfigError::TooManySubpools { count }) if count == MAX_INDEXABLE + 1
        ));
    }

    #[test]
    fn overflowing_footprint_is_rejected() {
        assert!(matches!(
            config(&[(usize::MAX / 2, 3)]).validate(),
            Err(ConfigError::FootprintOverflow)
        ));

        assert!(matches!(
            config(&[(usize::MAX / 4, 3), (usize::MAX / 2, 1)]).validate(),
            Err(ConfigError::FootprintOverflow)
        ));
    }

    #[test]
    fn footprint_sums_all_subpools() {
        assert_eq!(
            config(&[(16, 2), (64, 1)]).footprint_bytes().unwrap(),
            16 * 2 + 64
        );
    }

    #[test]
    fn toml_layout_is_parsed() {
        let config = StaticPoolConfig::from_toml_str(
            r#"
            release_policy = "retain_bytes"

            [[subpools]]
            page_size = 32
            slot_count = 4

            [[subpools]]
            page_size = 1024
            slot_count = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.release_policy(), ReleasePolicy::RetainBytes);
        assert_eq!(
            config.subpools(),
            &[SubpoolConfig::new(32, 4), SubpoolConfig::new(1024, 2)]
        );
    }

    #[test]
    fn toml_without_release_policy_is_rejected() {
        let result = StaticPoolConfig::from_toml_str(
            r"
            [[subpools]]
            page_size = 32
            slot_count = 4
            ",
        );

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn toml_with_misordered_layout_is_rejected() {
        let result = StaticPoolConfig::from_toml_str(
            r#"
            release_policy = "zero_page"

            [[subpools]]
            page_size = 64
            slot_count = 1

            [[subpools]]
            page_size = 16
            slot_count = 2
            "#,
        );

        assert!(matches!(
            result,
            Err(ConfigError::PageSizesNotAscending {
                subpool_index: 1,
                ..
            })
        ));
    }

    #[test]
    fn toml_with_unknown_policy_is_rejected() {
        let result = StaticPoolConfig::from_toml_str(
            r#"
            release_policy = "shred"

            [[subpools]]
            page_size = 64
            slot_count = 1
            "#,
        );

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
