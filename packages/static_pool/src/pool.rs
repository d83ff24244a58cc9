use std::num::NonZero;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::Result;
use crate::subpool::Subpool;
use crate::{
    ConfigError, PageView, PageViewMut, StaticPoolBuilder, StaticPoolConfig, StoreAddress,
    StoreError, StoreGuard, SubpoolConfig, SubpoolStats, metrics,
};

/// A [`StaticPool`] shared between the worker threads of an application.
pub type SharedStaticPool = Arc<StaticPool>;

/// A byte store with a fixed memory footprint, organized as subpools of equally sized pages.
///
/// All page memory is committed when the pool is built. After that, storing a payload never
/// allocates: [`reserve()`](Self::reserve) copies the payload into a vacant page of the smallest
/// subpool whose pages are large enough and returns a [`StoreAddress`]. The address is a small
/// `Copy` value that can be sent to other threads in place of the payload itself. Whoever holds
/// the address can [`resolve()`](Self::resolve) it to view the payload and
/// [`release()`](Self::release) it to make the page available again.
///
/// Every address carries the generation of its slot. Releasing a slot advances the generation,
/// so any copy of the address kept around after the release is detected as stale instead of
/// silently reading whatever payload was stored in the slot later.
///
/// # Capacity
///
/// The capacity of each subpool is fixed. When the selected subpool has no vacant page,
/// reservation fails immediately with [`StoreError::PoolExhausted`] instead of waiting or moving
/// the payload into a larger subpool. Deciding whether to retry, drop or overwrite is left to the
/// caller.
///
/// # Examples
///
/// ```
/// use static_pool::{ReleasePolicy, StaticPool, StoreError};
///
/// let pool = StaticPool::builder()
///     .subpool(16, 2)
///     .subpool(64, 1)
///     .release_policy(ReleasePolicy::ZeroPage)
///     .build()
///     .unwrap();
///
/// let address = pool.reserve(b"housekeeping").unwrap();
/// assert_eq!(address.subpool_index(), 0);
///
/// assert_eq!(&*pool.resolve(address).unwrap(), b"housekeeping");
///
/// pool.release(address).unwrap();
///
/// // The address is now stale and can no longer be used.
/// assert!(matches!(
///     pool.resolve(address),
///     Err(StoreError::StaleAddress { .. })
/// ));
/// ```
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]) and all operations take `&self`. Each
/// subpool is guarded by its own reader-writer lock, so threads working with payloads of
/// different size classes do not contend with each other. Wrap the pool in an [`Arc`]
/// ([`SharedStaticPool`]) to share it between threads.
///
/// Views returned by [`resolve()`](Self::resolve) and [`modify()`](Self::modify) hold the lock
/// of their subpool until dropped. A thread holding a read-only view may take more read-only
/// views and query occupancy, but must not reserve, modify or release in the same subpool
/// until the view is dropped. A thread holding a [`PageViewMut`] must not use its subpool at
/// all until the view is dropped.
#[derive(Debug)]
pub struct StaticPool {
    subpools: Box<[RwLock<Subpool>]>,

    /// Copy of the page size of each subpool, in ascending order. Routing a reservation only
    /// needs the page sizes, which never change, so we keep them outside the locks.
    page_sizes: Box<[usize]>,

    footprint_bytes: usize,

    config: StaticPoolConfig,
}

impl StaticPool {
    /// Starts building a new pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(32, 100)
    ///     .release_policy(ReleasePolicy::RetainBytes)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 100);
    /// ```
    #[inline]
    pub fn builder() -> StaticPoolBuilder {
        StaticPoolBuilder::new()
    }

    /// Creates a pool with the layout described by `config`, committing all of its memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not pass
    /// [`StaticPoolConfig::validate()`].
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool, StaticPoolConfig, SubpoolConfig};
    ///
    /// let config = StaticPoolConfig::new(
    ///     vec![SubpoolConfig::new(16, 4), SubpoolConfig::new(128, 2)],
    ///     ReleasePolicy::ZeroPage,
    /// );
    ///
    /// let pool = StaticPool::from_config(&config).unwrap();
    ///
    /// assert_eq!(pool.footprint_bytes(), 16 * 4 + 128 * 2);
    /// ```
    pub fn from_config(config: &StaticPoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let footprint_bytes = config.footprint_bytes()?;

        let subpools = config
            .subpools()
            .iter()
            .enumerate()
            .map(|(index, subpool)| {
                RwLock::new(Subpool::new(
                    u16::try_from(index)
                        .expect("subpool count is validated against the index range"),
                    NonZero::new(subpool.page_size())
                        .expect("page sizes are validated to be non-zero"),
                    NonZero::new(subpool.slot_count())
                        .expect("slot counts are validated to be non-zero"),
                    config.release_policy(),
                ))
            })
            .collect::<Box<[_]>>();

        let page_sizes = config
            .subpools()
            .iter()
            .map(SubpoolConfig::page_size)
            .collect::<Box<[_]>>();

        info!(
            subpool_count = subpools.len(),
            footprint_bytes,
            release_policy = ?config.release_policy(),
            "static pool initialized"
        );

        Ok(Self {
            subpools,
            page_sizes,
            footprint_bytes,
            config: config.clone(),
        })
    }

    /// The configuration the pool was built from.
    #[must_use]
    pub fn config(&self) -> &StaticPoolConfig {
        &self.config
    }

    /// Number of subpools.
    #[must_use]
    pub fn subpool_count(&self) -> usize {
        self.subpools.len()
    }

    /// Page size of each subpool, in ascending order. Index `n` belongs to subpool `n`.
    #[must_use]
    pub fn page_sizes(&self) -> &[usize] {
        &self.page_sizes
    }

    /// The largest payload the pool can store.
    #[must_use]
    pub fn max_page_size(&self) -> usize {
        self.page_sizes
            .last()
            .copied()
            .expect("a validated configuration has at least one subpool")
    }

    /// Total number of slots across all subpools.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config
            .subpools()
            .iter()
            .map(SubpoolConfig::slot_count)
            .sum()
    }

    /// Number of live reservations across all subpools.
    ///
    /// Each subpool is inspected separately, so with concurrent activity the result is only an
    /// approximation of the state at any single point in time.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subpools
            .iter()
            .map(|subpool| subpool.read_recursive().occupied())
            .sum()
    }

    /// Whether the pool holds no live reservations. Same caveats as [`len()`](Self::len).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subpools
            .iter()
            .all(|subpool| subpool.read_recursive().occupied() == 0)
    }

    /// Bytes of page storage committed by the pool. Constant for the lifetime of the pool.
    #[must_use]
    pub fn footprint_bytes(&self) -> usize {
        self.footprint_bytes
    }

    /// Occupancy of every subpool, in subpool order.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 2)
    ///     .subpool(64, 1)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// pool.reserve(b"ping").unwrap();
    ///
    /// let stats = pool.subpool_stats().collect::<Vec<_>>();
    ///
    /// assert_eq!(stats[0].occupied(), 1);
    /// assert_eq!(stats[0].vacant(), 1);
    /// assert_eq!(stats[1].occupied(), 0);
    /// ```
    pub fn subpool_stats(&self) -> impl Iterator<Item = SubpoolStats> + '_ {
        self.subpools.iter().map(|subpool| {
            let subpool = subpool.read_recursive();

            SubpoolStats::new(
                subpool.index(),
                subpool.page_size(),
                subpool.slot_count(),
                subpool.occupied(),
            )
        })
    }

    /// Stores a copy of `payload` in the smallest subpool whose pages can hold it.
    ///
    /// # Errors
    ///
    /// * [`StoreError::EmptyPayload`] if `payload` is empty.
    /// * [`StoreError::NoFittingSubpool`] if `payload` is longer than the largest page size.
    /// * [`StoreError::PoolExhausted`] if the selected subpool has no vacant page. Larger
    ///   subpools are not considered.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool, StoreError};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 1)
    ///     .subpool(64, 1)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// let small = pool.reserve(&[1; 10]).unwrap();
    /// let large = pool.reserve(&[2; 50]).unwrap();
    ///
    /// assert_eq!(small.subpool_index(), 0);
    /// assert_eq!(large.subpool_index(), 1);
    ///
    /// assert_eq!(
    ///     pool.reserve(&[3; 10]),
    ///     Err(StoreError::PoolExhausted { subpool_index: 0 })
    /// );
    /// ```
    pub fn reserve(&self, payload: &[u8]) -> Result<StoreAddress> {
        self.reserve_with(payload.len(), |page| page.copy_from_slice(payload))
    }

    /// Reserves `length` bytes in the smallest subpool whose pages can hold them and lets `write`
    /// fill them in place.
    ///
    /// `write` receives a slice of exactly `length` bytes. Under [`ReleasePolicy::ZeroPage`]
    /// the slice is all zeroes. Under [`ReleasePolicy::RetainBytes`] it may contain bytes of an
    /// earlier reservation, so `write` is expected to overwrite all of it.
    ///
    /// `write` runs while the subpool is locked and must not use the same pool.
    ///
    /// [`ReleasePolicy::ZeroPage`]: crate::ReleasePolicy::ZeroPage
    /// [`ReleasePolicy::RetainBytes`]: crate::ReleasePolicy::RetainBytes
    ///
    /// # Errors
    ///
    /// Same as [`reserve()`](Self::reserve). `write` is not called if reservation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 4)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// let address = pool
    ///     .reserve_with(6, |page| {
    ///         page[..2].copy_from_slice(&0x0801_u16.to_be_bytes());
    ///         page[2..].copy_from_slice(&42_u32.to_be_bytes());
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(&*pool.resolve(address).unwrap(), &[8, 1, 0, 0, 0, 42]);
    /// ```
    pub fn reserve_with(
        &self,
        length: usize,
        write: impl FnOnce(&mut [u8]),
    ) -> Result<StoreAddress> {
        let subpool_index = self.route(length).inspect_err(record_failure)?;

        let address = self
            .subpools
            .get(subpool_index)
            .expect("routing only selects configured subpools")
            .write()
            .reserve_with(length, write)
            .inspect_err(record_failure)?;

        metrics::observe_reserved(length);

        Ok(address)
    }

    /// Provides shared access to the payload stored at `address`.
    ///
    /// The returned view keeps the subpool locked for shared access until it is dropped. Copy
    /// the payload out with [`read_into()`](Self::read_into) if it is needed for longer.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidAddress`] if the address is outside the configured layout.
    /// * [`StoreError::StaleAddress`] if the reservation has been released since the address
    ///   was issued.
    /// * [`StoreError::SlotNotOccupied`] if the address was never issued by this pool but
    ///   happens to match the current generation of a vacant slot.
    pub fn resolve(&self, address: StoreAddress) -> Result<PageView<'_>> {
        let subpool = self.subpool(address)?.read_recursive();

        subpool
            .validate(address)
            .and_then(|()| subpool.read(address.slot_index()).map(|_| ()))
            .inspect_err(record_failure)?;

        let bytes = RwLockReadGuard::map(subpool, |subpool| {
            subpool
                .read(address.slot_index())
                .expect("slot was validated while holding the same lock")
        });

        Ok(PageView::new(address, bytes))
    }

    /// Provides exclusive access to the payload stored at `address`, for modification in place.
    ///
    /// The length of the payload cannot be changed. The returned view keeps the subpool locked
    /// exclusively until it is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`resolve()`](Self::resolve).
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 4)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// let address = pool.reserve(&[0, 0, 7]).unwrap();
    ///
    /// pool.modify(address).unwrap()[0] = 0xFF;
    ///
    /// assert_eq!(&*pool.resolve(address).unwrap(), &[0xFF, 0, 7]);
    /// ```
    pub fn modify(&self, address: StoreAddress) -> Result<PageViewMut<'_>> {
        let mut subpool = self.subpool(address)?.write();

        subpool
            .validate(address)
            .and_then(|()| subpool.modify(address.slot_index()).map(|_| ()))
            .inspect_err(record_failure)?;

        let bytes = RwLockWriteGuard::map(subpool, |subpool| {
            subpool
                .modify(address.slot_index())
                .expect("slot was validated while holding the same lock")
        });

        Ok(PageViewMut::new(address, bytes))
    }

    /// Copies the payload stored at `address` into `buffer` and returns its length.
    ///
    /// Unlike [`resolve()`](Self::resolve), no lock is held once this returns.
    ///
    /// # Errors
    ///
    /// Same as [`resolve()`](Self::resolve), plus [`StoreError::BufferTooSmall`] if `buffer`
    /// is shorter than the payload. Nothing is copied in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 4)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// let address = pool.reserve(b"frame").unwrap();
    ///
    /// let mut buffer = [0_u8; 16];
    /// let len = pool.read_into(address, &mut buffer).unwrap();
    ///
    /// assert_eq!(&buffer[..len], b"frame");
    /// ```
    pub fn read_into(&self, address: StoreAddress, buffer: &mut [u8]) -> Result<usize> {
        let payload = self.resolve(address)?;

        let Some(target) = buffer.get_mut(..payload.len()) else {
            return Err(StoreError::BufferTooSmall {
                required: payload.len(),
                available: buffer.len(),
            });
        };

        target.copy_from_slice(&payload);

        Ok(payload.len())
    }

    /// Ends the reservation at `address`, making its page available for new reservations.
    ///
    /// After this returns, the address and all copies of it are stale.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidAddress`] if the address is outside the configured layout.
    /// * [`StoreError::StaleAddress`] if the reservation has already been released. Releasing
    ///   the same address twice is always reported this way.
    /// * [`StoreError::DoubleRelease`] if the address was never issued by this pool but
    ///   happens to match the current generation of a vacant slot.
    pub fn release(&self, address: StoreAddress) -> Result<()> {
        let mut subpool = self.subpool(address)?.write();

        subpool
            .validate(address)
            .and_then(|()| subpool.release(address.slot_index()))
            .inspect_err(record_failure)?;

        metrics::observe_released();

        Ok(())
    }

    /// Whether `address` refers to a live reservation.
    ///
    /// Stale addresses and addresses of vacant slots are not errors here, they simply are not
    /// contained in the pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidAddress`] if the address is outside the configured layout.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 4)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// let address = pool.reserve(b"event").unwrap();
    /// assert!(pool.contains(address).unwrap());
    ///
    /// pool.release(address).unwrap();
    /// assert!(!pool.contains(address).unwrap());
    /// ```
    pub fn contains(&self, address: StoreAddress) -> Result<bool> {
        self.subpool(address)?
            .read_recursive()
            .contains(address)
            .inspect_err(record_failure)
    }

    /// Wraps `address` in a guard that releases the reservation when dropped.
    ///
    /// The address is not validated here. Invalid or stale addresses are reported by the
    /// operations of the guard.
    ///
    /// # Examples
    ///
    /// ```
    /// use static_pool::{ReleasePolicy, StaticPool};
    ///
    /// let pool = StaticPool::builder()
    ///     .subpool(16, 1)
    ///     .release_policy(ReleasePolicy::ZeroPage)
    ///     .build()
    ///     .unwrap();
    ///
    /// {
    ///     let guard = pool.guard(pool.reserve(b"once").unwrap());
    ///     assert_eq!(&*guard.read().unwrap(), b"once");
    /// }
    ///
    /// // The guard released the only slot when it went out of scope.
    /// assert!(pool.is_empty());
    /// ```
    pub fn guard(&self, address: StoreAddress) -> StoreGuard<'_> {
        StoreGuard::new(self, address)
    }

    /// Index of the smallest subpool whose pages can hold `length` bytes.
    fn route(&self, length: usize) -> Result<usize> {
        if length == 0 {
            return Err(StoreError::EmptyPayload);
        }

        // Page sizes are strictly ascending, so everything before the partition point is too small.
        let subpool_index = self.page_sizes.partition_point(|&page_size| page_size < length);

        if subpool_index == self.page_sizes.len() {
            return Err(StoreError::NoFittingSubpool {
                requested_length: length,
            });
        }

        Ok(subpool_index)
    }

    fn subpool(&self, address: StoreAddress) -> Result<&RwLock<Subpool>> {
        self.subpools
            .get(usize::from(address.subpool_index()))
            .ok_or(StoreError::InvalidAddress { address })
            .inspect_err(record_failure)
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        for (index, subpool) in self.subpools.iter().enumerate() {
            let subpool = subpool.read();

            assert_eq!(usize::from(subpool.index()), index);
            assert_eq!(self.page_sizes.get(index), Some(&subpool.page_size()));

            subpool.integrity_check();
        }

        assert_eq!(
            self.subpools
                .iter()
                .map(|subpool| subpool.read().footprint_bytes())
                .sum::<usize>(),
            self.footprint_bytes
        );
    }
}

fn record_failure(error: &StoreError) {
    metrics::observe_failure(error);

    match error {
        StoreError::PoolExhausted { subpool_index } => {
            debug!(subpool_index, "subpool exhausted");
        }
        StoreError::NoFittingSubpool { requested_length } => {
            debug!(requested_length, "no subpool can hold the payload");
        }
        _ if error.is_misuse() => {
            debug!(%error, "store address rejected");
        }
        _ => {}
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::ReleasePolicy;

    assert_impl_all!(StaticPool: Send, Sync, std::fmt::Debug);

    fn scenario_pool() -> StaticPool {
        StaticPool::builder()
            .subpool(16, 2)
            .subpool(64, 1)
            .release_policy(ReleasePolicy::ZeroPage)
            .build()
            .unwrap()
    }

    #[test]
    fn two_subpool_scenario() {
        let pool = scenario_pool();

        let first = pool.reserve(&[1; 10]).unwrap();
        assert_eq!(first.subpool_index(), 0);

        let second = pool.reserve(&[2; 10]).unwrap();
        assert_eq!(second.subpool_index(), 0);
        assert_ne!(first.slot_index(), second.slot_index());

        assert_eq!(
            pool.reserve(&[3; 10]),
            Err(StoreError::PoolExhausted { subpool_index: 0 })
        );

        let large = pool.reserve(&[4; 50]).unwrap();
        assert_eq!(large.subpool_index(), 1);

        assert_eq!(
            pool.reserve(&[5; 100]),
            Err(StoreError::NoFittingSubpool {
                requested_length: 100
            })
        );

        assert_eq!(&*pool.resolve(first).unwrap(), &[1; 10]);
        assert_eq!(&*pool.resolve(second).unwrap(), &[2; 10]);
        assert_eq!(&*pool.resolve(large).unwrap(), &[4; 50]);

        pool.integrity_check();
    }

    #[test]
    fn exhaustion_does_not_spill_into_larger_subpool() {
        let pool = scenario_pool();

        pool.reserve(b"a").unwrap();
        pool.reserve(b"b").unwrap();

        assert!(pool.reserve(b"c").is_err());

        // The large subpool is untouched and still available for payloads that need it.
        assert_eq!(pool.subpool_stats().nth(1).unwrap().occupied(), 0);
    }

    #[test]
    fn release_makes_room_for_next_reservation() {
        let pool = scenario_pool();

        let first = pool.reserve(b"a").unwrap();
        pool.reserve(b"b").unwrap();
        assert!(pool.reserve(b"c").is_err());

        pool.release(first).unwrap();

        let replacement = pool.reserve(b"c").unwrap();
        assert_eq!(replacement.subpool_index(), 0);
        assert_eq!(replacement.slot_index(), first.slot_index());
        assert_ne!(replacement.generation(), first.generation());

        pool.integrity_check();
    }

    #[test]
    fn payload_exactly_page_size_uses_that_subpool() {
        let pool = scenario_pool();

        assert_eq!(pool.reserve(&[0; 16]).unwrap().subpool_index(), 0);
        assert_eq!(pool.reserve(&[0; 17]).unwrap().subpool_index(), 1);
    }

    #[test]
    fn empty_payload_is_rejected() {
        let pool = scenario_pool();

        assert_eq!(pool.reserve(&[]), Err(StoreError::EmptyPayload));
        assert!(pool.is_empty());
    }

    #[test]
    fn stale_address_is_detected() {
        let pool = scenario_pool();

        let address = pool.reserve(b"old").unwrap();
        pool.release(address).unwrap();
        let reused = pool.reserve(b"new").unwrap();

        assert_eq!(reused.slot_index(), address.slot_index());

        assert_eq!(
            pool.resolve(address).unwrap_err(),
            StoreError::StaleAddress {
                address,
                current_generation: reused.generation()
            }
        );
        assert!(matches!(
            pool.release(address),
            Err(StoreError::StaleAddress { .. })
        ));
        assert!(matches!(
            pool.modify(address),
            Err(StoreError::StaleAddress { .. })
        ));

        // The live reservation is unaffected.
        assert_eq!(&*pool.resolve(reused).unwrap(), b"new");
    }

    #[test]
    fn releasing_twice_reports_stale_address() {
        let pool = scenario_pool();

        let address = pool.reserve(b"twice").unwrap();
        pool.release(address).unwrap();

        assert!(matches!(
            pool.release(address),
            Err(StoreError::StaleAddress { .. })
        ));

        pool.integrity_check();
    }

    #[test]
    fn forged_address_of_vacant_slot() {
        let pool = scenario_pool();

        let forged = StoreAddress::new(1, 0, 0);

        assert_eq!(
            pool.resolve(forged).unwrap_err(),
            StoreError::SlotNotOccupied { address: forged }
        );
        assert_eq!(
            pool.release(forged),
            Err(StoreError::DoubleRelease { address: forged })
        );
        assert!(!pool.contains(forged).unwrap());

        pool.integrity_check();
    }

    #[test]
    fn out_of_range_addresses_are_invalid() {
        let pool = scenario_pool();

        for address in [StoreAddress::new(2, 0, 0), StoreAddress::new(1, 1, 0)] {
            assert!(matches!(
                pool.resolve(address),
                Err(StoreError::InvalidAddress { .. })
            ));
            assert!(matches!(
                pool.release(address),
                Err(StoreError::InvalidAddress { .. })
            ));
            assert!(matches!(
                pool.contains(address),
                Err(StoreError::InvalidAddress { .. })
            ));
        }
    }

    #[test]
    fn modify_is_visible_to_later_reads() {
        let pool = scenario_pool();

        let address = pool.reserve(b"seq=0").unwrap();

        {
            let mut page = pool.modify(address).unwrap();
            assert_eq!(page.address(), address);
            page[4] = b'9';
        }

        assert_eq!(&*pool.resolve(address).unwrap(), b"seq=9");
    }

    #[test]
    fn concurrent_views_of_one_subpool() {
        let pool = scenario_pool();

        let a = pool.reserve(b"a").unwrap();
        let b = pool.reserve(b"b").unwrap();

        let view_a = pool.resolve(a).unwrap();
        let view_b = pool.resolve(b).unwrap();

        assert_eq!(&*view_a, b"a");
        assert_eq!(&*view_b, b"b");
    }

    #[test]
    fn nested_views_do_not_wait_for_queued_writer() {
        let pool = StaticPool::builder()
            .subpool(16, 3)
            .release_policy(ReleasePolicy::ZeroPage)
            .build()
            .unwrap();

        let a = pool.reserve(b"a").unwrap();
        let b = pool.reserve(b"b").unwrap();

        let view_a = pool.resolve(a).unwrap();

        thread::scope(|s| {
            let writer = s.spawn(|| pool.reserve(b"c"));

            // Give the writer time to queue up behind the view we hold.
            thread::sleep(Duration::from_millis(50));

            let view_b = pool.resolve(b).unwrap();
            assert_eq!(&*view_b, b"b");
            assert!(pool.contains(a).unwrap());
            assert_eq!(pool.len(), 2);
            drop(view_b);

            drop(view_a);

            let c = writer.join().unwrap().unwrap();
            assert_eq!(&*pool.resolve(c).unwrap(), b"c");
        });

        pool.integrity_check();
    }

    #[test]
    fn footprint_is_available_while_modifying() {
        let pool = scenario_pool();

        let address = pool.reserve(b"frame").unwrap();
        let mut page = pool.modify(address).unwrap();
        page[0] = b'F';

        assert_eq!(pool.footprint_bytes(), 96);
    }

    #[test]
    fn panicking_writer_does_not_leak_slot() {
        let pool = StaticPool::builder()
            .subpool(16, 1)
            .release_policy(ReleasePolicy::ZeroPage)
            .build()
            .unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.reserve_with(4, |_| panic!("writer failed"))
        }));

        assert!(outcome.is_err());
        assert!(pool.is_empty());
        pool.integrity_check();

        let address = pool.reserve(b"abcd").unwrap();
        assert_eq!(&*pool.resolve(address).unwrap(), b"abcd");
    }

    #[test]
    fn read_into_copies_payload() {
        let pool = scenario_pool();

        let address = pool.reserve(b"payload").unwrap();

        let mut exact = [0_u8; 7];
        assert_eq!(pool.read_into(address, &mut exact).unwrap(), 7);
        assert_eq!(&exact, b"payload");

        let mut short = [0_u8; 6];
        assert_eq!(
            pool.read_into(address, &mut short),
            Err(StoreError::BufferTooSmall {
                required: 7,
                available: 6
            })
        );
        assert_eq!(short, [0; 6]);
    }

    #[test]
    fn zero_page_policy_hides_previous_payload() {
        let pool = StaticPool::builder()
            .subpool(8, 1)
            .release_policy(ReleasePolicy::ZeroPage)
            .build()
            .unwrap();

        let address = pool.reserve(b"private!").unwrap();
        pool.release(address).unwrap();

        pool.reserve_with(8, |page| assert_eq!(page, &[0; 8]))
            .unwrap();
    }

    #[test]
    fn introspection_reflects_layout_and_occupancy() {
        let pool = scenario_pool();

        assert_eq!(pool.subpool_count(), 2);
        assert_eq!(pool.page_sizes(), &[16, 64]);
        assert_eq!(pool.max_page_size(), 64);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.footprint_bytes(), 96);
        assert!(pool.is_empty());
        assert_eq!(pool.config().release_policy(), ReleasePolicy::ZeroPage);

        let address = pool.reserve(&[0; 40]).unwrap();

        assert_eq!(pool.len(), 1);
        assert!(!pool.is_empty());

        let stats = pool.subpool_stats().collect::<Vec<_>>();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].index(), 1);
        assert_eq!(stats[1].page_size(), 64);
        assert_eq!(stats[1].slot_count(), 1);
        assert_eq!(stats[1].occupied(), 1);
        assert_eq!(stats[1].vacant(), 0);

        pool.release(address).unwrap();

        assert_eq!(pool.len(), 0);
        assert_eq!(pool.footprint_bytes(), 96);
    }

    #[test]
    fn concurrent_reservations_never_share_a_slot() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 8;

        let pool = StaticPool::builder()
            .subpool(8, THREADS * PER_THREAD)
            .release_policy(ReleasePolicy::RetainBytes)
            .build()
            .unwrap();

        let pool = &pool;
        let barrier = &Barrier::new(THREADS);

        let mut addresses = thread::scope(|s| {
            let handles = (0..THREADS)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();

                        (0..PER_THREAD)
                            .map(|_| pool.reserve(b"x").unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        addresses.sort();
        addresses.dedup();

        assert_eq!(addresses.len(), THREADS * PER_THREAD);
        assert!(pool.reserve(b"x").is_err());

        pool.integrity_check();
    }
}
