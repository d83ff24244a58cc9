use std::fmt;
use std::mem::ManuallyDrop;

use tracing::warn;

use crate::error::Result;
use crate::{PageView, PageViewMut, StaticPool, StoreAddress};

/// Owns a reservation for the duration of a scope and releases it when dropped.
///
/// Created by [`StaticPool::guard()`]. Views obtained through the guard cannot outlive it, so
/// code that receives a guard cannot keep reading a payload after the reservation has ended.
///
/// Call [`into_address()`](Self::into_address) to hand the reservation on (for example to
/// another worker) without releasing it, or [`release()`](Self::release) to release it
/// explicitly and observe the outcome.
///
/// If releasing fails on drop (because the address was stale or had been released through
/// another copy), the failure is logged as a warning and otherwise ignored.
///
/// # Examples
///
/// ```
/// use static_pool::{ReleasePolicy, StaticPool};
///
/// let pool = StaticPool::builder()
///     .subpool(32, 2)
///     .release_policy(ReleasePolicy::ZeroPage)
///     .build()
///     .unwrap();
///
/// let address = pool.reserve(b"telecommand").unwrap();
///
/// // Forward the reservation without releasing it.
/// let forwarded = pool.guard(address).into_address();
/// assert!(pool.contains(forwarded).unwrap());
///
/// // Release it explicitly once the payload has been consumed.
/// let guard = pool.guard(forwarded);
/// assert_eq!(&*guard.read().unwrap(), b"telecommand");
/// guard.release().unwrap();
///
/// assert!(pool.is_empty());
/// ```
#[must_use = "dropping the guard immediately releases the reservation"]
pub struct StoreGuard<'a> {
    pool: &'a StaticPool,
    address: StoreAddress,
}

impl<'a> StoreGuard<'a> {
    pub(crate) fn new(pool: &'a StaticPool, address: StoreAddress) -> Self {
        Self { pool, address }
    }

    /// The guarded address.
    #[must_use]
    pub fn address(&self) -> StoreAddress {
        self.address
    }

    /// Shared access to the guarded payload. See [`StaticPool::resolve()`].
    ///
    /// # Errors
    ///
    /// Same as [`StaticPool::resolve()`].
    pub fn read(&self) -> Result<PageView<'_>> {
        self.pool.resolve(self.address)
    }

    /// Exclusive access to the guarded payload. See [`StaticPool::modify()`].
    ///
    /// # Errors
    ///
    /// Same as [`StaticPool::modify()`].
    pub fn modify(&mut self) -> Result<PageViewMut<'_>> {
        self.pool.modify(self.address)
    }

    /// Releases the reservation now and reports the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`StaticPool::release()`].
    pub fn release(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        this.pool.release(this.address)
    }

    /// Disarms the guard and returns the address, leaving the reservation in place.
    #[must_use]
    pub fn into_address(self) -> StoreAddress {
        let this = ManuallyDrop::new(self);
        this.address
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.pool.release(self.address) {
            warn!(address = %self.address, %error, "guarded reservation could not be released");
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for StoreGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreGuard")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
