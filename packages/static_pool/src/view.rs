use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use crate::StoreAddress;

/// Shared, read-only access to the payload of a live reservation.
///
/// Obtained from [`StaticPool::resolve()`][crate::StaticPool::resolve] or
/// [`StoreGuard::read()`][crate::StoreGuard::read]. The view dereferences to exactly the
/// bytes that were stored, not to the whole page.
///
/// While a view exists, the subpool that holds the payload is locked for shared access: other
/// readers proceed, but reservations and releases in the same subpool wait until the view is
/// dropped. Keep views short-lived and never reserve, modify or release in the same subpool on
/// a thread that still holds a view, as that thread would wait for itself. Taking further
/// read-only views and querying the pool are fine, even while writers are waiting.
pub struct PageView<'a> {
    address: StoreAddress,
    bytes: MappedRwLockReadGuard<'a, [u8]>,
}

impl<'a> PageView<'a> {
    pub(crate) fn new(address: StoreAddress, bytes: MappedRwLockReadGuard<'a, [u8]>) -> Self {
        Self { address, bytes }
    }

    /// The address of the reservation being viewed.
    #[must_use]
    pub fn address(&self) -> StoreAddress {
        self.address
    }
}

impl Deref for PageView<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl AsRef<[u8]> for PageView<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for PageView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageView")
            .field("address", &self.address)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Exclusive, mutable access to the payload of a live reservation.
///
/// Obtained from [`StaticPool::modify()`][crate::StaticPool::modify] or
/// [`StoreGuard::modify()`][crate::StoreGuard::modify]. The length of the payload is fixed at
/// reservation time; the view allows changing the bytes, not their number.
///
/// While this view exists, the subpool that holds the payload is locked exclusively. The
/// thread holding it must not use the same subpool in any other way until the view is dropped,
/// apart from [`StaticPool::footprint_bytes()`][crate::StaticPool::footprint_bytes] and other
/// layout queries that do not inspect occupancy.
pub struct PageViewMut<'a> {
    address: StoreAddress,
    bytes: MappedRwLockWriteGuard<'a, [u8]>,
}

impl<'a> PageViewMut<'a> {
    pub(crate) fn new(address: StoreAddress, bytes: MappedRwLockWriteGuard<'a, [u8]>) -> Self {
        Self { address, bytes }
    }

    /// The address of the reservation being modified.
    #[must_use]
    pub fn address(&self) -> StoreAddress {
        self.address
    }
}

impl Deref for PageViewMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl DerefMut for PageViewMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for PageViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageViewMut")
            .field("address", &self.address)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
