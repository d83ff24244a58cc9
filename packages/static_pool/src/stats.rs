/// Point-in-time occupancy of one subpool, as reported by
/// [`StaticPool::subpool_stats()`][crate::StaticPool::subpool_stats].
///
/// The values are consistent with each other (taken under the subpool's lock) but may be
/// outdated by the time they are inspected if other threads use the pool concurrently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubpoolStats {
    index: u16,
    page_size: usize,
    slot_count: usize,
    occupied: usize,
}

impl SubpoolStats {
    pub(crate) fn new(index: u16, page_size: usize, slot_count: usize, occupied: usize) -> Self {
        debug_assert!(occupied <= slot_count);

        Self {
            index,
            page_size,
            slot_count,
            occupied,
        }
    }

    /// Position of the subpool in the pool.
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Capacity of each page in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Number of slots holding a payload.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Number of slots available for reservation.
    #[must_use]
    pub fn vacant(&self) -> usize {
        // Cannot underflow, guarded by the debug assertion in the constructor
        // and by the bookkeeping of the subpool that produced the data.
        self.slot_count.saturating_sub(self.occupied)
    }
}
