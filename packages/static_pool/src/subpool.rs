use std::fmt;
use std::num::NonZero;
use std::ops::Range;

use crate::config::MAX_INDEXABLE;
use crate::error::Result;
use crate::slot::SlotMeta;
use crate::{ReleasePolicy, StoreAddress, StoreError};

/// A fixed number of equally sized pages, committed once and never resized.
///
/// All pages live in one contiguous allocation and are identified by their slot index. Vacant
/// slot indexes are kept on a stack, so reserving and releasing are both constant-time and
/// never look at occupied slots.
///
/// The subpool itself is not synchronized. The pool manager wraps each subpool in its own lock.
pub(crate) struct Subpool {
    /// Position of this subpool in the pool, reported in errors and addresses.
    index: u16,

    page_size: NonZero<usize>,

    release_policy: ReleasePolicy,

    /// Page `n` occupies bytes `n * page_size .. (n + 1) * page_size`.
    storage: Box<[u8]>,

    slots: Box<[SlotMeta]>,

    /// Stack of vacant slot indexes. Only the first `vacant_count` entries are meaningful,
    /// the rest are leftovers from earlier pushes and pops.
    vacant: Box<[u16]>,

    vacant_count: usize,
}

impl Subpool {
    /// Commits the memory for `slot_count` pages of `page_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` exceeds what a slot index can address or if the storage size
    /// overflows. Both are excluded by configuration validation.
    #[must_use]
    pub(crate) fn new(
        index: u16,
        page_size: NonZero<usize>,
        slot_count: NonZero<usize>,
        release_policy: ReleasePolicy,
    ) -> Self {
        assert!(
            slot_count.get() <= MAX_INDEXABLE,
            "subpool {index} cannot hold {slot_count} slots"
        );

        let storage_size = page_size
            .get()
            .checked_mul(slot_count.get())
            .expect("storage size is validated before a subpool is created");

        // Pushed in descending order so that the first reservation takes slot 0.
        let vacant = (0..slot_count.get())
            .rev()
            .map(|slot_index| {
                u16::try_from(slot_index).expect("slot count was checked against the index range")
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            index,
            page_size,
            release_policy,
            storage: vec![0; storage_size].into_boxed_slice(),
            slots: vec![SlotMeta::default(); slot_count.get()].into_boxed_slice(),
            vacant,
            vacant_count: slot_count.get(),
        }
    }

    #[must_use]
    pub(crate) fn index(&self) -> u16 {
        self.index
    }

    #[must_use]
    pub(crate) fn page_size(&self) -> usize {
        self.page_size.get()
    }

    #[must_use]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding a payload.
    #[must_use]
    pub(crate) fn occupied(&self) -> usize {
        // Cannot underflow - the vacant stack never holds more entries than there are slots.
        self.slot_count().wrapping_sub(self.vacant_count)
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn vacant(&self) -> usize {
        self.vacant_count
    }

    /// Bytes of page storage owned by the subpool.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn footprint_bytes(&self) -> usize {
        self.storage.len()
    }

    /// Reserves a vacant slot for a payload of `length` bytes and lets `write` fill it in place.
    /// Returns the address of the new reservation.
    ///
    /// `write` receives exactly `length` bytes. Their prior contents depend on the release
    /// policy: all zeroes under [`ReleasePolicy::ZeroPage`], possibly leftovers of an earlier
    /// payload under [`ReleasePolicy::RetainBytes`].
    ///
    /// If `write` panics, the slot is left vacant and the panic is propagated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PoolExhausted`] if there is no vacant slot.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero or larger than the page size. The pool manager routes requests
    /// so that this never happens.
    pub(crate) fn reserve_with(
        &mut self,
        length: usize,
        write: impl FnOnce(&mut [u8]),
    ) -> Result<StoreAddress> {
        assert!(
            length != 0 && length <= self.page_size(),
            "payload of {length} bytes cannot be placed in a page of {} bytes",
            self.page_size()
        );

        let Some(remaining) = self.vacant_count.checked_sub(1) else {
            return Err(StoreError::PoolExhausted {
                subpool_index: self.index,
            });
        };

        let slot_index = *self
            .vacant
            .get(remaining)
            .expect("entries below the vacant count always hold a slot index");

        let zero_on_unwind = self.release_policy == ReleasePolicy::ZeroPage;
        let range = self.page_range(slot_index, length);
        let page = self
            .storage
            .get_mut(range)
            .expect("page ranges of valid slots are always within storage");

        // If `write` panics, the slot is still vacant and its page must look like one.
        let mut page = scopeguard::guard(page, move |page| {
            if zero_on_unwind {
                page.fill(0);
            }
        });

        write(&mut **page);

        // Disarm the cleanup guard since the page was written successfully.
        scopeguard::ScopeGuard::into_inner(page);

        self.vacant_count = remaining;

        let subpool_index = self.index;
        let slot = self.slot_mut(slot_index);
        slot.occupy(length);
        let address = StoreAddress::new(subpool_index, slot_index, slot.generation());

        Ok(address)
    }

    /// Reserves a vacant slot and copies `payload` into it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PoolExhausted`] if there is no vacant slot.
    ///
    /// # Panics
    ///
    /// Panics if the payload is empty or larger than the page size.
    #[cfg(test)]
    pub(crate) fn reserve(&mut self, payload: &[u8]) -> Result<StoreAddress> {
        self.reserve_with(payload.len(), |page| page.copy_from_slice(payload))
    }

    /// Checks that `address` is in range for this subpool and matches the current generation
    /// of its slot. Says nothing about whether the slot is occupied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidAddress`] if the slot index is out of range and
    /// [`StoreError::StaleAddress`] if the generation does not match.
    pub(crate) fn validate(&self, address: StoreAddress) -> Result<()> {
        let slot = self
            .slots
            .get(usize::from(address.slot_index()))
            .ok_or(StoreError::InvalidAddress { address })?;

        if slot.generation() != address.generation() {
            return Err(StoreError::StaleAddress {
                address,
                current_generation: slot.generation(),
            });
        }

        Ok(())
    }

    /// Whether `address` refers to a live reservation in this subpool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidAddress`] if the slot index is out of range.
    pub(crate) fn contains(&self, address: StoreAddress) -> Result<bool> {
        let slot = self
            .slots
            .get(usize::from(address.slot_index()))
            .ok_or(StoreError::InvalidAddress { address })?;

        Ok(slot.is_occupied() && slot.generation() == address.generation())
    }

    /// The payload stored in a slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SlotNotOccupied`] if the slot is vacant and
    /// [`StoreError::InvalidAddress`] if the slot index is out of range.
    pub(crate) fn read(&self, slot_index: u16) -> Result<&[u8]> {
        let slot = self.checked_slot(slot_index)?;

        if !slot.is_occupied() {
            return Err(StoreError::SlotNotOccupied {
                address: self.address_of(slot_index, slot),
            });
        }

        let range = self.page_range(slot_index, slot.length());
        Ok(self
            .storage
            .get(range)
            .expect("page ranges of valid slots are always within storage"))
    }

    /// The payload stored in a slot, for in-place modification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SlotNotOccupied`] if the slot is vacant and
    /// [`StoreError::InvalidAddress`] if the slot index is out of range.
    pub(crate) fn modify(&mut self, slot_index: u16) -> Result<&mut [u8]> {
        let slot = *self.checked_slot(slot_index)?;

        if !slot.is_occupied() {
            return Err(StoreError::SlotNotOccupied {
                address: self.address_of(slot_index, &slot),
            });
        }

        let range = self.page_range(slot_index, slot.length());
        Ok(self
            .storage
            .get_mut(range)
            .expect("page ranges of valid slots are always within storage"))
    }

    /// Ends the reservation of a slot and returns it to the vacant stack.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DoubleRelease`] if the slot is already vacant and
    /// [`StoreError::InvalidAddress`] if the slot index is out of range.
    pub(crate) fn release(&mut self, slot_index: u16) -> Result<()> {
        let slot = *self.checked_slot(slot_index)?;

        if !slot.is_occupied() {
            return Err(StoreError::DoubleRelease {
                address: self.address_of(slot_index, &slot),
            });
        }

        let length = self.slot_mut(slot_index).vacate();

        if self.release_policy == ReleasePolicy::ZeroPage {
            let range = self.page_range(slot_index, length);
            self.storage
                .get_mut(range)
                .expect("page ranges of valid slots are always within storage")
                .fill(0);
        }

        *self
            .vacant
            .get_mut(self.vacant_count)
            .expect("the vacant stack has room for every slot") = slot_index;

        // Cannot overflow - bounded by the slot count, which fits in memory.
        self.vacant_count = self.vacant_count.wrapping_add(1);

        Ok(())
    }

    fn checked_slot(&self, slot_index: u16) -> Result<&SlotMeta> {
        self.slots
            .get(usize::from(slot_index))
            .ok_or(StoreError::InvalidAddress {
                address: StoreAddress::new(self.index, slot_index, 0),
            })
    }

    fn slot_mut(&mut self, slot_index: u16) -> &mut SlotMeta {
        self.slots
            .get_mut(usize::from(slot_index))
            .expect("slot indexes taken from the vacant stack are always in range")
    }

    fn address_of(&self, slot_index: u16, slot: &SlotMeta) -> StoreAddress {
        StoreAddress::new(self.index, slot_index, slot.generation())
    }

    /// The first `length` bytes of the page belonging to `slot_index`.
    fn page_range(&self, slot_index: u16, length: usize) -> Range<usize> {
        debug_assert!(length <= self.page_size());

        // Cannot overflow - the result is within storage, which fits in memory.
        let start = usize::from(slot_index).wrapping_mul(self.page_size());
        start..start.wrapping_add(length)
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        let mut seen_vacant = vec![false; self.slot_count()];

        for &slot_index in self.vacant.iter().take(self.vacant_count) {
            let seen = seen_vacant
                .get_mut(usize::from(slot_index))
                .expect("vacant stack holds an out of range slot index");

            assert!(
                !*seen,
                "slot {slot_index} is on the vacant stack of subpool {} more than once",
                self.index
            );
            *seen = true;
        }

        for (slot_index, (slot, seen)) in self.slots.iter().zip(seen_vacant).enumerate() {
            assert_eq!(
                slot.is_occupied(),
                !seen,
                "slot {slot_index} of subpool {} disagrees with the vacant stack",
                self.index
            );

            if !slot.is_occupied() && self.release_policy == ReleasePolicy::ZeroPage {
                let start = slot_index.wrapping_mul(self.page_size());
                let page = self
                    .storage
                    .get(start..start.wrapping_add(self.page_size()))
                    .expect("page is within storage");

                assert!(
                    page.iter().all(|&byte| byte == 0),
                    "vacant slot {slot_index} of subpool {} holds residual bytes",
                    self.index
                );
            }
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for Subpool {
    // Page storage is omitted, it can be megabytes of payload bytes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subpool")
            .field("index", &self.index)
            .field("page_size", &self.page_size)
            .field("release_policy", &self.release_policy)
            .field("slot_count", &self.slot_count())
            .field("occupied", &self.occupied())
            .finish_non_exhaustive()
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

    use super::*;

    fn subpool(page_size: usize, slot_count: usize, release_policy: ReleasePolicy) -> Subpool {
        Subpool::new(
            2,
            NonZero::new(page_size).unwrap(),
            NonZero::new(slot_count).unwrap(),
            release_policy,
        )
    }

    #[test]
    fn smoke_test() {
        let mut subpool = subpool(8, 3, ReleasePolicy::ZeroPage);

        assert_eq!(subpool.index(), 2);
        assert_eq!(subpool.page_size(), 8);
        assert_eq!(subpool.slot_count(), 3);
        assert_eq!(subpool.vacant(), 3);
        assert_eq!(subpool.occupied(), 0);
        assert_eq!(subpool.footprint_bytes(), 24);

        let a = subpool.reserve(b"alpha").unwrap().slot_index();
        let b = subpool.reserve(b"bravo!!").unwrap().slot_index();

        assert_ne!(a, b);
        assert_eq!(subpool.occupied(), 2);
        assert_eq!(subpool.read(a).unwrap(), b"alpha");
        assert_eq!(subpool.read(b).unwrap(), b"bravo!!");

        subpool.release(a).unwrap();

        assert_eq!(subpool.occupied(), 1);
        assert_eq!(subpool.read(b).unwrap(), b"bravo!!");

        subpool.integrity_check();
    }

    #[test]
    fn reservation_address_names_subpool_and_generation() {
        let mut subpool = subpool(4, 1, ReleasePolicy::ZeroPage);

        let first = subpool.reserve(b"a").unwrap();
        assert_eq!(first, StoreAddress::new(2, 0, 0));

        subpool.release(first.slot_index()).unwrap();

        assert_eq!(subpool.reserve(b"b").unwrap(), StoreAddress::new(2, 0, 1));
    }

    #[test]
    fn first_reservations_take_ascending_slots() {
        let mut subpool = subpool(4, 3, ReleasePolicy::ZeroPage);

        assert_eq!(subpool.reserve(b"a").unwrap().slot_index(), 0);
        assert_eq!(subpool.reserve(b"b").unwrap().slot_index(), 1);
        assert_eq!(subpool.reserve(b"c").unwrap().slot_index(), 2);
    }

    #[test]
    fn released_slot_is_reused_first() {
        let mut subpool = subpool(4, 3, ReleasePolicy::ZeroPage);

        let _a = subpool.reserve(b"a").unwrap().slot_index();
        let b = subpool.reserve(b"b").unwrap().slot_index();
        subpool.release(b).unwrap();

        assert_eq!(subpool.reserve(b"c").unwrap().slot_index(), b);
        subpool.integrity_check();
    }

    #[test]
    fn exhaustion_reports_subpool_index() {
        let mut subpool = subpool(4, 2, ReleasePolicy::ZeroPage);

        let first = subpool.reserve(b"a").unwrap().slot_index();
        subpool.reserve(b"b").unwrap();

        assert_eq!(
            subpool.reserve(b"c"),
            Err(StoreError::PoolExhausted { subpool_index: 2 })
        );

        subpool.release(first).unwrap();
        subpool.reserve(b"d").unwrap();

        subpool.integrity_check();
    }

    #[test]
    fn double_release_is_reported() {
        let mut subpool = subpool(4, 2, ReleasePolicy::ZeroPage);

        let slot_index = subpool.reserve(b"a").unwrap().slot_index();
        subpool.release(slot_index).unwrap();

        assert_eq!(
            subpool.release(slot_index),
            Err(StoreError::DoubleRelease {
                address: StoreAddress::new(2, slot_index, 1)
            })
        );

        // The vacant stack must not have been corrupted by the failed release.
        subpool.integrity_check();
        subpool.reserve(b"b").unwrap();
        subpool.reserve(b"c").unwrap();
        assert!(subpool.reserve(b"d").is_err());
    }

    #[test]
    fn read_of_vacant_slot_is_reported() {
        let subpool = subpool(4, 2, ReleasePolicy::ZeroPage);

        assert_eq!(
            subpool.read(1),
            Err(StoreError::SlotNotOccupied {
                address: StoreAddress::new(2, 1, 0)
            })
        );
    }

    #[test]
    fn out_of_range_slot_is_invalid() {
        let mut subpool = subpool(4, 2, ReleasePolicy::ZeroPage);

        assert!(matches!(
            subpool.read(2),
            Err(StoreError::InvalidAddress { .. })
        ));
        assert!(matches!(
            subpool.release(2),
            Err(StoreError::InvalidAddress { .. })
        ));
        assert!(matches!(
            subpool.validate(StoreAddress::new(2, 7, 0)),
            Err(StoreError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn validate_detects_generation_mismatch() {
        let mut subpool = subpool(4, 1, ReleasePolicy::ZeroPage);

        let slot_index = subpool.reserve(b"a").unwrap().slot_index();
        let address = StoreAddress::new(2, slot_index, 0);
        subpool.validate(address).unwrap();
        assert!(subpool.contains(address).unwrap());

        subpool.release(slot_index).unwrap();
        subpool.reserve(b"b").unwrap();

        assert_eq!(
            subpool.validate(address),
            Err(StoreError::StaleAddress {
                address,
                current_generation: 1
            })
        );
        assert!(!subpool.contains(address).unwrap());
        assert!(subpool.contains(StoreAddress::new(2, slot_index, 1)).unwrap());
    }

    #[test]
    fn zero_page_policy_scrubs_released_bytes() {
        let mut subpool = subpool(8, 1, ReleasePolicy::ZeroPage);

        let slot_index = subpool.reserve(b"secret!!").unwrap().slot_index();
        subpool.release(slot_index).unwrap();
        subpool.integrity_check();

        subpool
            .reserve_with(8, |page| assert_eq!(page, &[0_u8; 8]))
            .unwrap();
    }

    #[test]
    fn retain_bytes_policy_leaves_residue() {
        let mut subpool = subpool(8, 1, ReleasePolicy::RetainBytes);

        let slot_index = subpool.reserve(b"secret!!").unwrap().slot_index();
        subpool.release(slot_index).unwrap();

        subpool
            .reserve_with(6, |page| assert_eq!(page, b"secret"))
            .unwrap();
    }

    #[test]
    fn reserve_with_writes_in_place() {
        let mut subpool = subpool(16, 1, ReleasePolicy::ZeroPage);

        let slot_index = subpool
            .reserve_with(4, |page| {
                assert_eq!(page.len(), 4);
                page.copy_from_slice(&[1, 2, 3, 4]);
            })
            .unwrap()
            .slot_index();

        assert_eq!(subpool.read(slot_index).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn modify_changes_stored_payload() {
        let mut subpool = subpool(8, 1, ReleasePolicy::ZeroPage);

        let slot_index = subpool.reserve(b"abc").unwrap().slot_index();
        subpool.modify(slot_index).unwrap()[1] = b'X';

        assert_eq!(subpool.read(slot_index).unwrap(), b"aXc");
    }

    #[test]
    fn full_page_payload_fits() {
        let mut subpool = subpool(4, 2, ReleasePolicy::ZeroPage);

        let a = subpool.reserve(&[0xAA; 4]).unwrap().slot_index();
        let b = subpool.reserve(&[0xBB; 4]).unwrap().slot_index();

        // Adjacent pages must not bleed into each other.
        assert_eq!(subpool.read(a).unwrap(), &[0xAA; 4]);
        assert_eq!(subpool.read(b).unwrap(), &[0xBB; 4]);
    }

    #[test]
    #[should_panic]
    fn oversized_payload_panics() {
        let mut subpool = subpool(4, 1, ReleasePolicy::ZeroPage);
        _ = subpool.reserve(b"too long");
    }

    #[test]
    #[should_panic]
    fn empty_payload_panics() {
        let mut subpool = subpool(4, 1, ReleasePolicy::ZeroPage);
        _ = subpool.reserve(b"");
    }

    #[test]
    fn maximum_slot_count_is_addressable() {
        let mut subpool = subpool(1, MAX_INDEXABLE, ReleasePolicy::RetainBytes);

        for _ in 0..MAX_INDEXABLE {
            subpool.reserve(&[1]).unwrap();
        }

        assert!(subpool.reserve(&[1]).is_err());
        assert_eq!(subpool.occupied(), MAX_INDEXABLE);
        assert!(subpool.read(u16::MAX).is_ok());
    }

    #[test]
    fn panicking_writer_leaves_slot_vacant() {
        let mut subpool = subpool(8, 1, ReleasePolicy::ZeroPage);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            subpool.reserve_with(4, |page| {
                page.copy_from_slice(b"half");
                panic!("writer failed");
            })
        }));

        assert!(outcome.is_err());
        assert_eq!(subpool.occupied(), 0);
        subpool.integrity_check();

        // The partially written bytes were cleared, so the next writer sees a zeroed page.
        let address = subpool
            .reserve_with(4, |page| assert!(page.iter().all(|&byte| byte == 0)))
            .unwrap();
        assert_eq!(address.slot_index(), 0);
        assert_eq!(address.generation(), 0);
    }
}
