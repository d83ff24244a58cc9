/// Bookkeeping for one page of a subpool.
///
/// The page bytes themselves live in the subpool's contiguous storage; this records which part
/// of the page is in use and which reservation it belongs to.
///
/// A slot is either vacant (`length == 0`) or occupied (`0 < length <= page_size`). The
/// generation starts at zero and is incremented, wrapping on overflow, on every release.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct SlotMeta {
    /// Number of payload bytes at the start of the page. Zero means the slot is vacant.
    length: usize,

    generation: u32,
}

impl SlotMeta {
    #[must_use]
    pub(crate) fn is_occupied(&self) -> bool {
        self.length != 0
    }

    /// Length of the stored payload, zero if vacant.
    #[must_use]
    pub(crate) fn length(&self) -> usize {
        self.length
    }

    #[must_use]
    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    /// Marks the slot as holding a payload of `length` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already occupied or if `length` is zero.
    pub(crate) fn occupy(&mut self, length: usize) {
        assert!(!self.is_occupied(), "occupied slot cannot be occupied again");
        assert!(length != 0, "a slot cannot be occupied by an empty payload");

        self.length = length;
    }

    /// Marks the slot as vacant and advances its generation, invalidating every address
    /// issued for the ending reservation.
    ///
    /// Returns the length of the payload that was stored.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not occupied.
    pub(crate) fn vacate(&mut self) -> usize {
        assert!(self.is_occupied(), "vacant slot cannot be vacated");

        self.generation = self.generation.wrapping_add(1);

        std::mem::take(&mut self.length)
    }
}
