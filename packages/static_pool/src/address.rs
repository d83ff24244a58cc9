use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one reservation in a [`StaticPool`][crate::StaticPool].
///
/// A store address is what travels between producers and consumers instead of the payload
/// bytes. It is a plain value: copying it is cheap, dropping it does nothing and holding it
/// does not keep the reservation alive. Only an explicit release ends a reservation.
///
/// The address carries the generation of its slot at the time of the reservation. Every
/// release of the slot increments the generation, so an address that outlived its
/// reservation is reliably detected as stale instead of silently resolving to whatever
/// payload now occupies the slot.
///
/// # Wire representation
///
/// The address packs into a single `u64` (see [`to_raw()`][Self::to_raw]) suitable for
/// message headers exchanged between threads or tasks of the same process. The raw value
/// is not a memory pointer and is only meaningful to the pool that issued it.
///
/// # Generation wrap-around
///
/// Generations are 32-bit counters that wrap on overflow. A stale address is only mistaken
/// for a live one if its slot is released exactly a multiple of 2^32 times between the
/// issuing of the address and its use.
///
/// # Example
///
/// ```
/// use static_pool::StoreAddress;
///
/// let address = StoreAddress::new(1, 7, 42);
///
/// let header_field = address.to_raw();
/// assert_eq!(StoreAddress::from_raw(header_field), address);
///
/// assert_eq!(address.to_string(), "1:7@42");
/// ```
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct StoreAddress {
    subpool_index: u16,
    slot_index: u16,
    generation: u32,
}

const SUBPOOL_INDEX_SHIFT: u32 = 48;
const SLOT_INDEX_SHIFT: u32 = 32;

impl StoreAddress {
    /// Assembles an address from its parts.
    ///
    /// Addresses are normally obtained from a reservation. Assembling one by hand is mostly
    /// useful for decoding foreign representations and for tests.
    #[must_use]
    pub const fn new(subpool_index: u16, slot_index: u16, generation: u32) -> Self {
        Self {
            subpool_index,
            slot_index,
            generation,
        }
    }

    /// Index of the subpool holding the reservation.
    #[must_use]
    pub const fn subpool_index(&self) -> u16 {
        self.subpool_index
    }

    /// Index of the slot within its subpool.
    #[must_use]
    pub const fn slot_index(&self) -> u16 {
        self.slot_index
    }

    /// Generation of the slot at the time the reservation was made.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the address into a single integer.
    ///
    /// The layout is `subpool_index << 48 | slot_index << 32 | generation`.
    #[must_use]
    #[expect(
        clippy::cast_lossless,
        reason = "From is not usable in const fn and every field fits in u64"
    )]
    pub const fn to_raw(&self) -> u64 {
        ((self.subpool_index as u64) << SUBPOOL_INDEX_SHIFT)
            | ((self.slot_index as u64) << SLOT_INDEX_SHIFT)
            | (self.generation as u64)
    }

    /// Unpacks an address packed by [`to_raw()`][Self::to_raw].
    ///
    /// Every `u64` decodes to some address. Whether that address is valid for a given pool
    /// is only known when the pool is asked to resolve it.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "truncation is how the packed fields are extracted"
    )]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            subpool_index: (raw >> SUBPOOL_INDEX_SHIFT) as u16,
            slot_index: (raw >> SLOT_INDEX_SHIFT) as u16,
            generation: raw as u32,
        }
    }

    /// The raw representation in big-endian (network) byte order.
    #[must_use]
    pub const fn to_be_bytes(&self) -> [u8; 8] {
        self.to_raw().to_be_bytes()
    }

    /// Decodes an address from the output of [`to_be_bytes()`][Self::to_be_bytes].
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self::from_raw(u64::from_be_bytes(bytes))
    }
}

impl From<StoreAddress> for u64 {
    fn from(value: StoreAddress) -> Self {
        value.to_raw()
    }
}

impl From<u64> for StoreAddress {
    fn from(value: u64) -> Self {
        Self::from_raw(value)
    }
}

impl fmt::Display for StoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.subpool_index, self.slot_index, self.generation
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::hash::Hash;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(StoreAddress: Send, Sync, Copy, Eq, Hash, fmt::Debug, fmt::Display);

    #[test]
    fn parts_are_preserved() {
        let address = StoreAddress::new(3, 500, 77);

        assert_eq!(address.subpool_index(), 3);
        assert_eq!(address.slot_index(), 500);
        assert_eq!(address.generation(), 77);
    }

    #[test]
    fn raw_layout_is_stable() {
        let address = StoreAddress::new(0x0102, 0x0304, 0x0506_0708);

        assert_eq!(address.to_raw(), 0x0102_0304_0506_0708);
        assert_eq!(
            address.to_be_bytes(),
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
    }

    #[test]
    fn extreme_values_survive_packing() {
        for address in [
            StoreAddress::new(0, 0, 0),
            StoreAddress::new(u16::MAX, u16::MAX, u32::MAX),
            StoreAddress::new(u16::MAX, 0, 0),
            StoreAddress::new(0, u16::MAX, 0),
            StoreAddress::new(0, 0, u32::MAX),
        ] {
            assert_eq!(StoreAddress::from_raw(address.to_raw()), address);
            assert_eq!(StoreAddress::from_be_bytes(address.to_be_bytes()), address);
            assert_eq!(StoreAddress::from(u64::from(address)), address);
        }
    }

    #[test]
    fn generation_distinguishes_addresses() {
        let old = StoreAddress::new(1, 1, 1);
        let new = StoreAddress::new(1, 1, 2);

        assert_ne!(old, new);
        assert_ne!(old.to_raw(), new.to_raw());

        let set: HashSet<_> = [old, new, old].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(StoreAddress::new(0, 1, 2).to_string(), "0:1@2");
    }

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Announcement {
        kind: String,
        address: StoreAddress,
    }

    #[test]
    fn embeds_in_serialized_messages() {
        let announcement = Announcement {
            kind: "housekeeping".to_string(),
            address: StoreAddress::new(1, 7, 42),
        };

        let text = toml::to_string(&announcement).unwrap();

        assert!(text.contains("subpool_index = 1"), "{text}");
        assert!(text.contains("generation = 42"), "{text}");

        let decoded: Announcement = toml::from_str(&text).unwrap();
        assert_eq!(decoded, announcement);
    }
}
