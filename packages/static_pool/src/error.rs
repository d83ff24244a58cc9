use thiserror::Error;

use crate::StoreAddress;

/// Errors returned by the runtime operations of a [`StaticPool`][crate::StaticPool].
///
/// The variants fall into two groups that callers are expected to treat differently:
///
/// * [`PoolExhausted`][Self::PoolExhausted] is a transient condition ("try again later").
///   It is the input to whatever backpressure policy the caller applies (retry, drop the
///   new data, discard older data). See [`is_transient()`][Self::is_transient].
/// * [`InvalidAddress`][Self::InvalidAddress], [`StaleAddress`][Self::StaleAddress],
///   [`DoubleRelease`][Self::DoubleRelease] and [`SlotNotOccupied`][Self::SlotNotOccupied]
///   indicate a bug in the caller, such as a use-after-release. See
///   [`is_misuse()`][Self::is_misuse].
///
/// The remaining variants report requests that can never succeed with the current pool layout
/// or arguments, independent of pool state.
///
/// None of the conditions are fatal to the pool itself - the pool remains fully usable after
/// returning any of these errors.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum StoreError {
    /// The subpool selected for the request has no vacant slot.
    ///
    /// The pool never spills over into a larger subpool, so this is reported even if other
    /// subpools still have room.
    #[error("subpool {subpool_index} has no vacant slot")]
    PoolExhausted {
        /// Index of the subpool that was selected for the request.
        subpool_index: u16,
    },

    /// The requested length exceeds the page size of every configured subpool.
    ///
    /// This signals that the pool layout needs to be redesigned, not a transient condition.
    #[error("no subpool has pages of at least {requested_length} bytes")]
    NoFittingSubpool {
        /// The payload length that could not be placed.
        requested_length: usize,
    },

    /// A zero-length payload was offered. Every reservation holds at least one byte.
    #[error("cannot reserve a slot for an empty payload")]
    EmptyPayload,

    /// The subpool index or slot index of the address is outside the configured range.
    #[error("store address {address} is out of range for this pool")]
    InvalidAddress {
        /// The offending address.
        address: StoreAddress,
    },

    /// The slot referenced by the address was released (and possibly reserved again) since
    /// the address was issued.
    #[error(
        "store address {address} is stale, the slot is now at generation {current_generation}"
    )]
    StaleAddress {
        /// The offending address.
        address: StoreAddress,

        /// The generation the slot is at now.
        current_generation: u32,
    },

    /// The address refers to a slot that is vacant even though its generation matches.
    ///
    /// This happens when releasing an address that was never returned by a reservation.
    #[error("store address {address} refers to a vacant slot and cannot be released")]
    DoubleRelease {
        /// The offending address.
        address: StoreAddress,
    },

    /// The address refers to a slot that is vacant even though its generation matches.
    ///
    /// This happens when reading an address that was never returned by a reservation.
    #[error("store address {address} refers to a vacant slot and cannot be accessed")]
    SlotNotOccupied {
        /// The offending address.
        address: StoreAddress,
    },

    /// The caller-provided buffer is too short to receive the stored payload.
    #[error("buffer of {available} bytes cannot hold a payload of {required} bytes")]
    BufferTooSmall {
        /// Length of the stored payload.
        required: usize,

        /// Length of the buffer provided by the caller.
        available: usize,
    },
}

impl StoreError {
    /// Whether the error is a transient condition that may clear up without any change
    /// to the caller's logic, i.e. the caller may retry later.
    ///
    /// # Example
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
    /// let _first = pool.reserve(b"first").unwrap();
    /// let error = pool.reserve(b"second").unwrap_err();
    ///
    /// assert!(error.is_transient());
    /// assert!(!error.is_misuse());
    /// ```
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Whether the error indicates a programming error in the caller, such as using an address
    /// after it was released.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::StaleAddress { .. }
                | Self::DoubleRelease { .. }
                | Self::SlotNotOccupied { .. }
        )
    }
}

/// Errors detected while validating a pool configuration, before any memory is committed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration does not define any subpool.
    #[error("at least one subpool must be configured")]
    NoSubpools,

    /// A subpool was configured with a page size of zero bytes.
    #[error("subpool {subpool_index} has a page size of zero bytes")]
    ZeroPageSize {
        /// Position of the subpool in the configuration.
        subpool_index: usize,
    },

    /// A subpool was configured without any slots.
    #[error("subpool {subpool_index} has a slot count of zero")]
    ZeroSlotCount {
        /// Position of the subpool in the configuration.
        subpool_index: usize,
    },

    /// More subpools were configured than a store address can identify.
    #[error("{count} subpools configured but a store address can identify at most 65536")]
    TooManySubpools {
        /// Number of configured subpools.
        count: usize,
    },

    /// A subpool was configured with more slots than a store address can identify.
    #[error(
        "subpool {subpool_index} has {slot_count} slots but a store address can identify at most 65536"
    )]
    TooManySlots {
        /// Position of the subpool in the configuration.
        subpool_index: usize,

        /// The configured slot count.
        slot_count: usize,
    },

    /// Page sizes are not strictly ascending, so "smallest fitting subpool" routing
    /// would produce wrong results.
    #[error(
        "subpool {subpool_index} has a page size of {page_size} bytes, which does not exceed the {previous_page_size} bytes of the subpool before it"
    )]
    PageSizesNotAscending {
        /// Position of the misordered subpool in the configuration.
        subpool_index: usize,

        /// Page size of the misordered subpool.
        page_size: usize,

        /// Page size of the subpool immediately before it.
        previous_page_size: usize,
    },

    /// The total number of bytes required by the configuration does not fit in `usize`.
    #[error("the total size of all subpools exceeds the addressable memory")]
    FootprintOverflow,

    /// The configuration does not say what happens to page contents on release.
    #[error("a release policy must be chosen explicitly")]
    MissingReleasePolicy,

    /// The configuration text could not be parsed.
    #[error("invalid pool configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A specialized `Result` type for pool operations, returning [`StoreError`] as the error value.
pub(crate) type Result<T, E = StoreError> = std::result::Result<T, E>;
