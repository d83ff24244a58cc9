#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A byte store with a fixed memory footprint for systems that must not allocate after start-up.
//!
//! This crate provides [`StaticPool`], which commits all of its memory when it is built and
//! then hands out pages of that memory to variable-sized payloads such as telemetry packets,
//! telecommands or messages between worker threads. Instead of passing the payload bytes
//! around, components pass a small [`StoreAddress`] that identifies where the payload is stored.
//!
//! # Key Features
//!
//! - **No allocation after initialization**: reserving, reading and releasing never touch the
//!   heap, so the memory footprint is known up front and never changes
//! - **Size classes**: the pool is made of subpools with different page sizes and every payload
//!   goes to the smallest subpool whose pages can hold it
//! - **Bounded time**: every operation is constant-time apart from routing, which is
//!   logarithmic in the number of subpools
//! - **Stale address detection**: addresses carry a generation, so using an address after its
//!   reservation was released is reported as an error instead of reading someone else's data
//! - **Non-blocking exhaustion**: a full subpool is reported immediately, leaving backpressure
//!   to the caller
//! - **Thread safety**: every subpool has its own lock, so different size classes never contend
//! - **Fixed-width handles**: addresses convert to and from a `u64` for use in message headers
//!
//! # Examples
//!
//! ```
//! use static_pool::{ReleasePolicy, StaticPool, StoreError};
//!
//! let pool = StaticPool::builder()
//!     .subpool(16, 2)
//!     .subpool(64, 1)
//!     .release_policy(ReleasePolicy::ZeroPage)
//!     .build()
//!     .unwrap();
//!
//! // Small payloads go to the 16-byte subpool.
//! let first = pool.reserve(&[1; 10]).unwrap();
//! let second = pool.reserve(&[2; 10]).unwrap();
//! assert_eq!(first.subpool_index(), 0);
//! assert_eq!(second.subpool_index(), 0);
//!
//! // Both of its slots are now taken. Larger subpools are not used as overflow.
//! assert_eq!(
//!     pool.reserve(&[3; 10]),
//!     Err(StoreError::PoolExhausted { subpool_index: 0 })
//! );
//!
//! // Larger payloads go to the 64-byte subpool.
//! let large = pool.reserve(&[4; 50]).unwrap();
//! assert_eq!(large.subpool_index(), 1);
//!
//! // Nothing can hold 100 bytes.
//! assert_eq!(
//!     pool.reserve(&[5; 100]),
//!     Err(StoreError::NoFittingSubpool {
//!         requested_length: 100
//!     })
//! );
//!
//! // The address can be sent anywhere as a plain integer.
//! let raw = u64::from(large);
//! let received = static_pool::StoreAddress::from(raw);
//!
//! assert_eq!(&*pool.resolve(received).unwrap(), &[4; 50]);
//! pool.release(received).unwrap();
//! ```
//!
//! # Telemetry
//!
//! The pool reports the following events through [`nm`], for the application to collect
//! and publish as it sees fit:
//!
//! - `static_pool_reserved_bytes`: histogram of reserved payload lengths
//! - `static_pool_released`: count of releases
//! - `static_pool_exhausted`: count of reservations rejected because a subpool was full
//! - `static_pool_misuse`: count of operations rejected because of an invalid, stale or
//!   already released address
//!
//! Rejected operations are also logged at `debug` level through [`tracing`].

mod address;
mod builder;
mod config;
mod error;
mod guard;
mod metrics;
mod pool;
mod slot;
mod stats;
mod subpool;
mod view;

pub use address::*;
pub use builder::*;
pub use config::{ReleasePolicy, StaticPoolConfig, SubpoolConfig};
pub use error::{ConfigError, StoreError};
pub use guard::*;
pub use pool::*;
pub use stats::*;
pub use view::*;
