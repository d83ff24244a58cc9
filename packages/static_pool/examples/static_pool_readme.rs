//! Example that demonstrates the exact usage shown in the README.md file.
//!
//! This shows how payloads are routed to subpools by size and how a full subpool is reported.

use static_pool::{ReleasePolicy, StaticPool, StoreError};

fn main() {
    println!("=== Static Pool README Example ===");

    // Two size classes: two 16-byte pages and one 64-byte page.
    let pool = StaticPool::builder()
        .subpool(16, 2)
        .subpool(64, 1)
        .release_policy(ReleasePolicy::ZeroPage)
        .build()
        .expect("layout is valid");

    // Small payloads take the pages of the first subpool.
    let first = pool.reserve(&[1; 10]).expect("subpool 0 has room");
    let second = pool.reserve(&[2; 10]).expect("subpool 0 has room");

    println!("First payload stored at {first}");
    println!("Second payload stored at {second}");

    // A third small payload does not fit. The pool does not fall back to the larger subpool.
    match pool.reserve(&[3; 10]) {
        Err(StoreError::PoolExhausted { subpool_index }) => {
            println!("Subpool {subpool_index} is exhausted, the caller decides what to do now");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }

    // A larger payload is routed to the 64-byte subpool.
    let large = pool.reserve(&[4; 50]).expect("subpool 1 has room");
    println!("Large payload stored at {large}");

    // Nothing in the pool can hold 100 bytes.
    match pool.reserve(&[5; 100]) {
        Err(StoreError::NoFittingSubpool { requested_length }) => {
            println!("No subpool can hold {requested_length} bytes");
        }
        other => panic!("expected no fitting subpool, got {other:?}"),
    }

    // Consumers read the payload through the address and release it when done.
    let payload = pool.resolve(first).expect("address is live");
    assert_eq!(&*payload, &[1; 10]);
    drop(payload);

    pool.release(first).expect("address is live");

    // The released address is stale from now on.
    assert!(matches!(
        pool.resolve(first),
        Err(StoreError::StaleAddress { .. })
    ));

    println!("README example completed successfully!");
}
