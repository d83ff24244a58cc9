//! Verifies that a built `StaticPool` serves reservations without touching the heap.
//!
//! This test is in a separate integration test binary because it replaces the global allocator.

#![cfg(not(miri))] // Miri replaces the global allocator, so cannot be used here.
#![allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use alloc_tracker::{Allocator, Session};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use static_pool::{ReleasePolicy, StaticPool, StoreAddress, StoreError};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const LIVE_LIMIT: usize = 32;
const OPERATIONS: usize = 20_000;

fn run_operations(pool: &StaticPool, rng: &mut StdRng, live: &mut [Option<StoreAddress>]) {
    let mut payload = [0_u8; 200];
    let mut copy_target = [0_u8; 200];

    for _ in 0..OPERATIONS {
        let slot = &mut live[rng.random_range(0..live.len())];

        match slot.take() {
            Some(address) => {
                let len = pool.resolve(address).unwrap().len();
                assert_eq!(pool.read_into(address, &mut copy_target), Ok(len));
                pool.modify(address).unwrap().fill(0x5A);
                pool.release(address).unwrap();

                // Stale and misuse paths must not allocate either.
                assert!(matches!(
                    pool.release(address),
                    Err(StoreError::StaleAddress { .. })
                ));
            }
            None => {
                let len = rng.random_range(1..=payload.len());
                rng.fill(&mut payload[..len]);

                match pool.reserve(&payload[..len]) {
                    Ok(address) => *slot = Some(address),
                    Err(StoreError::PoolExhausted { .. }) => {}
                    Err(other) => panic!("unexpected failure: {other}"),
                }
            }
        }
    }
}

fn assert_no_fit(pool: &StaticPool) {
    assert!(matches!(
        pool.reserve(&[0; 300]),
        Err(StoreError::NoFittingSubpool {
            requested_length: 300
        })
    ));
}

#[test]
fn steady_state_does_not_allocate() {
    let pool = StaticPool::builder()
        .subpool(16, 8)
        .subpool(64, 8)
        .subpool(256, 4)
        .release_policy(ReleasePolicy::ZeroPage)
        .build()
        .unwrap();

    let mut rng = StdRng::seed_from_u64(0xA110C);
    let mut live = [None; LIVE_LIMIT];

    // The first operations on a thread may initialize thread-local telemetry state.
    run_operations(&pool, &mut rng, &mut live);
    assert_no_fit(&pool);

    let session = Session::new();

    {
        let operation = session.operation("steady_state");
        let _span = operation.measure_thread();

        run_operations(&pool, &mut rng, &mut live);
        assert_no_fit(&pool);
    }

    let report = session.to_report();
    let (_, steady_state) = report.operations().next().unwrap();

    assert_eq!(steady_state.total_bytes_allocated(), 0);
}
