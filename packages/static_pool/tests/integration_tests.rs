//! Integration tests for `static_pool` exercising the public API with randomized but
//! reproducible operation sequences.

#![allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use static_pool::{
    ReleasePolicy, StaticPool, StaticPoolConfig, StoreAddress, StoreError, SubpoolConfig,
};

const SEED: u64 = 0x5747_4943_5F50_4F4F;

fn layered_pool(release_policy: ReleasePolicy) -> StaticPool {
    StaticPool::builder()
        .subpool(8, 16)
        .subpool(32, 8)
        .subpool(128, 4)
        .subpool(512, 2)
        .release_policy(release_policy)
        .build()
        .unwrap()
}

fn random_payload(rng: &mut StdRng, max_len: usize) -> Vec<u8> {
    let len = rng.random_range(1..=max_len);
    (0..len).map(|_| rng.random()).collect()
}

#[test]
fn two_subpool_scenario() {
    let pool = StaticPool::builder()
        .subpool(16, 2)
        .subpool(64, 1)
        .release_policy(ReleasePolicy::ZeroPage)
        .build()
        .unwrap();

    let first = pool.reserve(&[0xA1; 10]).unwrap();
    let second = pool.reserve(&[0xA2; 10]).unwrap();

    assert_eq!(first.subpool_index(), 0);
    assert_eq!(second.subpool_index(), 0);
    assert_ne!(first.slot_index(), second.slot_index());

    assert_eq!(
        pool.reserve(&[0xA3; 10]),
        Err(StoreError::PoolExhausted { subpool_index: 0 })
    );

    assert_eq!(pool.reserve(&[0xB0; 50]).unwrap().subpool_index(), 1);

    assert_eq!(
        pool.reserve(&[0xC0; 100]),
        Err(StoreError::NoFittingSubpool {
            requested_length: 100
        })
    );
}

#[test]
fn fit_selects_smallest_sufficient_subpool() {
    let mut rng = StdRng::seed_from_u64(SEED);

    for _ in 0..200 {
        // Random strictly ascending layout of 1 to 6 subpools.
        let subpool_count = rng.random_range(1..=6_usize);
        let mut page_size = 0;
        let layout = (0..subpool_count)
            .map(|_| {
                page_size += rng.random_range(1..=64_usize);
                SubpoolConfig::new(page_size, 1)
            })
            .collect::<Vec<_>>();
        let max_page_size = page_size;

        let pool =
            StaticPool::from_config(&StaticPoolConfig::new(layout, ReleasePolicy::RetainBytes))
                .unwrap();

        for _ in 0..20 {
            let length = rng.random_range(1..=max_page_size + 16);

            let expected = pool
                .page_sizes()
                .iter()
                .position(|&page_size| page_size >= length);

            match (pool.reserve(&vec![7; length]), expected) {
                (Ok(address), Some(subpool_index)) => {
                    assert_eq!(usize::from(address.subpool_index()), subpool_index);
                    pool.release(address).unwrap();
                }
                (Err(StoreError::NoFittingSubpool { requested_length }), None) => {
                    assert_eq!(requested_length, length);
                }
                (outcome, expected) => {
                    panic!("length {length} gave {outcome:?}, expected subpool {expected:?}")
                }
            }
        }
    }
}

#[test]
fn round_trip_returns_stored_bytes() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let pool = layered_pool(ReleasePolicy::RetainBytes);

    let mut live = Vec::new();

    for _ in 0..5_000 {
        if rng.random_bool(0.55) {
            let payload = random_payload(&mut rng, pool.max_page_size());

            match pool.reserve(&payload) {
                Ok(address) => live.push((address, payload)),
                Err(StoreError::PoolExhausted { .. }) => {}
                Err(other) => panic!("unexpected reservation failure: {other}"),
            }
        } else if !live.is_empty() {
            let (address, payload) = live.swap_remove(rng.random_range(0..live.len()));

            assert_eq!(&*pool.resolve(address).unwrap(), payload.as_slice());
            pool.release(address).unwrap();
        }
    }

    for (address, payload) in &live {
        assert_eq!(&*pool.resolve(*address).unwrap(), payload.as_slice());
    }

    assert_eq!(pool.len(), live.len());
}

#[test]
fn released_addresses_stay_stale() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let pool = layered_pool(ReleasePolicy::ZeroPage);

    let mut live = Vec::new();
    let mut released = Vec::new();

    for _ in 0..3_000 {
        if rng.random_bool(0.5) {
            let payload = random_payload(&mut rng, pool.max_page_size());

            if let Ok(address) = pool.reserve(&payload) {
                live.push(address);
            }
        } else if !live.is_empty() {
            let address = live.swap_remove(rng.random_range(0..live.len()));
            pool.release(address).unwrap();
            released.push(address);
        }
    }

    assert!(!released.is_empty());

    for address in released {
        assert!(matches!(
            pool.resolve(address),
            Err(StoreError::StaleAddress { .. })
        ));
        assert!(matches!(
            pool.release(address),
            Err(StoreError::StaleAddress { .. })
        ));
        assert!(!pool.contains(address).unwrap());
    }

    // Failed operations on stale addresses must not disturb live reservations.
    for address in live {
        assert!(pool.contains(address).unwrap());
        pool.release(address).unwrap();
    }

    assert!(pool.is_empty());
}

#[test]
fn exhaustion_boundary_per_subpool() {
    let pool = layered_pool(ReleasePolicy::ZeroPage);

    for stats in pool.subpool_stats().collect::<Vec<_>>() {
        let payload = vec![1; stats.page_size()];

        let addresses = (0..stats.slot_count())
            .map(|_| pool.reserve(&payload).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            pool.reserve(&payload),
            Err(StoreError::PoolExhausted {
                subpool_index: stats.index()
            })
        );

        pool.release(addresses[0]).unwrap();

        let replacement = pool.reserve(&payload).unwrap();
        assert_eq!(replacement.subpool_index(), stats.index());
    }

    assert_eq!(pool.len(), pool.capacity());
}

#[test]
fn address_survives_integer_transport() {
    let pool = layered_pool(ReleasePolicy::ZeroPage);

    let address = pool.reserve(b"downlink frame").unwrap();

    let header = address.to_be_bytes();
    let received = StoreAddress::from_be_bytes(header);

    assert_eq!(received, address);
    assert_eq!(&*pool.resolve(received).unwrap(), b"downlink frame");
}

#[test]
fn pool_from_toml_layout() {
    let config = StaticPoolConfig::from_toml_str(
        r#"
        release_policy = "retain_bytes"

        [[subpools]]
        page_size = 32
        slot_count = 4

        [[subpools]]
        page_size = 256
        slot_count = 2
        "#,
    )
    .unwrap();

    let pool = StaticPool::from_config(&config).unwrap();

    assert_eq!(pool.page_sizes(), &[32, 256]);
    assert_eq!(pool.capacity(), 6);
    assert_eq!(pool.footprint_bytes(), 32 * 4 + 256 * 2);
}

#[test]
fn guard_hands_reservation_between_owners() {
    let pool = layered_pool(ReleasePolicy::ZeroPage);

    let address = {
        let guard = pool.guard(pool.reserve(b"handover").unwrap());
        guard.into_address()
    };

    assert!(pool.contains(address).unwrap());

    {
        let guard = pool.guard(address);
        assert_eq!(&*guard.read().unwrap(), b"handover");
    }

    assert!(!pool.contains(address).unwrap());
}
