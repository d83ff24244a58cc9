//! Tests for sharing one `StaticPool` between a fixed set of worker threads.

#![allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::collections::HashSet;
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

use static_pool::{ReleasePolicy, SharedStaticPool, StaticPool, StoreAddress, StoreError};

const WORKERS: usize = 4;

fn shared_pool(slot_count: usize) -> SharedStaticPool {
    Arc::new(
        StaticPool::builder()
            .subpool(16, slot_count)
            .subpool(256, slot_count)
            .release_policy(ReleasePolicy::ZeroPage)
            .build()
            .unwrap(),
    )
}

#[test]
fn concurrent_reservations_hold_distinct_slots() {
    const PER_WORKER: usize = 64;

    let pool = shared_pool(WORKERS * PER_WORKER);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles = (0..WORKERS)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                (0..PER_WORKER)
                    .map(|i| {
                        let payload = [u8::try_from(worker).unwrap(), u8::try_from(i).unwrap()];
                        (pool.reserve(&payload).unwrap(), payload)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    let reservations = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    let unique_slots = reservations
        .iter()
        .map(|(address, _)| (address.subpool_index(), address.slot_index()))
        .collect::<HashSet<_>>();

    assert_eq!(unique_slots.len(), WORKERS * PER_WORKER);

    // Every payload is intact, so no two workers wrote into the same page.
    for (address, payload) in &reservations {
        assert_eq!(&*pool.resolve(*address).unwrap(), payload);
    }
}

#[test]
fn concurrent_reserve_release_cycles_keep_pool_consistent() {
    const CYCLES: usize = 2_000;

    // Fewer slots than workers, so exhaustion is part of the exercise.
    let pool = shared_pool(WORKERS - 1);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles = (0..WORKERS)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                let payload = [u8::try_from(worker).unwrap(); 12];

                for _ in 0..CYCLES {
                    match pool.reserve(&payload) {
                        Ok(address) => {
                            assert_eq!(&*pool.resolve(address).unwrap(), &payload);
                            pool.release(address).unwrap();
                        }
                        Err(StoreError::PoolExhausted { subpool_index: 0 }) => {
                            thread::yield_now();
                        }
                        Err(other) => panic!("unexpected failure: {other}"),
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.is_empty());
}

#[test]
fn producers_hand_addresses_to_consumer() {
    const PER_PRODUCER: usize = 500;

    let pool = shared_pool(8);
    let (tx, rx) = mpsc::channel::<StoreAddress>();

    let producers = (0..WORKERS)
        .map(|producer| {
            let pool = Arc::clone(&pool);
            let tx = tx.clone();

            thread::spawn(move || {
                for sequence in 0..PER_PRODUCER {
                    let mut packet = [0_u8; 10];
                    packet[..2].copy_from_slice(&u16::try_from(producer).unwrap().to_be_bytes());
                    packet[2..].copy_from_slice(&u64::try_from(sequence).unwrap().to_be_bytes());

                    let address = loop {
                        match pool.reserve(&packet) {
                            Ok(address) => break address,
                            Err(error) if error.is_transient() => thread::yield_now(),
                            Err(error) => panic!("unexpected failure: {error}"),
                        }
                    };

                    tx.send(address).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    // Only the producers keep the channel open.
    drop(tx);

    let consumer = {
        let pool = Arc::clone(&pool);

        thread::spawn(move || {
            let mut next_sequence = [0_u64; WORKERS];

            for address in rx {
                let mut packet = [0_u8; 10];
                let len = pool.read_into(address, &mut packet).unwrap();
                assert_eq!(len, 10);
                pool.release(address).unwrap();

                let producer = usize::from(u16::from_be_bytes([packet[0], packet[1]]));
                let sequence = u64::from_be_bytes(packet[2..].try_into().unwrap());

                // Each producer's packets arrive in the order they were sent.
                assert_eq!(sequence, next_sequence[producer]);
                next_sequence[producer] = sequence.wrapping_add(1);
            }

            next_sequence
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }

    let received = consumer.join().unwrap();

    assert_eq!(received, [u64::try_from(PER_PRODUCER).unwrap(); WORKERS]);
    assert!(pool.is_empty());
}
