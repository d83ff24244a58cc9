//! A fixed set of producer threads hands telemetry packets to a consumer thread through a
//! shared pool, exchanging only store addresses over a channel.
//!
//! Producers back off by yielding when their size class is exhausted. At the end, the pool
//! telemetry collected through `nm` is printed.
//!
//! Set `RUST_LOG=static_pool=debug` to see every rejected reservation.

use std::sync::{Arc, mpsc};
use std::thread;

use static_pool::{ReleasePolicy, SharedStaticPool, StaticPool, StoreAddress};
use tracing_subscriber::EnvFilter;

const PRODUCERS: u16 = 3;
const PACKETS_PER_PRODUCER: u32 = 10_000;

/// Primary header: producer id (2 bytes), sequence counter (4 bytes), data length (2 bytes).
const HEADER_LEN: usize = 8;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let pool: SharedStaticPool = Arc::new(
        StaticPool::builder()
            .subpool(32, 8)
            .subpool(128, 4)
            .subpool(1024, 2)
            .release_policy(ReleasePolicy::ZeroPage)
            .build()
            .expect("layout is valid"),
    );

    let (tx, rx) = mpsc::channel::<StoreAddress>();

    // All threads are started up front and live until the work is done.
    let producers = (0..PRODUCERS)
        .map(|producer| {
            let pool = Arc::clone(&pool);
            let tx = tx.clone();

            thread::spawn(move || produce(&pool, &tx, producer))
        })
        .collect::<Vec<_>>();

    drop(tx);

    let consumer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || consume(&pool, &rx))
    };

    let mut retries = 0_u64;
    for producer in producers {
        retries = retries.saturating_add(producer.join().expect("producer thread panicked"));
    }

    let (packets, bytes) = consumer.join().expect("consumer thread panicked");

    println!("Consumed {packets} packets with {bytes} bytes of data");
    println!("Producers yielded {retries} times waiting for free pages");
    println!("Pool is empty again: {}", pool.is_empty());
    println!();
    println!("{}", nm::Report::collect());
}

/// Produces packets of varying size and returns how often it had to wait for a vacant page.
fn produce(pool: &StaticPool, tx: &mpsc::Sender<StoreAddress>, producer: u16) -> u64 {
    let mut retries = 0_u64;

    for sequence in 0..PACKETS_PER_PRODUCER {
        // Mostly small housekeeping packets, with an occasional larger dump.
        let data_len: u16 = match sequence % 50 {
            0 => 900,
            1..=9 => 100,
            _ => 20,
        };

        let address = loop {
            let result = pool.reserve_with(HEADER_LEN + usize::from(data_len), |page| {
                let (header, data) = page.split_at_mut(HEADER_LEN);

                header[..2].copy_from_slice(&producer.to_be_bytes());
                header[2..6].copy_from_slice(&sequence.to_be_bytes());
                header[6..].copy_from_slice(&data_len.to_be_bytes());
                data.fill(producer.to_be_bytes()[1]);
            });

            match result {
                Ok(address) => break address,
                Err(error) if error.is_transient() => {
                    retries = retries.saturating_add(1);
                    thread::yield_now();
                }
                Err(error) => panic!("producer {producer} cannot store packet: {error}"),
            }
        };

        tx.send(address).expect("consumer outlives producers");
    }

    retries
}

/// Validates and releases every packet it receives. Returns the number of packets and bytes.
fn consume(pool: &StaticPool, rx: &mpsc::Receiver<StoreAddress>) -> (u64, u64) {
    let mut packets = 0_u64;
    let mut bytes = 0_u64;

    for address in rx {
        // The guard releases the page when this iteration ends.
        let guard = pool.guard(address);
        let packet = guard.read().expect("producer handed over a live address");

        let data_len = u16::from_be_bytes([packet[6], packet[7]]);
        assert_eq!(packet.len(), HEADER_LEN + usize::from(data_len));

        packets = packets.saturating_add(1);
        bytes = bytes.saturating_add(u64::from(data_len));
    }

    (packets, bytes)
}
