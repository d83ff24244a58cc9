//! Builds a pool from a TOML layout and prints the occupancy of each subpool.

use static_pool::{StaticPool, StaticPoolConfig};

const LAYOUT: &str = r#"
release_policy = "zero_page"

# Housekeeping telemetry.
[[subpools]]
page_size = 32
slot_count = 64

# Event reports.
[[subpools]]
page_size = 256
slot_count = 16

# Memory dumps.
[[subpools]]
page_size = 4096
slot_count = 2
"#;

fn main() {
    let config = StaticPoolConfig::from_toml_str(LAYOUT).expect("layout is valid");
    let pool = StaticPool::from_config(&config).expect("layout is valid");

    println!(
        "Pool with {} subpools holds up to {} payloads in {} bytes",
        pool.subpool_count(),
        pool.capacity(),
        pool.footprint_bytes()
    );

    for len in [12, 30, 31, 200, 3000] {
        let address = pool.reserve(&vec![0xEE; len]).expect("pool has room");
        println!("{len:>5} byte payload stored at {address}");
    }

    println!();
    println!("{:>7} {:>9} {:>9} {:>8}", "subpool", "page size", "occupied", "vacant");

    for stats in pool.subpool_stats() {
        println!(
            "{:>7} {:>9} {:>9} {:>8}",
            stats.index(),
            stats.page_size(),
            stats.occupied(),
            stats.vacant()
        );
    }
}
