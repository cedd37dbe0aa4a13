// connpool - thread-safe connection pool
//
// This is just a binary wrapper - the actual library is in lib.rs

use std::time::Duration;

use connpool::{Pool, PoolConfig};

fn main() {
    println!("=== connpool demo ===");

    let config = PoolConfig::new()
        .with_size(3)
        .with_checkout_timeout(Duration::from_secs(1));
    let pool = Pool::with_connector(config, || Ok(String::from("session"))).unwrap();

    let length = pool.with(|conn| conn.len()).unwrap();
    println!("  Checked out a connection of {length} bytes");
    println!("  Available after return: {}", pool.available_count());

    pool.shutdown().unwrap();
    println!("  Pool shut down");
}
