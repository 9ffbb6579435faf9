//! Benchmark utilities.

use flashenv_core::{EnvConfig, EnvStore};
use flashenv_fal::{Fal, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable};
use rand::Rng;

/// Geometry used by the benchmarks: two 64 KiB sectors, 8-byte writes.
pub fn bench_geometry() -> FlashGeometry {
    FlashGeometry::new(128 * 1024, 64 * 1024, 8).expect("bench geometry")
}

/// Generate random value bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct keys.
pub fn generate_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key_{i:04}")).collect()
}

/// An initialized store over blank in-memory flash.
pub fn fresh_store() -> EnvStore {
    let geometry = bench_geometry();
    let table = PartitionTable::new(geometry, vec![PartitionEntry::new("env", 0, geometry.size)])
        .expect("partition table");
    let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).expect("fal");
    let mut store = EnvStore::open(&fal, EnvConfig::new()).expect("open");
    store.init().expect("init");
    store
}

/// A store holding `count` keys with `value_size`-byte values.
pub fn populated_store(count: usize, value_size: usize) -> EnvStore {
    let mut store = fresh_store();
    for key in generate_keys(count) {
        store.set(&key, random_data(value_size)).expect("set");
    }
    store
}
