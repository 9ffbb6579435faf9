//! Environment statistics and space usage.
//!
//! Counters are atomic so a shared store can report them without taking
//! the store lock for long.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = store.stats();
//! println!("compactions: {}", stats.compactions);
//! println!("bytes programmed: {}", stats.bytes_programmed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live operation counters for one store.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    noop_sets: AtomicU64,
    compactions: AtomicU64,
    bytes_programmed: AtomicU64,
    failed_obsolete_marks: AtomicU64,
    torn_tails: AtomicU64,
    stale_sectors_erased: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_noop_set(&self) {
        self.noop_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_programmed(&self, bytes: usize) {
        self.bytes_programmed
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_obsolete_mark(&self) {
        self.failed_obsolete_marks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_torn_tail(&self) {
        self.torn_tails.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_erase(&self) {
        self.stale_sectors_erased.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub(crate) fn snapshot(&self) -> EnvStats {
        EnvStats {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            noop_sets: self.noop_sets.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            bytes_programmed: self.bytes_programmed.load(Ordering::Relaxed),
            failed_obsolete_marks: self.failed_obsolete_marks.load(Ordering::Relaxed),
            torn_tails: self.torn_tails.load(Ordering::Relaxed),
            stale_sectors_erased: self.stale_sectors_erased.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time operation counters.
///
/// Counters start at zero when the store is opened and are not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvStats {
    /// Successful `get` calls.
    pub gets: u64,
    /// `set` calls that programmed a record.
    pub sets: u64,
    /// Successful `delete` calls.
    pub deletes: u64,
    /// `set` calls skipped because the value was already stored.
    pub noop_sets: u64,
    /// Completed compactions, explicit or automatic.
    pub compactions: u64,
    /// Bytes of record and header data programmed.
    pub bytes_programmed: u64,
    /// OBSOLETE marks that failed and were left for compaction.
    pub failed_obsolete_marks: u64,
    /// Unreadable sector tails found while scanning.
    pub torn_tails: u64,
    /// Standby sectors erased because they held leftovers.
    pub stale_sectors_erased: u64,
}

/// Space usage of the active sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvUsage {
    /// Size of each log sector.
    pub sector_size: u32,
    /// Size of the sector header.
    pub header_size: u32,
    /// Index (0 or 1) of the active sector.
    pub active_sector: usize,
    /// Bytes between the sector start and the write cursor.
    pub used_bytes: u32,
    /// Bytes between the write cursor and the sector end.
    pub free_bytes: u32,
    /// Bytes held by live records.
    pub live_bytes: u32,
    /// Number of live keys, including reserved ones.
    pub live_keys: usize,
}

impl EnvUsage {
    /// Bytes a record may occupy in an otherwise empty sector.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.sector_size - self.header_size
    }

    /// Bytes held by superseded or deleted records.
    #[must_use]
    pub const fn dead_bytes(&self) -> u32 {
        self.used_bytes
            .saturating_sub(self.header_size)
            .saturating_sub(self.live_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StatsCounters::default().snapshot();
        assert_eq!(stats, EnvStats::default());
    }

    #[test]
    fn record_operations() {
        let counters = StatsCounters::default();
        counters.record_get();
        counters.record_get();
        counters.record_set();
        counters.record_programmed(128);
        counters.record_programmed(64);
        counters.record_compaction();

        let stats = counters.snapshot();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.bytes_programmed, 192);
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.deletes, 0);
    }

    #[test]
    fn usage_derived_values() {
        let usage = EnvUsage {
            sector_size: 4096,
            header_size: 128,
            active_sector: 1,
            used_bytes: 1152,
            free_bytes: 2944,
            live_bytes: 256,
            live_keys: 2,
        };
        assert_eq!(usage.capacity(), 3968);
        assert_eq!(usage.dead_bytes(), 768);
    }
}
