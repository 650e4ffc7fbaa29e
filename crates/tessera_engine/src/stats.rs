//! Engine statistics.
//!
//! Counters are process-wide and only advance while collection is enabled.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera_engine::stats;
//!
//! stats::global().enable();
//! // Submit queries...
//! println!("{}", stats::global().dump());
//! stats::global().disable();
//! ```
//!
//! `reset` is not synchronised with in-flight recording; counters updated
//! while a reset runs may keep part of their old value.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

/// Engine statistics and metrics.
///
/// All counters are atomic and can be read while queries are in progress.
#[derive(Debug, Default)]
pub struct EngineStats {
    enabled: AtomicBool,

    // Query counters
    /// Read submissions.
    read_submits: AtomicU64,
    /// Write submissions.
    write_submits: AtomicU64,
    /// Read submissions that ended incomplete.
    incomplete_reads: AtomicU64,
    /// Queries finalized.
    finalizes: AtomicU64,

    // Cell counters
    /// Cells delivered to read buffers.
    cells_read: AtomicU64,
    /// Cells accepted from write buffers.
    cells_written: AtomicU64,

    // Bytes counters
    /// Bytes delivered to read buffers.
    bytes_read: AtomicU64,
    /// Bytes accepted from write buffers.
    bytes_written: AtomicU64,

    /// Fragments committed.
    fragments_committed: AtomicU64,

    /// Submissions that failed.
    errors: AtomicU64,
}

/// Returns the process-wide statistics.
pub fn global() -> &'static EngineStats {
    static STATS: OnceLock<EngineStats> = OnceLock::new();
    STATS.get_or_init(EngineStats::new)
}

impl EngineStats {
    /// Creates a new, disabled stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts collecting.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stops collecting. Counters keep their values.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Returns true while collection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.1.store(0, Ordering::Relaxed);
        }
    }

    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.is_enabled() {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    // === Increment methods (internal use) ===

    /// Records a read submission.
    pub(crate) fn record_read(&self, cells: u64, bytes: u64, incomplete: bool) {
        self.bump(&self.read_submits, 1);
        self.bump(&self.cells_read, cells);
        self.bump(&self.bytes_read, bytes);
        if incomplete {
            self.bump(&self.incomplete_reads, 1);
        }
    }

    /// Records a write submission.
    pub(crate) fn record_write(&self, cells: u64, bytes: u64) {
        self.bump(&self.write_submits, 1);
        self.bump(&self.cells_written, cells);
        self.bump(&self.bytes_written, bytes);
    }

    /// Records a finalize.
    pub(crate) fn record_finalize(&self) {
        self.bump(&self.finalizes, 1);
    }

    /// Records a committed fragment.
    pub(crate) fn record_fragment(&self) {
        self.bump(&self.fragments_committed, 1);
    }

    /// Records a failed submission.
    pub(crate) fn record_error(&self) {
        self.bump(&self.errors, 1);
    }

    // === Getter methods (public API) ===

    /// Returns the number of read submissions.
    pub fn read_submits(&self) -> u64 {
        self.read_submits.load(Ordering::Relaxed)
    }

    /// Returns the number of write submissions.
    pub fn write_submits(&self) -> u64 {
        self.write_submits.load(Ordering::Relaxed)
    }

    /// Returns the number of read submissions that ended incomplete.
    pub fn incomplete_reads(&self) -> u64 {
        self.incomplete_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of cells delivered to read buffers.
    pub fn cells_read(&self) -> u64 {
        self.cells_read.load(Ordering::Relaxed)
    }

    /// Returns the number of cells accepted from write buffers.
    pub fn cells_written(&self) -> u64 {
        self.cells_written.load(Ordering::Relaxed)
    }

    /// Returns the number of committed fragments.
    pub fn fragments_committed(&self) -> u64 {
        self.fragments_committed.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_submits: self.read_submits(),
            write_submits: self.write_submits(),
            incomplete_reads: self.incomplete_reads(),
            finalizes: self.finalizes.load(Ordering::Relaxed),
            cells_read: self.cells_read(),
            cells_written: self.cells_written(),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            fragments_committed: self.fragments_committed(),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Renders every counter as `name: value` lines.
    pub fn dump(&self) -> String {
        let mut out = String::from("tessera engine statistics\n");
        for (name, counter) in self.counters() {
            let _ = writeln!(out, "  {name}: {}", counter.load(Ordering::Relaxed));
        }
        out
    }

    fn counters(&self) -> [(&'static str, &AtomicU64); 10] {
        [
            ("read_submits", &self.read_submits),
            ("write_submits", &self.write_submits),
            ("incomplete_reads", &self.incomplete_reads),
            ("finalizes", &self.finalizes),
            ("cells_read", &self.cells_read),
            ("cells_written", &self.cells_written),
            ("bytes_read", &self.bytes_read),
            ("bytes_written", &self.bytes_written),
            ("fragments_committed", &self.fragments_committed),
            ("errors", &self.errors),
        ]
    }
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Read submissions.
    pub read_submits: u64,
    /// Write submissions.
    pub write_submits: u64,
    /// Read submissions that ended incomplete.
    pub incomplete_reads: u64,
    /// Queries finalized.
    pub finalizes: u64,
    /// Cells delivered to read buffers.
    pub cells_read: u64,
    /// Cells accepted from write buffers.
    pub cells_written: u64,
    /// Bytes delivered to read buffers.
    pub bytes_read: u64,
    /// Bytes accepted from write buffers.
    pub bytes_written: u64,
    /// Fragments committed.
    pub fragments_committed: u64,
    /// Failed submissions.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stats_do_not_count() {
        let stats = EngineStats::new();
        stats.record_read(10, 80, false);
        assert_eq!(stats.read_submits(), 0);
        assert_eq!(stats.cells_read(), 0);
    }

    #[test]
    fn record_operations() {
        let stats = EngineStats::new();
        stats.enable();

        stats.record_read(4, 32, true);
        stats.record_read(2, 16, false);
        stats.record_write(5, 40);
        stats.record_fragment();

        let snap = stats.snapshot();
        assert_eq!(snap.read_submits, 2);
        assert_eq!(snap.incomplete_reads, 1);
        assert_eq!(snap.cells_read, 6);
        assert_eq!(snap.bytes_read, 48);
        assert_eq!(snap.write_submits, 1);
        assert_eq!(snap.fragments_committed, 1);
    }

    #[test]
    fn reset_and_dump() {
        let stats = EngineStats::new();
        stats.enable();
        stats.record_write(3, 12);
        assert!(stats.dump().contains("cells_written: 3"));

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
        assert!(stats.is_enabled());
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(EngineStats::new());
        stats.enable();
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_read(1, 1, false);
                    s.record_write(1, 1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.read_submits(), 1000);
        assert_eq!(stats.write_submits(), 1000);
    }
}
