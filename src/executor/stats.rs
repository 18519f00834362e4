//! Run statistics and the operator-facing scavenge log.

use std::ops::AddAssign;
use std::time::Duration;

use crate::state::ScavengeCheckpoint;

/// Counters for the chunks one worker slot executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    /// Physical chunks rewritten
    pub chunks_executed: u64,
    /// Physical chunks left untouched
    pub chunks_skipped: u64,
    /// Records copied to the new chunk (redacted ones included)
    pub records_kept: u64,
    /// Records dropped
    pub records_discarded: u64,
    /// Records whose payload was redacted
    pub records_redacted: u64,
    /// Size of the source chunks minus the size of their replacements
    pub space_saved: i64,
}

impl ChunkStats {
    /// Total records read from executed chunks
    pub fn records_scanned(&self) -> u64 {
        self.records_kept + self.records_discarded
    }

    /// Fraction of scanned records that were discarded
    pub fn discard_ratio(&self) -> f64 {
        let scanned = self.records_scanned();
        if scanned == 0 {
            return 0.0;
        }
        self.records_discarded as f64 / scanned as f64
    }
}

impl AddAssign for ChunkStats {
    fn add_assign(&mut self, other: Self) {
        self.chunks_executed += other.chunks_executed;
        self.chunks_skipped += other.chunks_skipped;
        self.records_kept += other.records_kept;
        self.records_discarded += other.records_discarded;
        self.records_redacted += other.records_redacted;
        self.space_saved += other.space_saved;
    }
}

/// Result of a chunk execution run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    /// Statistics aggregated over every slot
    pub stats: ChunkStats,
    /// Last checkpoint persisted
    pub checkpoint: ScavengeCheckpoint,
    /// Number of worker slots used
    pub threads_used: usize,
    /// Wall time of the run
    pub elapsed: Duration,
}

/// Operator-facing log of a scavenge
///
/// Passed explicitly to each run; it receives one entry per executed chunk.
pub trait ScavengerLog: Send + Sync {
    /// Chunks `start..=end` were rewritten
    fn chunks_scavenged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64);

    /// Chunks `start..=end` could not be rewritten
    fn chunks_not_scavenged(&self, start: u32, end: u32, elapsed: Duration, reason: &str);
}

/// [`ScavengerLog`] that writes to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingScavengerLog;

impl ScavengerLog for TracingScavengerLog {
    fn chunks_scavenged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64) {
        tracing::info!(
            chunk_start = start,
            chunk_end = end,
            elapsed_ms = elapsed.as_millis() as u64,
            space_saved,
            "chunks scavenged"
        );
    }

    fn chunks_not_scavenged(&self, start: u32, end: u32, elapsed: Duration, reason: &str) {
        tracing::warn!(
            chunk_start = start,
            chunk_end = end,
            elapsed_ms = elapsed.as_millis() as u64,
            reason,
            "chunks not scavenged"
        );
    }
}
