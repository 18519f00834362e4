//! Scavenge state as seen by the chunk executor
//!
//! The accumulation and calculation stages fill the state with per-chunk
//! weights, per-stream execution info and metastream data, and redaction
//! requests. The executor reads it through two traits:
//!
//! - [`ScavengeStateForChunkExecutor`]: run-level access, persisting the
//!   checkpoint and lending one worker view per slot
//! - [`ScavengeStateForChunkExecutorWorker`]: what a worker needs while it
//!   rewrites one physical chunk
//!
//! Workers only touch the chunk-number range they were assigned, so views
//! do not coordinate with each other beyond what the store itself provides.

mod memory;
mod metastream;

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::map::MapResult;

pub use memory::{InMemoryScavengeState, InMemoryStateWorker};
pub use metastream::{LogV2MetastreamLookup, MetastreamLookup};

/// Marker of one scavenge run
///
/// Records before `position` are fixed for the run. Chunks whose weight
/// exceeds `threshold` are rewritten. `effective_now` is the time max-age is
/// measured against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScavengePoint {
    /// Log position of the scavenge point record
    pub position: i64,
    /// Event number of the scavenge point in its stream
    pub event_number: i64,
    /// Logical current time of the run
    pub effective_now: SystemTime,
    /// Weight above which a chunk is rewritten
    pub threshold: i32,
}

impl ScavengePoint {
    /// Create a scavenge point
    pub fn new(position: i64, event_number: i64, effective_now: SystemTime, threshold: i32) -> Self {
        Self {
            position,
            event_number,
            effective_now,
            threshold,
        }
    }

    /// Display name, e.g. `SP-3`
    pub fn name(&self) -> String {
        format!("SP-{}", self.event_number)
    }
}

impl fmt::Display for ScavengePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (position {}, threshold {})",
            self.name(),
            self.position,
            self.threshold
        )
    }
}

/// Persisted progress of a scavenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ScavengeCheckpoint {
    /// The chunk execution stage is running
    ExecutingChunks {
        /// Run this checkpoint belongs to
        scavenge_point: ScavengePoint,
        /// Last logical chunk fully executed, `None` if none yet
        done_logical_chunk_number: Option<u32>,
    },
}

impl ScavengeCheckpoint {
    /// Checkpoint for the chunk execution stage
    pub fn executing_chunks(scavenge_point: ScavengePoint, done: Option<u32>) -> Self {
        ScavengeCheckpoint::ExecutingChunks {
            scavenge_point,
            done_logical_chunk_number: done,
        }
    }

    /// Run this checkpoint belongs to
    pub fn scavenge_point(&self) -> &ScavengePoint {
        match self {
            ScavengeCheckpoint::ExecutingChunks { scavenge_point, .. } => scavenge_point,
        }
    }

    /// Last logical chunk done during chunk execution
    pub fn done_logical_chunk_number(&self) -> Option<u32> {
        match self {
            ScavengeCheckpoint::ExecutingChunks {
                done_logical_chunk_number,
                ..
            } => *done_logical_chunk_number,
        }
    }
}

impl fmt::Display for ScavengeCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScavengeCheckpoint::ExecutingChunks {
                scavenge_point,
                done_logical_chunk_number,
            } => match done_logical_chunk_number {
                Some(done) => write!(f, "{}: Executing chunks, done {done}", scavenge_point.name()),
                None => write!(f, "{}: Executing chunks, none done", scavenge_point.name()),
            },
        }
    }
}

/// Event numbers below the point are discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DiscardPoint(i64);

impl DiscardPoint {
    /// Discard nothing
    pub const KEEP_ALL: Self = Self(0);

    /// Discard nothing
    pub const fn keep_all() -> Self {
        Self::KEEP_ALL
    }

    /// Discard every event before `event_number`
    pub const fn discard_before(event_number: i64) -> Self {
        Self(event_number)
    }

    /// Discard every event up to and including `event_number`
    pub const fn discard_including(event_number: i64) -> Self {
        Self(event_number.saturating_add(1))
    }

    /// First event number that is kept
    pub const fn first_event_number_to_keep(&self) -> i64 {
        self.0
    }

    /// Check if the event should be discarded
    #[inline]
    pub const fn should_discard(&self, event_number: i64) -> bool {
        event_number < self.0
    }

    /// The point that discards whatever either point discards
    pub fn or(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Execution details of an original stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkExecutionInfo {
    /// Stream has been hard deleted
    pub is_tombstoned: bool,
    /// Events below this are definitely discarded
    pub discard_point: DiscardPoint,
    /// Events below this are discarded if older than `max_age`
    pub maybe_discard_point: DiscardPoint,
    /// Max age of the stream
    pub max_age: Option<Duration>,
}

impl ChunkExecutionInfo {
    /// Create execution info
    pub fn new(
        is_tombstoned: bool,
        discard_point: DiscardPoint,
        maybe_discard_point: DiscardPoint,
        max_age: Option<Duration>,
    ) -> Self {
        Self {
            is_tombstoned,
            discard_point,
            maybe_discard_point,
            max_age,
        }
    }
}

/// Execution details of a metastream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetastreamData {
    /// The original stream has been hard deleted
    pub is_tombstoned: bool,
    /// Metadata events below this are discarded
    pub discard_point: DiscardPoint,
}

impl MetastreamData {
    /// No data recorded
    pub const EMPTY: Self = Self {
        is_tombstoned: false,
        discard_point: DiscardPoint::KEEP_ALL,
    };

    /// Create metastream data
    pub fn new(is_tombstoned: bool, discard_point: DiscardPoint) -> Self {
        Self {
            is_tombstoned,
            discard_point,
        }
    }
}

/// Run-level access to the scavenge state
pub trait ScavengeStateForChunkExecutor {
    /// Per-slot view lent to a worker
    type Worker: ScavengeStateForChunkExecutorWorker;

    /// Persist the checkpoint
    fn set_checkpoint(&mut self, checkpoint: ScavengeCheckpoint) -> MapResult<()>;

    /// Lend a view to one worker. The view is released when dropped.
    fn borrow_state_for_worker(&mut self) -> MapResult<Self::Worker>;
}

/// The state one worker reads while executing a physical chunk
pub trait ScavengeStateForChunkExecutorWorker: Send {
    /// Sum of the weights of logical chunks `start..=end`
    fn sum_chunk_weights(&self, start: u32, end: u32) -> MapResult<f32>;

    /// Clear the weights of logical chunks `start..=end`
    fn reset_chunk_weights(&mut self, start: u32, end: u32) -> MapResult<()>;

    /// Execution info of an original stream
    fn try_get_chunk_execution_info(&self, stream_id: &str)
        -> MapResult<Option<ChunkExecutionInfo>>;

    /// Data of a metastream
    fn try_get_metastream_data(&self, stream_id: &str) -> MapResult<Option<MetastreamData>>;

    /// Redaction targets in `[start, end_exclusive)`, ascending
    fn redaction_targets(&self, start: i64, end_exclusive: i64) -> MapResult<Vec<i64>>;
}
