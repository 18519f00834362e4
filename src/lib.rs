//! chunk-scavenger - the chunk execution stage of a log scavenger
//!
//! An append-only transaction log is stored as a sequence of fixed-capacity
//! chunk files. Once sealed, a chunk is immutable. Scavenging rewrites sealed
//! chunks to drop records that are no longer needed (max-age, max-count,
//! hard-deleted streams) and to irreversibly redact the payload of targeted
//! records, while readers keep using the old chunks until each rewrite is
//! committed atomically.
//!
//! This crate provides:
//! - **Collision-aware maps**: per-stream metadata keyed by a 64-bit stream
//!   hash, falling back to the explicit stream name only for colliding names
//! - **Redaction**: the persisted request set, the sorted target checker and
//!   the in-place record redactor
//! - **Chunk execution**: the parallel, checkpointed stage that decides
//!   keep/discard/redact per record and writes replacement chunks
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chunk_scavenger::prelude::*;
//!
//! let executor = ChunkExecutor::new(
//!     LogV2MetastreamLookup,
//!     chunk_manager,
//!     Redactor::new(),
//!     ChunkExecutorConfig::new(chunk_size).with_threads(4),
//! );
//!
//! let summary = executor.execute(scavenge_point, &mut state, &TracingScavengerLog, &token)?;
//! ```

#![warn(missing_docs)]

pub mod cancel;
pub mod chunk;
pub mod collision;
pub mod config;
pub mod executor;
pub mod hash;
pub mod map;
pub mod parallel;
pub mod record;
pub mod redaction;
pub mod state;
pub mod status;

// Re-exports for convenience
pub use collision::{CollisionMap, StreamHandle};
pub use status::{ExecutionStatus, ScavengeError};

/// Constants used throughout the library
pub mod constants {
    /// Default size of a logical chunk in bytes (256 MB)
    pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

    /// Default number of records processed between cancellation checks
    pub const DEFAULT_CANCELLATION_CHECK_PERIOD: usize = 1024;

    /// Metadata stream prefix used by the v2 log format
    pub const METASTREAM_PREFIX: &str = "$$";
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::cancel::{CancellationToken, Throttle};
    pub use crate::chunk::{ChunkManager, ChunkReader, ChunkWriter, PhysicalChunk};
    pub use crate::collision::{CollisionMap, StreamHandle};
    pub use crate::executor::{
        ChunkExecutor, ChunkExecutorConfig, ExecutionSummary, ScavengerLog, TracingScavengerLog,
    };
    pub use crate::redaction::{RedactionRequestMap, RedactionTargetChecker, Redactor};
    pub use crate::state::{
        DiscardPoint, InMemoryScavengeState, LogV2MetastreamLookup, ScavengeCheckpoint,
        ScavengePoint,
    };
    pub use crate::status::{ExecutionStatus, ScavengeError};
}
