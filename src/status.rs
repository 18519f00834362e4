//! Errors and run outcomes for the chunk execution stage
//!
//! `ScavengeError` carries the failure, `ExecutionStatus` is the closed
//! classification an orchestrator matches on to decide between reporting
//! success, scheduling a resume, treating the run as stopped on request, or
//! surfacing a fatal problem to an operator.

use std::fmt;
use std::io;

use crate::map::MapError;
use crate::record::RecordError;

/// Error raised while executing chunks
#[derive(Debug, thiserror::Error)]
pub enum ScavengeError {
    /// The source chunk was replaced or deleted while being read, usually
    /// because it was re-replicated. A later run can resume safely.
    #[error("chunk {chunk} is being deleted: {message}")]
    FileBeingDeleted {
        /// Name of the source chunk
        chunk: String,
        /// Description from the chunk source
        message: String,
    },
    /// Cancellation was requested.
    #[error("scavenge was cancelled")]
    Cancelled,
    /// The log is not in the shape the executor requires.
    #[error("consistency violation: {0}")]
    Consistency(String),
    /// An I/O failure while rewriting a chunk range.
    #[error("i/o error in chunks #{chunk_start}-{chunk_end}: {source}")]
    Io {
        /// First logical chunk number of the range
        chunk_start: u32,
        /// Last logical chunk number of the range
        chunk_end: u32,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// A backing map failed.
    #[error("scavenge map error: {0}")]
    Map(#[from] MapError),
    /// A backing map failed while executing a chunk range.
    #[error("scavenge map error in chunks #{chunk_start}-{chunk_end}: {source}")]
    ChunkState {
        /// First logical chunk number of the range
        chunk_start: u32,
        /// Last logical chunk number of the range
        chunk_end: u32,
        /// Underlying error
        #[source]
        source: MapError,
    },
    /// A record could not be decoded.
    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

impl ScavengeError {
    /// Create an I/O error with chunk range context
    pub fn io(chunk_start: u32, chunk_end: u32, source: io::Error) -> Self {
        Self::Io {
            chunk_start,
            chunk_end,
            source,
        }
    }

    /// Attach a chunk range to a backing map failure. Other errors are
    /// returned unchanged.
    pub fn in_chunks(self, chunk_start: u32, chunk_end: u32) -> Self {
        match self {
            ScavengeError::Map(source) => ScavengeError::ChunkState {
                chunk_start,
                chunk_end,
                source,
            },
            other => other,
        }
    }

    /// Classify this error
    pub const fn status(&self) -> ExecutionStatus {
        match self {
            ScavengeError::FileBeingDeleted { .. } => ExecutionStatus::RetryableConflict,
            ScavengeError::Cancelled => ExecutionStatus::Cancelled,
            ScavengeError::Consistency(_)
            | ScavengeError::Io { .. }
            | ScavengeError::Map(_)
            | ScavengeError::ChunkState { .. }
            | ScavengeError::Record(_) => ExecutionStatus::Fatal,
        }
    }

    /// Check if the error is a cancellation
    #[inline]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, ScavengeError::Cancelled)
    }
}

/// Outcome of a chunk execution run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ExecutionStatus {
    /// Every chunk up to the scavenge point was processed
    #[default]
    Completed = 0,
    /// A source chunk changed underneath the run; resume later
    RetryableConflict = 1,
    /// The run stopped because cancellation was requested
    Cancelled = 2,
    /// The run failed and must be looked at
    Fatal = 3,
}

impl ExecutionStatus {
    /// Classify the result of a run
    pub fn of<T>(result: &Result<T, ScavengeError>) -> Self {
        match result {
            Ok(_) => ExecutionStatus::Completed,
            Err(err) => err.status(),
        }
    }

    /// Check if the run completed
    #[inline]
    pub const fn is_completed(&self) -> bool {
        matches!(self, ExecutionStatus::Completed)
    }

    /// Check if a later resume is expected to succeed
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::RetryableConflict | ExecutionStatus::Cancelled
        )
    }

    /// Check if the status indicates an error
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::RetryableConflict | ExecutionStatus::Fatal
        )
    }

    /// Get the status as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::RetryableConflict => "RetryableConflict",
            ExecutionStatus::Cancelled => "Cancelled",
            ExecutionStatus::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
