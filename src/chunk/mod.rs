//! Chunk source and sink used by the executor
//!
//! The log is a sequence of logical chunks of a fixed size. Several logical
//! chunks may have been merged into one physical chunk file. The executor
//! walks physical chunks in ascending order, reads each through a
//! [`ChunkReader`] and writes the survivors into a replacement chunk through
//! a [`ChunkWriter`]. A completed replacement takes the place of the source
//! atomically; readers see either the old file or the new one.

mod memory;

use crate::record::RecordForExecutor;
use crate::status::ScavengeError;

pub use memory::{AbortedChunk, ChunkFault, InMemoryChunkManager, InMemoryChunkReader, InMemoryChunkWriter};

/// Descriptor of a physical chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalChunk {
    /// First logical chunk number
    pub start_number: u32,
    /// Last logical chunk number (inclusive)
    pub end_number: u32,
    /// First log position
    pub start_position: i64,
    /// Log position after the chunk (exclusive)
    pub end_position: i64,
    /// File name
    pub name: String,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Sealed chunks are read-only; only the last chunk of the log is writable
    pub is_read_only: bool,
}

impl PhysicalChunk {
    /// Number of logical chunks covered
    pub fn logical_chunk_count(&self) -> u32 {
        self.end_number - self.start_number + 1
    }

    /// Check if `position` falls in this chunk
    pub fn contains_position(&self, position: i64) -> bool {
        self.start_position <= position && position < self.end_position
    }
}

/// Replacement chunk produced by [`ChunkWriter::complete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedChunk {
    /// File name of the new chunk
    pub file_name: String,
    /// Size of the new chunk in bytes
    pub file_size: u64,
}

/// Source of physical chunks and their replacements
pub trait ChunkManager: Send + Sync {
    /// Reader over one physical chunk
    type Reader: ChunkReader;
    /// Writer of a replacement chunk
    type Writer: ChunkWriter;

    /// Reader for the physical chunk containing `position`
    fn chunk_reader_for(&self, position: i64) -> Result<Self::Reader, ScavengeError>;

    /// Create a writer for the replacement of `source`
    fn create_chunk_writer(&self, source: &Self::Reader) -> Result<Self::Writer, ScavengeError>;
}

/// Reads the records of one physical chunk
pub trait ChunkReader: Send {
    /// Descriptor of the chunk
    fn chunk(&self) -> &PhysicalChunk;

    /// Records in log order. Each record is a new value owned by the caller.
    fn read_records(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<RecordForExecutor, ScavengeError>> + '_>;
}

/// Writes a replacement chunk
pub trait ChunkWriter: Send {
    /// Temporary file name of the chunk being written
    fn file_name(&self) -> &str;

    /// Append a record
    fn write_record(&mut self, record: &RecordForExecutor) -> Result<(), ScavengeError>;

    /// Finalize the chunk and swap it in for the source
    fn complete(&mut self) -> Result<CompletedChunk, ScavengeError>;

    /// Give up on the chunk. The partial file is deleted right away if
    /// `delete_immediately` is set, otherwise kept for inspection.
    fn abort(&mut self, delete_immediately: bool);
}
