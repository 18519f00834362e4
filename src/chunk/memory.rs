//! In-memory chunk manager.
//!
//! Chunks hold encoded records framed like on disk: a `u32` length before and
//! after each record, behind a fixed-size header. Replacing a chunk swaps its
//! record list and bumps the version in its file name.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::record::{LogRecord, RecordForExecutor};
use crate::status::ScavengeError;

use super::{ChunkManager, ChunkReader, ChunkWriter, CompletedChunk, PhysicalChunk};

/// Size of the chunk header in bytes
pub const CHUNK_HEADER_SIZE: u64 = 128;
/// Size of the chunk footer in bytes
pub const CHUNK_FOOTER_SIZE: u64 = 128;
const FRAME_OVERHEAD: u64 = 8;

/// Read failure injected into a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFault {
    /// The chunk is replaced underneath the reader after `after_records`
    FileBeingDeleted {
        /// Records read successfully before the failure
        after_records: usize,
    },
    /// The read fails with an I/O error after `after_records`
    Io {
        /// Records read successfully before the failure
        after_records: usize,
    },
}

impl ChunkFault {
    fn after_records(&self) -> usize {
        match self {
            ChunkFault::FileBeingDeleted { after_records } | ChunkFault::Io { after_records } => {
                *after_records
            }
        }
    }
}

/// A replacement chunk that was given up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedChunk {
    /// Temporary file name
    pub file_name: String,
    /// First logical chunk number of the source
    pub source_start_number: u32,
    /// Whether the partial file was deleted right away
    pub deleted: bool,
    /// Records written before the abort
    pub records_written: usize,
}

#[derive(Debug)]
struct StoredChunk {
    descriptor: PhysicalChunk,
    frames: Arc<Vec<Vec<u8>>>,
    version: u32,
}

#[derive(Debug, Default)]
struct ChunkStore {
    chunks: Vec<StoredChunk>,
    faults: HashMap<u32, ChunkFault>,
    aborted: Vec<AbortedChunk>,
    completed: usize,
}

impl ChunkStore {
    fn find(&self, start_number: u32) -> Option<&StoredChunk> {
        self.chunks
            .iter()
            .find(|chunk| chunk.descriptor.start_number == start_number)
    }
}

fn chunk_file_name(start_number: u32, version: u32) -> String {
    format!("chunk-{start_number:06}.{version:06}")
}

fn file_size(frames: &[Vec<u8>]) -> u64 {
    CHUNK_HEADER_SIZE
        + CHUNK_FOOTER_SIZE
        + frames
            .iter()
            .map(|frame| frame.len() as u64 + FRAME_OVERHEAD)
            .sum::<u64>()
}

/// Chunk manager keeping every chunk in memory
///
/// Cloning yields another handle to the same chunks.
#[derive(Debug, Clone)]
pub struct InMemoryChunkManager {
    chunk_size: u64,
    store: Arc<Mutex<ChunkStore>>,
}

impl InMemoryChunkManager {
    /// Create an empty log with logical chunks of `chunk_size` bytes
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            store: Arc::new(Mutex::new(ChunkStore::default())),
        }
    }

    /// Size of a logical chunk
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Append a physical chunk covering `logical_chunks` logical chunks
    ///
    /// Records are laid out in order from the chunk's start position and
    /// their log positions are set accordingly. Returns the descriptor.
    pub fn add_chunk(
        &self,
        logical_chunks: u32,
        read_only: bool,
        records: Vec<LogRecord>,
    ) -> PhysicalChunk {
        let mut store = self.store.lock();
        let start_number = store
            .chunks
            .last()
            .map_or(0, |chunk| chunk.descriptor.end_number + 1);
        let end_number = start_number + logical_chunks.max(1) - 1;
        let start_position = start_number as i64 * self.chunk_size as i64;
        let end_position = (end_number as i64 + 1) * self.chunk_size as i64;

        let mut position = start_position;
        let mut frames = Vec::with_capacity(records.len());
        for mut record in records {
            set_log_position(&mut record, position);
            let frame = record.encode();
            position += frame.len() as i64 + FRAME_OVERHEAD as i64;
            frames.push(frame);
        }

        let descriptor = PhysicalChunk {
            start_number,
            end_number,
            start_position,
            end_position,
            name: chunk_file_name(start_number, 0),
            file_size: file_size(&frames),
            is_read_only: read_only,
        };
        store.chunks.push(StoredChunk {
            descriptor: descriptor.clone(),
            frames: Arc::new(frames),
            version: 0,
        });
        descriptor
    }

    /// Fail reads of the chunk starting at `start_number`
    pub fn inject_fault(&self, start_number: u32, fault: ChunkFault) {
        self.store.lock().faults.insert(start_number, fault);
    }

    /// Remove an injected fault
    pub fn clear_fault(&self, start_number: u32) {
        self.store.lock().faults.remove(&start_number);
    }

    /// Descriptors of every physical chunk, ascending
    pub fn physical_chunks(&self) -> Vec<PhysicalChunk> {
        self.store
            .lock()
            .chunks
            .iter()
            .map(|chunk| chunk.descriptor.clone())
            .collect()
    }

    /// Decoded records of the chunk starting at `start_number`
    pub fn records(&self, start_number: u32) -> Option<Vec<LogRecord>> {
        let frames = Arc::clone(&self.store.lock().find(start_number)?.frames);
        frames
            .iter()
            .map(|frame| LogRecord::decode(frame).ok())
            .collect()
    }

    /// Replacement chunks given up on, in abort order
    pub fn aborted(&self) -> Vec<AbortedChunk> {
        self.store.lock().aborted.clone()
    }

    /// Number of completed replacements
    pub fn completed(&self) -> usize {
        self.store.lock().completed
    }
}

fn set_log_position(record: &mut LogRecord, position: i64) {
    match record {
        LogRecord::Prepare(prepare) => {
            if prepare.transaction_offset == 0 {
                prepare.transaction_position = position;
            }
            prepare.log_position = position;
        }
        LogRecord::Commit(commit) => commit.log_position = position,
        LogRecord::System(system) => system.log_position = position,
    }
}

impl ChunkManager for InMemoryChunkManager {
    type Reader = InMemoryChunkReader;
    type Writer = InMemoryChunkWriter;

    fn chunk_reader_for(&self, position: i64) -> Result<Self::Reader, ScavengeError> {
        let store = self.store.lock();
        let chunk = store
            .chunks
            .iter()
            .find(|chunk| chunk.descriptor.contains_position(position))
            .ok_or_else(|| ScavengeError::Consistency(format!("no chunk contains position {position}")))?;

        Ok(InMemoryChunkReader {
            descriptor: chunk.descriptor.clone(),
            frames: Arc::clone(&chunk.frames),
            fault: store.faults.get(&chunk.descriptor.start_number).copied(),
        })
    }

    fn create_chunk_writer(&self, source: &Self::Reader) -> Result<Self::Writer, ScavengeError> {
        Ok(InMemoryChunkWriter {
            store: Arc::clone(&self.store),
            source: source.descriptor.clone(),
            file_name: format!("{}.scavenge.tmp", Uuid::new_v4()),
            frames: Vec::new(),
            finished: false,
        })
    }
}

/// Reader over an in-memory chunk
#[derive(Debug)]
pub struct InMemoryChunkReader {
    descriptor: PhysicalChunk,
    frames: Arc<Vec<Vec<u8>>>,
    fault: Option<ChunkFault>,
}

fn fault_error(chunk: &PhysicalChunk, fault: ChunkFault) -> ScavengeError {
    match fault {
        ChunkFault::FileBeingDeleted { .. } => ScavengeError::FileBeingDeleted {
            chunk: chunk.name.clone(),
            message: "chunk was replaced while reading".to_string(),
        },
        ChunkFault::Io { .. } => ScavengeError::io(
            chunk.start_number,
            chunk.end_number,
            io::Error::new(io::ErrorKind::Other, "injected read failure"),
        ),
    }
}

impl ChunkReader for InMemoryChunkReader {
    fn chunk(&self) -> &PhysicalChunk {
        &self.descriptor
    }

    fn read_records(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<RecordForExecutor, ScavengeError>> + '_> {
        let fault = self.fault;
        let descriptor = &self.descriptor;
        let mut failed = false;
        Box::new(
            self.frames
                .iter()
                .enumerate()
                .map_while(move |(index, frame)| {
                    if failed {
                        return None;
                    }
                    if let Some(fault) = fault.filter(|f| f.after_records() == index) {
                        failed = true;
                        return Some(Err(fault_error(descriptor, fault)));
                    }
                    Some(
                        LogRecord::decode(frame)
                            .map(RecordForExecutor::from_log_record)
                            .map_err(ScavengeError::from),
                    )
                }),
        )
    }
}

/// Writer of an in-memory replacement chunk
#[derive(Debug)]
pub struct InMemoryChunkWriter {
    store: Arc<Mutex<ChunkStore>>,
    source: PhysicalChunk,
    file_name: String,
    frames: Vec<Vec<u8>>,
    finished: bool,
}

impl ChunkWriter for InMemoryChunkWriter {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn write_record(&mut self, record: &RecordForExecutor) -> Result<(), ScavengeError> {
        let position = record.log_position();
        if !self.source.contains_position(position) {
            return Err(ScavengeError::Consistency(format!(
                "record at {position} is outside of {}",
                self.source.name
            )));
        }
        self.frames.push(record.to_log_record().encode());
        Ok(())
    }

    fn complete(&mut self) -> Result<CompletedChunk, ScavengeError> {
        let mut store = self.store.lock();
        let frames = std::mem::take(&mut self.frames);
        let size = file_size(&frames);

        let chunk = store
            .chunks
            .iter_mut()
            .find(|chunk| chunk.descriptor.start_number == self.source.start_number)
            .ok_or_else(|| ScavengeError::FileBeingDeleted {
                chunk: self.source.name.clone(),
                message: "source chunk no longer exists".to_string(),
            })?;

        chunk.version += 1;
        chunk.frames = Arc::new(frames);
        chunk.descriptor.name = chunk_file_name(chunk.descriptor.start_number, chunk.version);
        chunk.descriptor.file_size = size;
        let completed = CompletedChunk {
            file_name: chunk.descriptor.name.clone(),
            file_size: size,
        };
        store.completed += 1;
        self.finished = true;
        Ok(completed)
    }

    fn abort(&mut self, delete_immediately: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.store.lock().aborted.push(AbortedChunk {
            file_name: self.file_name.clone(),
            source_start_number: self.source.start_number,
            deleted: delete_immediately,
            records_written: self.frames.len(),
        });
        if delete_immediately {
            self.frames.clear();
        }
    }
}
