//! Shared helpers for chunk execution tests.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use uuid::Uuid;

use chunk_scavenger::chunk::{InMemoryChunkManager, PhysicalChunk};
use chunk_scavenger::executor::{ChunkExecutor, ChunkExecutorConfig, ScavengerLog};
use chunk_scavenger::map::MapResult;
use chunk_scavenger::record::{
    CommitLogRecord, LogRecord, PrepareFlags, PrepareLogRecord, SystemLogRecord,
};
use chunk_scavenger::redaction::Redactor;
use chunk_scavenger::state::{
    InMemoryScavengeState, LogV2MetastreamLookup, ScavengeCheckpoint, ScavengePoint,
    ScavengeStateForChunkExecutor,
};

/// Logical chunk size used by the tests.
pub const CHUNK_SIZE: u64 = 4096;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Logical "now" shared by every test log.
pub fn now() -> SystemTime {
    UNIX_EPOCH + 20_000 * DAY
}

/// Builds the records of one chunk.
pub struct LogBuilder {
    records: Vec<LogRecord>,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    fn prepare(stream: &str, event_number: i64, flags: PrepareFlags) -> PrepareLogRecord {
        PrepareLogRecord {
            log_position: 0,
            correlation_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            transaction_position: 0,
            transaction_offset: 0,
            event_stream_id: stream.to_string(),
            expected_version: event_number - 1,
            timestamp: now(),
            flags,
            event_type: "test-event".to_string(),
            data: format!("payload of {stream}#{event_number}").into_bytes(),
            metadata: b"{}".to_vec(),
        }
    }

    /// Self-committed event.
    pub fn event(mut self, stream: &str, event_number: i64) -> Self {
        self.records.push(LogRecord::Prepare(Self::prepare(
            stream,
            event_number,
            PrepareFlags::DATA | PrepareFlags::IS_COMMITTED | PrepareFlags::IS_JSON,
        )));
        self
    }

    /// Self-committed event written `age` before `now()`.
    pub fn aged_event(mut self, stream: &str, event_number: i64, age: Duration) -> Self {
        let mut record = Self::prepare(
            stream,
            event_number,
            PrepareFlags::DATA | PrepareFlags::IS_COMMITTED,
        );
        record.timestamp = now() - age;
        self.records.push(LogRecord::Prepare(record));
        self
    }

    /// Self-committed event without the data flag.
    pub fn empty_event(mut self, stream: &str, event_number: i64) -> Self {
        let mut record = Self::prepare(stream, event_number, PrepareFlags::IS_COMMITTED);
        record.data.clear();
        self.records.push(LogRecord::Prepare(record));
        self
    }

    /// Stream tombstone.
    pub fn tombstone(mut self, stream: &str, last_event_number: i64) -> Self {
        let mut record = Self::prepare(
            stream,
            last_event_number + 1,
            PrepareFlags::STREAM_DELETE | PrepareFlags::IS_COMMITTED,
        );
        record.data.clear();
        self.records.push(LogRecord::Prepare(record));
        self
    }

    /// Explicit transaction with `count` events followed by its commit.
    pub fn transaction(mut self, stream: &str, count: i32) -> Self {
        for offset in 0..count {
            let mut flags = PrepareFlags::DATA;
            if offset == 0 {
                flags = flags | PrepareFlags::TRANSACTION_BEGIN;
            }
            if offset == count - 1 {
                flags = flags | PrepareFlags::TRANSACTION_END;
            }
            let mut record = Self::prepare(stream, -1, flags);
            record.transaction_offset = offset;
            self.records.push(LogRecord::Prepare(record));
        }
        self.records.push(LogRecord::Commit(CommitLogRecord {
            log_position: 0,
            correlation_id: Uuid::new_v4(),
            transaction_position: 0,
            first_event_number: 0,
            timestamp: now(),
        }));
        self
    }

    /// System record, e.g. an epoch.
    pub fn system(mut self, kind: u8) -> Self {
        self.records.push(LogRecord::System(SystemLogRecord {
            log_position: 0,
            timestamp: now(),
            system_record_type: kind,
            data: vec![kind; 8],
        }));
        self
    }

    pub fn build(self) -> Vec<LogRecord> {
        self.records
    }
}

/// Append a sealed chunk holding `records`.
pub fn sealed(manager: &InMemoryChunkManager, records: Vec<LogRecord>) -> PhysicalChunk {
    manager.add_chunk(1, true, records)
}

/// Append the open chunk at the head of the log.
pub fn open_head(manager: &InMemoryChunkManager) -> PhysicalChunk {
    manager.add_chunk(1, false, LogBuilder::new().system(1).build())
}

/// Scavenge point at the start of `head`, rewriting every chunk with any weight.
pub fn scavenge_point_at(head: &PhysicalChunk) -> ScavengePoint {
    ScavengePoint::new(head.start_position, 7, now(), 0)
}

/// Position of the `index`th record of the chunk starting at `start_number`.
pub fn position_of(manager: &InMemoryChunkManager, start_number: u32, index: usize) -> i64 {
    manager.records(start_number).expect("chunk exists")[index].log_position()
}

/// Stream/event pairs of the prepares left in a chunk.
pub fn events(manager: &InMemoryChunkManager, start_number: u32) -> Vec<(String, i64)> {
    manager
        .records(start_number)
        .expect("chunk exists")
        .into_iter()
        .filter_map(|record| match record {
            LogRecord::Prepare(prepare) if prepare.flags.contains(PrepareFlags::STREAM_DELETE) => {
                Some((prepare.event_stream_id, i64::MAX))
            }
            LogRecord::Prepare(prepare) => {
                Some((prepare.event_stream_id, prepare.expected_version + 1))
            }
            _ => None,
        })
        .collect()
}

pub fn executor(
    manager: &InMemoryChunkManager,
    config: ChunkExecutorConfig,
) -> ChunkExecutor<LogV2MetastreamLookup, InMemoryChunkManager, Redactor> {
    ChunkExecutor::new(LogV2MetastreamLookup, manager.clone(), Redactor::new(), config)
}

pub fn config() -> ChunkExecutorConfig {
    ChunkExecutorConfig::new(CHUNK_SIZE)
}

/// Entry written to a [`RecordingLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Scavenged {
        start: u32,
        end: u32,
        space_saved: i64,
    },
    NotScavenged {
        start: u32,
        end: u32,
        reason: String,
    },
}

/// [`ScavengerLog`] that keeps every entry.
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLog {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl ScavengerLog for RecordingLog {
    fn chunks_scavenged(&self, start: u32, end: u32, _elapsed: Duration, space_saved: i64) {
        self.entries.lock().push(LogEntry::Scavenged {
            start,
            end,
            space_saved,
        });
    }

    fn chunks_not_scavenged(&self, start: u32, end: u32, _elapsed: Duration, reason: &str) {
        self.entries.lock().push(LogEntry::NotScavenged {
            start,
            end,
            reason: reason.to_string(),
        });
    }
}

/// State wrapper that remembers every persisted checkpoint.
pub struct RecordingState {
    pub inner: InMemoryScavengeState,
    pub checkpoints: Vec<ScavengeCheckpoint>,
}

impl RecordingState {
    pub fn new(inner: InMemoryScavengeState) -> Self {
        Self {
            inner,
            checkpoints: Vec::new(),
        }
    }

    /// Done chunk numbers in persistence order.
    pub fn done_numbers(&self) -> Vec<Option<u32>> {
        self.checkpoints
            .iter()
            .map(ScavengeCheckpoint::done_logical_chunk_number)
            .collect()
    }
}

impl ScavengeStateForChunkExecutor for RecordingState {
    type Worker = <InMemoryScavengeState as ScavengeStateForChunkExecutor>::Worker;

    fn set_checkpoint(&mut self, checkpoint: ScavengeCheckpoint) -> MapResult<()> {
        self.checkpoints.push(checkpoint.clone());
        self.inner.set_checkpoint(checkpoint)
    }

    fn borrow_state_for_worker(&mut self) -> MapResult<Self::Worker> {
        self.inner.borrow_state_for_worker()
    }
}
