//! Log records as seen by the chunk executor.
//!
//! The log stores three kinds of records: prepares (which carry event data),
//! commits and system records. Only prepares are ever discarded or redacted;
//! everything else is copied verbatim into the scavenged chunk.
//!
//! All integers are little-endian. Strings and byte fields are prefixed by
//! a `u32` length. Layout of a prepare:
//!
//! ```text
//! kind:u8 version:u8 flags:u16 log_position:i64 transaction_position:i64
//! transaction_offset:i32 expected_version:i64 timestamp_us:i64
//! correlation_id:[16] event_id:[16] stream_id:str event_type:str data:bytes metadata:bytes
//! ```

use std::fmt;
use std::ops::BitOr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Errors related to record decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The buffer ended before the record did
    #[error("record buffer too small")]
    BufferTooSmall,
    /// The record kind byte is not known
    #[error("unknown record kind {0}")]
    UnknownRecordKind(u8),
    /// The record version is not supported
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
    /// A string field is not valid UTF-8
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    /// Trailing bytes after the record
    #[error("record length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length consumed by decoding
        expected: usize,
        /// Length of the buffer
        actual: usize,
    },
}

/// Flags carried by a prepare record
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrepareFlags(u16);

impl PrepareFlags {
    /// No flags
    pub const NONE: Self = Self(0);
    /// The record carries event data
    pub const DATA: Self = Self(0x0001);
    /// First prepare of a transaction
    pub const TRANSACTION_BEGIN: Self = Self(0x0002);
    /// Last prepare of a transaction
    pub const TRANSACTION_END: Self = Self(0x0004);
    /// Stream tombstone (hard delete)
    pub const STREAM_DELETE: Self = Self(0x0008);
    /// Committed by itself, no separate commit record
    pub const IS_COMMITTED: Self = Self(0x0020);
    /// Data is JSON
    pub const IS_JSON: Self = Self(0x0100);
    /// Data has been redacted
    pub const IS_REDACTED: Self = Self(0x0200);

    /// Create flags from raw bits
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Check if all of `other` is set
    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if any of `other` is set
    #[inline]
    pub const fn has_any_of(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for PrepareFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PrepareFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PrepareFlags, &str); 7] = [
            (PrepareFlags::DATA, "Data"),
            (PrepareFlags::TRANSACTION_BEGIN, "TransactionBegin"),
            (PrepareFlags::TRANSACTION_END, "TransactionEnd"),
            (PrepareFlags::STREAM_DELETE, "StreamDelete"),
            (PrepareFlags::IS_COMMITTED, "IsCommitted"),
            (PrepareFlags::IS_JSON, "IsJson"),
            (PrepareFlags::IS_REDACTED, "IsRedacted"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "PrepareFlags({:#06x}: {})", self.0, names.join(" | "))
    }
}

const KIND_PREPARE: u8 = 0;
const KIND_COMMIT: u8 = 1;
const KIND_SYSTEM: u8 = 2;
const RECORD_VERSION: u8 = 1;

/// Event number recorded for stream tombstones
pub const DELETED_STREAM_EVENT_NUMBER: i64 = i64::MAX;

/// A prepare record: one event (or a transaction member) in a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareLogRecord {
    /// Position of the record in the log
    pub log_position: i64,
    /// Correlation id of the write
    pub correlation_id: Uuid,
    /// Id of the event
    pub event_id: Uuid,
    /// Position of the first prepare of the transaction
    pub transaction_position: i64,
    /// Offset of this prepare within its transaction
    pub transaction_offset: i32,
    /// Stream the event was written to
    pub event_stream_id: String,
    /// Expected version of the stream at write time
    pub expected_version: i64,
    /// Write time
    pub timestamp: SystemTime,
    /// Flags
    pub flags: PrepareFlags,
    /// Event type
    pub event_type: String,
    /// Event payload
    pub data: Vec<u8>,
    /// Event metadata
    pub metadata: Vec<u8>,
}

impl PrepareLogRecord {
    const FIXED_SIZE: usize = 1 + 1 + 2 + 8 + 8 + 4 + 8 + 8 + 16 + 16 + 4 * 4;

    /// Size of the encoded record in bytes
    pub fn encoded_len(&self) -> usize {
        Self::FIXED_SIZE
            + self.event_stream_id.len()
            + self.event_type.len()
            + self.data.len()
            + self.metadata.len()
    }

    /// Encode into a new buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(KIND_PREPARE);
        buf.push(RECORD_VERSION);
        buf.extend_from_slice(&self.flags.bits().to_le_bytes());
        buf.extend_from_slice(&self.log_position.to_le_bytes());
        buf.extend_from_slice(&self.transaction_position.to_le_bytes());
        buf.extend_from_slice(&self.transaction_offset.to_le_bytes());
        buf.extend_from_slice(&self.expected_version.to_le_bytes());
        buf.extend_from_slice(&timestamp_to_micros(self.timestamp).to_le_bytes());
        buf.extend_from_slice(self.correlation_id.as_bytes());
        buf.extend_from_slice(self.event_id.as_bytes());
        put_bytes(&mut buf, self.event_stream_id.as_bytes());
        put_bytes(&mut buf, self.event_type.as_bytes());
        put_bytes(&mut buf, &self.data);
        put_bytes(&mut buf, &self.metadata);
        buf
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let flags = PrepareFlags::from_bits(reader.u16()?);
        let log_position = reader.i64()?;
        let transaction_position = reader.i64()?;
        let transaction_offset = reader.i32()?;
        let expected_version = reader.i64()?;
        let timestamp = micros_to_timestamp(reader.i64()?);
        let correlation_id = reader.uuid()?;
        let event_id = reader.uuid()?;
        let event_stream_id = reader.string("event_stream_id")?;
        let event_type = reader.string("event_type")?;
        let data = reader.bytes()?.to_vec();
        let metadata = reader.bytes()?.to_vec();
        Ok(Self {
            log_position,
            correlation_id,
            event_id,
            transaction_position,
            transaction_offset,
            event_stream_id,
            expected_version,
            timestamp,
            flags,
            event_type,
            data,
            metadata,
        })
    }
}

/// A commit record for an explicit transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLogRecord {
    /// Position of the record in the log
    pub log_position: i64,
    /// Correlation id of the write
    pub correlation_id: Uuid,
    /// Position of the first prepare of the transaction
    pub transaction_position: i64,
    /// Event number of the first committed event
    pub first_event_number: i64,
    /// Commit time
    pub timestamp: SystemTime,
}

impl CommitLogRecord {
    const ENCODED_SIZE: usize = 1 + 1 + 8 + 16 + 8 + 8 + 8;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.push(KIND_COMMIT);
        buf.push(RECORD_VERSION);
        buf.extend_from_slice(&self.log_position.to_le_bytes());
        buf.extend_from_slice(self.correlation_id.as_bytes());
        buf.extend_from_slice(&self.transaction_position.to_le_bytes());
        buf.extend_from_slice(&self.first_event_number.to_le_bytes());
        buf.extend_from_slice(&timestamp_to_micros(self.timestamp).to_le_bytes());
        buf
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            log_position: reader.i64()?,
            correlation_id: reader.uuid()?,
            transaction_position: reader.i64()?,
            first_event_number: reader.i64()?,
            timestamp: micros_to_timestamp(reader.i64()?),
        })
    }
}

/// A system record (epoch, scavenge point, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemLogRecord {
    /// Position of the record in the log
    pub log_position: i64,
    /// Write time
    pub timestamp: SystemTime,
    /// Kind of system record
    pub system_record_type: u8,
    /// Opaque payload
    pub data: Vec<u8>,
}

impl SystemLogRecord {
    fn encoded_len(&self) -> usize {
        1 + 1 + 8 + 8 + 1 + 4 + self.data.len()
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(KIND_SYSTEM);
        buf.push(RECORD_VERSION);
        buf.extend_from_slice(&self.log_position.to_le_bytes());
        buf.extend_from_slice(&timestamp_to_micros(self.timestamp).to_le_bytes());
        buf.push(self.system_record_type);
        put_bytes(&mut buf, &self.data);
        buf
    }

    fn decode_body(reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            log_position: reader.i64()?,
            timestamp: micros_to_timestamp(reader.i64()?),
            system_record_type: reader.u8()?,
            data: reader.bytes()?.to_vec(),
        })
    }
}

/// Any record stored in a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Prepare record
    Prepare(PrepareLogRecord),
    /// Commit record
    Commit(CommitLogRecord),
    /// System record
    System(SystemLogRecord),
}

impl LogRecord {
    /// Position of the record in the log
    pub fn log_position(&self) -> i64 {
        match self {
            LogRecord::Prepare(record) => record.log_position,
            LogRecord::Commit(record) => record.log_position,
            LogRecord::System(record) => record.log_position,
        }
    }

    /// Size of the encoded record in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            LogRecord::Prepare(record) => record.encoded_len(),
            LogRecord::Commit(_) => CommitLogRecord::ENCODED_SIZE,
            LogRecord::System(record) => record.encoded_len(),
        }
    }

    /// Encode into a new buffer
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Prepare(record) => record.encode(),
            LogRecord::Commit(record) => record.encode(),
            LogRecord::System(record) => record.encode(),
        }
    }

    /// Decode a record that occupies the whole buffer
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut reader = ByteReader::new(buf);
        let kind = reader.u8()?;
        let version = reader.u8()?;
        if version != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }
        let record = match kind {
            KIND_PREPARE => LogRecord::Prepare(PrepareLogRecord::decode_body(&mut reader)?),
            KIND_COMMIT => LogRecord::Commit(CommitLogRecord::decode_body(&mut reader)?),
            KIND_SYSTEM => LogRecord::System(SystemLogRecord::decode_body(&mut reader)?),
            other => return Err(RecordError::UnknownRecordKind(other)),
        };
        if reader.offset != buf.len() {
            return Err(RecordError::LengthMismatch {
                expected: reader.offset,
                actual: buf.len(),
            });
        }
        Ok(record)
    }
}

/// A record handed to the executor for classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordForExecutor {
    /// Commit or system record, always kept verbatim
    NonPrepare(NonPrepareRecord),
    /// Prepare record, subject to discard and redaction
    Prepare(PrepareRecord),
}

impl RecordForExecutor {
    /// Build the executor view of a stored record
    pub fn from_log_record(record: LogRecord) -> Self {
        match record {
            LogRecord::Prepare(prepare) => {
                RecordForExecutor::Prepare(PrepareRecord::from_log_record(prepare))
            }
            other => RecordForExecutor::NonPrepare(NonPrepareRecord::new(other)),
        }
    }

    /// Position of the record in the log
    pub fn log_position(&self) -> i64 {
        match self {
            RecordForExecutor::NonPrepare(record) => record.log_position,
            RecordForExecutor::Prepare(record) => record.log_position,
        }
    }

    /// Encoded length of the record
    pub fn length(&self) -> u32 {
        match self {
            RecordForExecutor::NonPrepare(record) => record.length,
            RecordForExecutor::Prepare(record) => record.length,
        }
    }

    /// The underlying record, as it should be written
    pub fn to_log_record(&self) -> LogRecord {
        match self {
            RecordForExecutor::NonPrepare(record) => record.record.clone(),
            RecordForExecutor::Prepare(record) => LogRecord::Prepare(record.record.clone()),
        }
    }
}

/// Executor view of a commit or system record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonPrepareRecord {
    /// Encoded length
    pub length: u32,
    /// Position in the log
    pub log_position: i64,
    /// The record
    pub record: LogRecord,
}

impl NonPrepareRecord {
    /// Wrap a stored record
    pub fn new(record: LogRecord) -> Self {
        Self {
            length: record.encoded_len() as u32,
            log_position: record.log_position(),
            record,
        }
    }
}

/// Executor view of a prepare record
///
/// The identity fields are fixed when the view is built. [`set_record`](Self::set_record)
/// swaps the underlying record, for example for a redacted copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRecord {
    /// Encoded length
    pub length: u32,
    /// Position in the log
    pub log_position: i64,
    /// Stream the event belongs to
    pub stream_id: String,
    /// Event number within the stream
    pub event_number: i64,
    /// Write time
    pub timestamp: SystemTime,
    /// Committed by itself rather than by a commit record
    pub is_self_committed: bool,
    /// Stream tombstone
    pub is_tombstone: bool,
    /// First prepare of an explicit transaction
    pub is_transaction_begin: bool,
    record: PrepareLogRecord,
}

impl PrepareRecord {
    /// Build the view from a stored prepare
    pub fn from_log_record(record: PrepareLogRecord) -> Self {
        let is_tombstone = record.flags.contains(PrepareFlags::STREAM_DELETE);
        let event_number = if is_tombstone {
            DELETED_STREAM_EVENT_NUMBER
        } else {
            record.expected_version + 1
        };
        Self {
            length: record.encoded_len() as u32,
            log_position: record.log_position,
            stream_id: record.event_stream_id.clone(),
            event_number,
            timestamp: record.timestamp,
            is_self_committed: record.flags.contains(PrepareFlags::IS_COMMITTED),
            is_tombstone,
            is_transaction_begin: record.flags.contains(PrepareFlags::TRANSACTION_BEGIN),
            record,
        }
    }

    /// The underlying record
    pub fn record(&self) -> &PrepareLogRecord {
        &self.record
    }

    /// Replace the underlying record, keeping the identity fields
    pub fn set_record(&mut self, record: PrepareLogRecord) {
        debug_assert_eq!(record.encoded_len() as u32, self.length);
        debug_assert_eq!(record.log_position, self.log_position);
        self.record = record;
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn timestamp_to_micros(timestamp: SystemTime) -> i64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn micros_to_timestamp(micros: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_micros(micros.max(0) as u64)
}

struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RecordError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(RecordError::BufferTooSmall)?;
        let slice = self
            .buf
            .get(self.offset..end)
            .ok_or(RecordError::BufferTooSmall)?;
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RecordError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, RecordError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, RecordError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, RecordError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, RecordError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn uuid(&mut self) -> Result<Uuid, RecordError> {
        Ok(Uuid::from_bytes(self.array()?))
    }

    fn bytes(&mut self) -> Result<&'a [u8], RecordError> {
        let len = u32::from_le_bytes(self.array()?) as usize;
        self.take(len)
    }

    fn string(&mut self, field: &'static str) -> Result<String, RecordError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| RecordError::InvalidUtf8(field))
    }
}
