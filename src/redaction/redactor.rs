use crate::record::{PrepareFlags, PrepareLogRecord, PrepareRecord};

use super::RedactionTargetChecker;

/// Byte written over every payload byte of a redacted record
pub const REDACTED_BYTE: u8 = 0xFF;

/// Rewrites the payload of records confirmed to be redaction targets
pub trait RecordRedactor: Send + Sync {
    /// Redact `record` in place. Returns `false` if the record was skipped.
    fn redact(&self, record: &mut PrepareRecord) -> bool;

    /// Redact `record` if its position is one of `targets`
    ///
    /// Records must be passed in ascending log position order.
    fn redact_if_necessary<I>(
        &self,
        targets: &mut RedactionTargetChecker<I>,
        record: &mut PrepareRecord,
    ) -> bool
    where
        Self: Sized,
        I: Iterator<Item = i64>,
    {
        if !targets.is_target(record.log_position) {
            return false;
        }
        self.redact(record)
    }
}

/// Replaces the data of a prepare with [`REDACTED_BYTE`] and sets the
/// `IS_REDACTED` flag.
///
/// Redaction destroys the event payload and cannot be undone. It must only
/// be applied to records an operator explicitly requested to redact.
///
/// Every other field is kept as is, including `IS_JSON`, so the encoded
/// length does not change and the replacement can be written in the
/// original's place.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redactor;

impl Redactor {
    /// Create a redactor
    pub fn new() -> Self {
        Self
    }

    /// Build the redacted copy of a prepare
    pub fn redacted_copy(record: &PrepareLogRecord) -> PrepareLogRecord {
        PrepareLogRecord {
            data: vec![REDACTED_BYTE; record.data.len()],
            flags: record.flags | PrepareFlags::IS_REDACTED,
            event_stream_id: record.event_stream_id.clone(),
            event_type: record.event_type.clone(),
            metadata: record.metadata.clone(),
            ..*record
        }
    }
}

impl RecordRedactor for Redactor {
    fn redact(&self, record: &mut PrepareRecord) -> bool {
        if !record.record().flags.contains(PrepareFlags::DATA) {
            tracing::warn!(
                log_position = record.log_position,
                stream_id = %record.stream_id,
                event_number = record.event_number,
                "redaction target has no data, skipping"
            );
            return false;
        }

        let redacted = Self::redacted_copy(record.record());
        record.set_record(redacted);

        tracing::info!(
            log_position = record.log_position,
            stream_id = %record.stream_id,
            event_number = record.event_number,
            "redacted record"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use uuid::Uuid;

    fn prepare(flags: PrepareFlags) -> PrepareRecord {
        PrepareRecord::from_log_record(PrepareLogRecord {
            log_position: 500,
            correlation_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            transaction_position: 500,
            transaction_offset: 0,
            event_stream_id: "user-1".to_string(),
            expected_version: 2,
            timestamp: UNIX_EPOCH + Duration::from_secs(42),
            flags,
            event_type: "created".to_string(),
            data: br#"{"name":"ada"}"#.to_vec(),
            metadata: b"m".to_vec(),
        })
    }

    #[test]
    fn test_redact_keeps_identity_and_length() {
        let mut record = prepare(PrepareFlags::DATA | PrepareFlags::IS_COMMITTED | PrepareFlags::IS_JSON);
        let original = record.clone();

        assert!(Redactor::new().redact(&mut record));

        assert_eq!(record.log_position, original.log_position);
        assert_eq!(record.stream_id, original.stream_id);
        assert_eq!(record.event_number, original.event_number);
        assert_eq!(record.timestamp, original.timestamp);
        assert_eq!(record.length, original.length);
        assert_eq!(record.record().encoded_len(), original.record().encoded_len());

        let redacted = record.record();
        assert!(redacted.data.iter().all(|b| *b == REDACTED_BYTE));
        assert_eq!(redacted.data.len(), original.record().data.len());
        assert!(redacted.flags.contains(PrepareFlags::IS_REDACTED));
        assert!(redacted.flags.contains(PrepareFlags::IS_JSON));
        assert_eq!(redacted.metadata, original.record().metadata);
        assert_eq!(redacted.event_id, original.record().event_id);
        assert_eq!(redacted.correlation_id, original.record().correlation_id);
    }

    #[test]
    fn test_redact_twice_is_idempotent() {
        let mut record = prepare(PrepareFlags::DATA | PrepareFlags::IS_COMMITTED);
        let redactor = Redactor::new();
        assert!(redactor.redact(&mut record));
        let once = record.clone();
        assert!(redactor.redact(&mut record));
        assert_eq!(record, once);
    }

    #[test]
    fn test_redact_if_necessary_checks_position() {
        let mut record = prepare(PrepareFlags::DATA | PrepareFlags::IS_COMMITTED);
        let original = record.clone();
        let redactor = Redactor::new();

        let mut other = RedactionTargetChecker::new(vec![100, 900]);
        assert!(!redactor.redact_if_necessary(&mut other, &mut record));
        assert_eq!(record, original);

        let mut targets = RedactionTargetChecker::new(vec![100, 500, 900]);
        assert!(redactor.redact_if_necessary(&mut targets, &mut record));
        assert!(record.record().flags.contains(PrepareFlags::IS_REDACTED));
    }

    #[test]
    fn test_skip_without_data_flag() {
        let mut record = prepare(PrepareFlags::IS_COMMITTED);
        let original = record.clone();
        assert!(!Redactor::new().redact(&mut record));
        assert_eq!(record, original);
    }
}
