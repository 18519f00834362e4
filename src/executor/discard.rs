//! Keep/discard decision for one prepare record.

use std::time::Duration;

use crate::record::PrepareRecord;
use crate::state::{ChunkExecutionInfo, DiscardPoint, MetastreamData, ScavengePoint};

/// What the executor knows about the stream of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamExecutionDetails {
    /// The stream, or for a metastream its original stream, is hard deleted
    pub is_tombstoned: bool,
    /// Events below this are discarded
    pub discard_point: DiscardPoint,
    /// Events below this are discarded if older than `max_age`
    pub maybe_discard_point: DiscardPoint,
    /// Max age of the stream
    pub max_age: Option<Duration>,
}

impl From<ChunkExecutionInfo> for StreamExecutionDetails {
    fn from(info: ChunkExecutionInfo) -> Self {
        Self {
            is_tombstoned: info.is_tombstoned,
            discard_point: info.discard_point,
            maybe_discard_point: info.maybe_discard_point,
            max_age: info.max_age,
        }
    }
}

impl From<MetastreamData> for StreamExecutionDetails {
    fn from(data: MetastreamData) -> Self {
        Self {
            is_tombstoned: data.is_tombstoned,
            discard_point: data.discard_point,
            maybe_discard_point: DiscardPoint::KEEP_ALL,
            max_age: None,
        }
    }
}

/// Decide whether a prepare below the scavenge point is discarded
///
/// Checks run in order and the first one that applies wins:
///
/// 1. records at or after the scavenge point are kept
/// 2. members of explicit transactions: in a tombstoned stream everything
///    goes with `unsafe_ignore_hard_deletes`, otherwise only the tombstone
///    and transaction begins stay; outside tombstoned streams all are kept
/// 3. self-committed records of a tombstoned stream go with
///    `unsafe_ignore_hard_deletes`, and always go for metastreams
/// 4. the discard point
/// 5. the maybe-discard point, only for records older than the max age
pub fn should_discard(
    scavenge_point: &ScavengePoint,
    record: &PrepareRecord,
    is_metastream: bool,
    details: &StreamExecutionDetails,
    unsafe_ignore_hard_deletes: bool,
) -> bool {
    if record.log_position >= scavenge_point.position {
        return false;
    }

    if !record.is_self_committed {
        if !details.is_tombstoned {
            return false;
        }
        if unsafe_ignore_hard_deletes {
            return true;
        }
        return !(record.is_tombstone || record.is_transaction_begin);
    }

    if details.is_tombstoned {
        if unsafe_ignore_hard_deletes {
            if tracing::enabled!(tracing::Level::INFO) {
                tracing::info!(
                    stream_id = %record.stream_id,
                    log_position = record.log_position,
                    "removing record of hard deleted stream"
                );
            }
            return true;
        }
        if is_metastream {
            return true;
        }
    }

    if details.discard_point.should_discard(record.event_number) {
        return true;
    }

    if !details.maybe_discard_point.should_discard(record.event_number) {
        return false;
    }

    match details.max_age {
        Some(max_age) => scavenge_point
            .effective_now
            .checked_sub(max_age)
            .map_or(false, |cutoff| record.timestamp < cutoff),
        None => false,
    }
}
