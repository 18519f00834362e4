//! Chunk execution
//!
//! The [`ChunkExecutor`] rewrites every physical chunk below the scavenge
//! point that is worth rewriting: chunks whose accumulated weight exceeds
//! the scavenge point's threshold, or that contain redaction targets, or
//! every chunk when hard deletes are being ignored. Each record of such a
//! chunk is kept, discarded, or kept redacted, and the survivors are written
//! to a replacement chunk that is swapped in atomically.
//!
//! Physical chunks are executed in parallel by
//! [`run_with_trailing_checkpoint`]. The checkpoint persisted after each
//! chunk never passes a chunk that is still running, so a resumed run
//! redoes at most the chunks that were in flight.
//!
//! # Failures
//!
//! | Error                          | Replacement chunk | Status              |
//! |--------------------------------|-------------------|---------------------|
//! | `FileBeingDeleted`             | deleted           | `RetryableConflict` |
//! | `Cancelled`                    | kept on disk      | `Cancelled`         |
//! | anything else                  | deleted           | `Fatal`             |

mod discard;
mod stats;

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::{CancellationToken, Throttle};
use crate::chunk::{ChunkManager, ChunkReader, ChunkWriter, PhysicalChunk};
use crate::constants::{DEFAULT_CANCELLATION_CHECK_PERIOD, DEFAULT_CHUNK_SIZE};
use crate::map::MapError;
use crate::parallel::run_with_trailing_checkpoint;
use crate::record::{PrepareRecord, RecordForExecutor};
use crate::redaction::{RecordRedactor, RedactionTargetChecker};
use crate::state::{
    MetastreamData, MetastreamLookup, ScavengeCheckpoint, ScavengePoint,
    ScavengeStateForChunkExecutor, ScavengeStateForChunkExecutorWorker,
};
use crate::status::ScavengeError;

pub use discard::{should_discard, StreamExecutionDetails};
pub use stats::{ChunkStats, ExecutionSummary, ScavengerLog, TracingScavengerLog};

/// Configuration for the chunk executor
#[derive(Debug, Clone)]
pub struct ChunkExecutorConfig {
    /// Size of a logical chunk in bytes
    pub chunk_size: u64,
    /// Number of worker threads
    pub threads: usize,
    /// Records processed between cancellation checks
    pub cancellation_check_period: usize,
    /// Discard every record of hard deleted streams, tombstones included
    pub unsafe_ignore_hard_deletes: bool,
    /// Rest after each chunk (single-threaded runs only)
    pub throttle_interval: Duration,
}

impl ChunkExecutorConfig {
    /// Create a configuration for logical chunks of `chunk_size` bytes
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            threads: 1,
            cancellation_check_period: DEFAULT_CANCELLATION_CHECK_PERIOD,
            unsafe_ignore_hard_deletes: false,
            throttle_interval: Duration::ZERO,
        }
    }

    /// Set the number of worker threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set the number of records between cancellation checks
    pub fn with_cancellation_check_period(mut self, period: usize) -> Self {
        self.cancellation_check_period = period.max(1);
        self
    }

    /// Set whether hard deletes are ignored
    pub fn with_unsafe_ignore_hard_deletes(mut self, value: bool) -> Self {
        self.unsafe_ignore_hard_deletes = value;
        self
    }

    /// Set the rest interval between chunks
    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }
}

impl Default for ChunkExecutorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

/// Rewrites physical chunks below a scavenge point
pub struct ChunkExecutor<L, M, R> {
    lookup: L,
    manager: M,
    redactor: R,
    config: ChunkExecutorConfig,
    throttle: Throttle,
    span: tracing::Span,
}

impl<L, M, R> ChunkExecutor<L, M, R>
where
    L: MetastreamLookup,
    M: ChunkManager,
    R: RecordRedactor,
{
    /// Create an executor
    pub fn new(lookup: L, manager: M, redactor: R, config: ChunkExecutorConfig) -> Self {
        let throttle = Throttle::new(config.throttle_interval);
        Self {
            lookup,
            manager,
            redactor,
            config,
            throttle,
            span: tracing::info_span!("chunk_executor"),
        }
    }

    /// Replace the throttle
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Scope every event of the executor to `span`
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &ChunkExecutorConfig {
        &self.config
    }

    /// Get the chunk manager
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Start chunk execution for a new scavenge point
    pub fn execute<S>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &mut S,
        log: &dyn ScavengerLog,
        token: &CancellationToken,
    ) -> Result<ExecutionSummary, ScavengeError>
    where
        S: ScavengeStateForChunkExecutor,
    {
        {
            let _entered = self.span.enter();
            tracing::debug!(
                scavenge_point = %scavenge_point.name(),
                "starting chunk execution"
            );
        }

        let checkpoint = ScavengeCheckpoint::executing_chunks(scavenge_point.clone(), None);
        state.set_checkpoint(checkpoint.clone())?;
        self.resume(&checkpoint, state, log, token)
    }

    /// Continue chunk execution from a persisted checkpoint
    pub fn resume<S>(
        &self,
        checkpoint: &ScavengeCheckpoint,
        state: &mut S,
        log: &dyn ScavengerLog,
        token: &CancellationToken,
    ) -> Result<ExecutionSummary, ScavengeError>
    where
        S: ScavengeStateForChunkExecutor,
    {
        let _entered = self.span.enter();
        let started = Instant::now();
        tracing::debug!(%checkpoint, "executing chunks from checkpoint");

        let scavenge_point = checkpoint.scavenge_point();
        let start_from_chunk = checkpoint
            .done_logical_chunk_number()
            .map_or(0, |done| done + 1);
        let threads = self.config.threads.max(1);

        // one borrowed view and one set of counters per slot, released on every exit path
        let workers = (0..threads)
            .map(|_| state.borrow_state_for_worker().map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        let slot_stats: Vec<Mutex<ChunkStats>> = (0..threads)
            .map(|_| Mutex::new(ChunkStats::default()))
            .collect();

        let mut last_checkpoint = checkpoint.clone();

        run_with_trailing_checkpoint(
            self.physical_chunks(start_from_chunk, scavenge_point),
            threads,
            |reader: &M::Reader| Some(reader.chunk().end_number),
            |reader: &M::Reader| reader.chunk().start_number.checked_sub(1),
            |slot, reader| {
                let _entered = self.span.enter();
                let mut worker = workers[slot].lock();
                let stats = self.process_physical_chunk(
                    scavenge_point,
                    &mut *worker,
                    reader,
                    log,
                    token,
                )?;
                *slot_stats[slot].lock() += stats;
                token.check()
            },
            |done| {
                let checkpoint = ScavengeCheckpoint::executing_chunks(scavenge_point.clone(), done);
                state.set_checkpoint(checkpoint.clone())?;
                last_checkpoint = checkpoint;

                // multi-threaded runs do not rest
                if threads == 1 {
                    self.throttle.rest(token)?;
                }
                Ok(())
            },
        )?;

        drop(workers);

        let mut stats = ChunkStats::default();
        for slot in slot_stats {
            stats += slot.into_inner();
        }

        tracing::debug!(
            chunks_executed = stats.chunks_executed,
            chunks_skipped = stats.chunks_skipped,
            records_discarded = stats.records_discarded,
            records_redacted = stats.records_redacted,
            space_saved = stats.space_saved,
            "chunk execution complete"
        );

        Ok(ExecutionSummary {
            stats,
            checkpoint: last_checkpoint,
            threads_used: threads,
            elapsed: started.elapsed(),
        })
    }

    /// Readers for every physical chunk from `start_from_chunk` up to the
    /// scavenge point
    fn physical_chunks<'a>(
        &'a self,
        start_from_chunk: u32,
        scavenge_point: &'a ScavengePoint,
    ) -> impl Iterator<Item = Result<M::Reader, ScavengeError>> + 'a {
        let mut position = start_from_chunk as i64 * self.config.chunk_size as i64;
        let mut failed = false;

        std::iter::from_fn(move || {
            if failed || position >= scavenge_point.position {
                return None;
            }

            let reader = match self.manager.chunk_reader_for(position) {
                Ok(reader) => reader,
                Err(err) => {
                    failed = true;
                    return Some(Err(err));
                }
            };

            let chunk = reader.chunk();
            if !chunk.is_read_only {
                failed = true;
                return Some(Err(ScavengeError::Consistency(format!(
                    "reached open chunk before scavenge point: chunk {}, scavenge point {}",
                    chunk.start_number, scavenge_point.position
                ))));
            }
            if chunk.end_position <= position {
                failed = true;
                return Some(Err(ScavengeError::Consistency(format!(
                    "chunk {} ends at {} which is not after {position}",
                    chunk.name, chunk.end_position
                ))));
            }

            position = chunk.end_position;
            Some(Ok(reader))
        })
    }

    /// Execute or skip one physical chunk. Runs on a worker thread.
    fn process_physical_chunk<W>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &mut W,
        reader: M::Reader,
        log: &dyn ScavengerLog,
        token: &CancellationToken,
    ) -> Result<ChunkStats, ScavengeError>
    where
        W: ScavengeStateForChunkExecutorWorker,
    {
        let chunk = reader.chunk().clone();

        // physical chunks do not overlap, so concurrent workers never sum or
        // reset the same weights
        let in_chunks =
            |err: MapError| ScavengeError::from(err).in_chunks(chunk.start_number, chunk.end_number);
        let weight = state
            .sum_chunk_weights(chunk.start_number, chunk.end_number)
            .map_err(in_chunks)?;
        let targets = state
            .redaction_targets(chunk.start_position, chunk.end_position)
            .map_err(in_chunks)?;
        let mut targets = RedactionTargetChecker::new(targets);

        let execute = weight > scavenge_point.threshold as f32
            || self.config.unsafe_ignore_hard_deletes
            || targets.any_targets();

        if !execute {
            tracing::debug!(chunk = %chunk.name, weight, "skipped physical chunk");
            return Ok(ChunkStats {
                chunks_skipped: 1,
                ..Default::default()
            });
        }

        let stats =
            self.execute_physical_chunk(scavenge_point, state, reader, &mut targets, log, token)?;

        // only after the replacement is in place
        state
            .reset_chunk_weights(chunk.start_number, chunk.end_number)
            .map_err(in_chunks)?;
        Ok(stats)
    }

    fn execute_physical_chunk<W, I>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &W,
        mut reader: M::Reader,
        targets: &mut RedactionTargetChecker<I>,
        log: &dyn ScavengerLog,
        token: &CancellationToken,
    ) -> Result<ChunkStats, ScavengeError>
    where
        W: ScavengeStateForChunkExecutorWorker,
        I: Iterator<Item = i64>,
    {
        let started = Instant::now();
        let chunk = reader.chunk().clone();

        tracing::debug!(
            chunk = %chunk.name,
            chunk_start = chunk.start_number,
            chunk_end = chunk.end_number,
            start_position = chunk.start_position,
            end_position = chunk.end_position,
            "started to scavenge physical chunk"
        );

        let mut writer = match self.manager.create_chunk_writer(&reader) {
            Ok(writer) => writer,
            Err(err) => {
                tracing::error!(chunk = %chunk.name, error = %err, "could not create scavenged chunk");
                return Err(err);
            }
        };
        tracing::debug!(temp_chunk = writer.file_name(), "writing scavenged chunk");

        let mut stats = ChunkStats {
            chunks_executed: 1,
            ..Default::default()
        };

        let copied = self
            .copy_records(scavenge_point, state, &mut reader, &mut writer, targets, token, &mut stats)
            .and_then(|()| writer.complete());

        match copied {
            Ok(completed) => {
                let elapsed = started.elapsed();
                stats.space_saved = chunk.file_size as i64 - completed.file_size as i64;

                tracing::debug!(
                    chunk = %chunk.name,
                    new_chunk = %completed.file_name,
                    old_size = chunk.file_size,
                    new_size = completed.file_size,
                    kept = stats.records_kept,
                    discarded = stats.records_discarded,
                    redacted = stats.records_redacted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "scavenged physical chunk"
                );
                log.chunks_scavenged(chunk.start_number, chunk.end_number, elapsed, stats.space_saved);
                Ok(stats)
            }
            Err(err) => {
                let err = err.in_chunks(chunk.start_number, chunk.end_number);
                self.abort_chunk(&chunk, &mut writer, &err, started.elapsed(), log);
                Err(err)
            }
        }
    }

    fn abort_chunk(
        &self,
        chunk: &PhysicalChunk,
        writer: &mut M::Writer,
        err: &ScavengeError,
        elapsed: Duration,
        log: &dyn ScavengerLog,
    ) {
        match err {
            ScavengeError::FileBeingDeleted { .. } => {
                tracing::info!(
                    chunk = %chunk.name,
                    temp_chunk = writer.file_name(),
                    error = %err,
                    "source chunk is being deleted, probably re-replicated; removing scavenged chunk"
                );
                writer.abort(true);
            }
            ScavengeError::Cancelled => {
                tracing::info!(chunk = %chunk.name, "cancelled");
                writer.abort(false);
            }
            _ => {
                tracing::error!(
                    chunk_start = chunk.start_number,
                    chunk_end = chunk.end_number,
                    error = %err,
                    "error while scavenging chunk"
                );
                log.chunks_not_scavenged(chunk.start_number, chunk.end_number, elapsed, &err.to_string());
                writer.abort(true);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_records<W, I>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &W,
        reader: &mut M::Reader,
        writer: &mut M::Writer,
        targets: &mut RedactionTargetChecker<I>,
        token: &CancellationToken,
        stats: &mut ChunkStats,
    ) -> Result<(), ScavengeError>
    where
        W: ScavengeStateForChunkExecutorWorker,
        I: Iterator<Item = i64>,
    {
        let period = self.config.cancellation_check_period.max(1);
        let mut since_check = 0usize;
        let mut cached: Option<(String, StreamExecutionDetails)> = None;

        for record in reader.read_records() {
            match record? {
                RecordForExecutor::Prepare(mut prepare) => {
                    if self.should_discard_record(scavenge_point, state, &prepare, &mut cached)? {
                        if tracing::enabled!(tracing::Level::TRACE) {
                            tracing::trace!(
                                stream_id = %prepare.stream_id,
                                event_number = prepare.event_number,
                                log_position = prepare.log_position,
                                "discarding record"
                            );
                        }
                        stats.records_discarded += 1;
                    } else {
                        if self.redactor.redact_if_necessary(targets, &mut prepare) {
                            stats.records_redacted += 1;
                        }
                        stats.records_kept += 1;
                        writer.write_record(&RecordForExecutor::Prepare(prepare))?;
                    }
                }
                other => {
                    stats.records_kept += 1;
                    writer.write_record(&other)?;
                }
            }

            since_check += 1;
            if since_check == period {
                since_check = 0;
                token.check()?;
            }
        }

        Ok(())
    }

    fn should_discard_record<W>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &W,
        record: &PrepareRecord,
        cached: &mut Option<(String, StreamExecutionDetails)>,
    ) -> Result<bool, ScavengeError>
    where
        W: ScavengeStateForChunkExecutorWorker,
    {
        // cheaper than looking up the stream, and safe regardless of the discard points
        if record.log_position >= scavenge_point.position {
            return Ok(false);
        }

        let is_metastream = self.lookup.is_metastream(&record.stream_id);
        let details = match cached {
            Some((stream_id, details)) if *stream_id == record.stream_id => *details,
            _ => {
                let details = self.stream_execution_details(state, &record.stream_id, is_metastream)?;
                *cached = Some((record.stream_id.clone(), details));
                details
            }
        };

        Ok(should_discard(
            scavenge_point,
            record,
            is_metastream,
            &details,
            self.config.unsafe_ignore_hard_deletes,
        ))
    }

    fn stream_execution_details<W>(
        &self,
        state: &W,
        stream_id: &str,
        is_metastream: bool,
    ) -> Result<StreamExecutionDetails, ScavengeError>
    where
        W: ScavengeStateForChunkExecutorWorker,
    {
        if is_metastream {
            let data = state
                .try_get_metastream_data(stream_id)?
                .unwrap_or(MetastreamData::EMPTY);
            Ok(data.into())
        } else {
            Ok(state
                .try_get_chunk_execution_info(stream_id)?
                .map(StreamExecutionDetails::from)
                .unwrap_or_default())
        }
    }
}
