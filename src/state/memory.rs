//! In-memory scavenge state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collision::CollisionMap;
use crate::hash::{LongHasher, Xxh3Hasher};
use crate::map::{InMemoryScavengeMap, MapResult, ScavengeMap};
use crate::redaction::{InMemoryRedactionRequestMap, RedactionRequestMap};

use super::{
    ChunkExecutionInfo, MetastreamData, ScavengeCheckpoint, ScavengeStateForChunkExecutor,
    ScavengeStateForChunkExecutorWorker,
};

struct StateInner<R> {
    original_streams: CollisionMap<String, ChunkExecutionInfo>,
    metastreams: CollisionMap<String, MetastreamData>,
    chunk_weights: InMemoryScavengeMap<u32, f32>,
    redactions: R,
    checkpoint: Option<ScavengeCheckpoint>,
}

/// Scavenge state held in memory
///
/// Cloning is cheap and yields another handle to the same state.
pub struct InMemoryScavengeState<R = InMemoryRedactionRequestMap> {
    inner: Arc<RwLock<StateInner<R>>>,
    collisions: Arc<RwLock<HashSet<String>>>,
    borrowed: Arc<AtomicUsize>,
}

impl InMemoryScavengeState<InMemoryRedactionRequestMap> {
    /// Create an empty state hashing stream names with xxh3
    pub fn new() -> Self {
        Self::with_parts(Arc::new(Xxh3Hasher), InMemoryRedactionRequestMap::new())
    }
}

impl Default for InMemoryScavengeState<InMemoryRedactionRequestMap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for InMemoryScavengeState<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            collisions: Arc::clone(&self.collisions),
            borrowed: Arc::clone(&self.borrowed),
        }
    }
}

impl<R: RedactionRequestMap + 'static> InMemoryScavengeState<R> {
    /// Create an empty state with the given stream hasher and redaction store
    pub fn with_parts(hasher: Arc<dyn LongHasher<String>>, redactions: R) -> Self {
        let collisions: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));

        let known = Arc::clone(&collisions);
        let original_streams = CollisionMap::new(
            Arc::clone(&hasher),
            Arc::new(move |key: &String| known.read().contains(key)),
            Box::new(InMemoryScavengeMap::new()),
            Box::new(InMemoryScavengeMap::new()),
        );

        let known = Arc::clone(&collisions);
        let metastreams = CollisionMap::new(
            hasher,
            Arc::new(move |key: &String| known.read().contains(key)),
            Box::new(InMemoryScavengeMap::new()),
            Box::new(InMemoryScavengeMap::new()),
        );

        Self {
            inner: Arc::new(RwLock::new(StateInner {
                original_streams,
                metastreams,
                chunk_weights: InMemoryScavengeMap::new(),
                redactions,
                checkpoint: None,
            })),
            collisions,
            borrowed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Record that `stream_id` collides with another known stream
    pub fn notify_collision(&self, stream_id: &str) -> MapResult<()> {
        let key = stream_id.to_string();
        // mark first so the moved entries are found under the explicit key
        self.collisions.write().insert(key.clone());
        let mut inner = self.inner.write();
        inner.original_streams.notify_collision(&key)?;
        inner.metastreams.notify_collision(&key)
    }

    /// Check if `stream_id` is a known collision
    pub fn is_collision(&self, stream_id: &str) -> bool {
        self.collisions.read().contains(stream_id)
    }

    /// Add `weight` to a logical chunk
    pub fn increase_chunk_weight(&self, logical_chunk_number: u32, weight: f32) -> MapResult<()> {
        let mut inner = self.inner.write();
        let current = inner
            .chunk_weights
            .try_get_value(&logical_chunk_number)?
            .unwrap_or(0.0);
        inner
            .chunk_weights
            .set(logical_chunk_number, current + weight)
    }

    /// Weight of a logical chunk
    pub fn chunk_weight(&self, logical_chunk_number: u32) -> MapResult<f32> {
        Ok(self
            .inner
            .read()
            .chunk_weights
            .try_get_value(&logical_chunk_number)?
            .unwrap_or(0.0))
    }

    /// Set the execution info of an original stream
    pub fn set_chunk_execution_info(&self, stream_id: &str, info: ChunkExecutionInfo) -> MapResult<()> {
        self.inner
            .write()
            .original_streams
            .set(stream_id.to_string(), info)
    }

    /// Set the data of a metastream
    pub fn set_metastream_data(&self, metastream_id: &str, data: MetastreamData) -> MapResult<()> {
        self.inner
            .write()
            .metastreams
            .set(metastream_id.to_string(), data)
    }

    /// Register a redaction request for the record at `position`
    pub fn register_redaction_request(&self, position: i64) -> MapResult<()> {
        self.inner
            .write()
            .redactions
            .register_redaction_request(position)
    }

    /// Drop every redaction request
    pub fn delete_redaction_requests(&self) -> MapResult<()> {
        self.inner.write().redactions.delete_all()
    }

    /// Last persisted checkpoint
    pub fn checkpoint(&self) -> Option<ScavengeCheckpoint> {
        self.inner.read().checkpoint.clone()
    }

    /// Number of worker views currently lent out
    pub fn borrowed_workers(&self) -> usize {
        self.borrowed.load(Ordering::Acquire)
    }
}

impl<R: RedactionRequestMap + 'static> ScavengeStateForChunkExecutor for InMemoryScavengeState<R> {
    type Worker = InMemoryStateWorker<R>;

    fn set_checkpoint(&mut self, checkpoint: ScavengeCheckpoint) -> MapResult<()> {
        self.inner.write().checkpoint = Some(checkpoint);
        Ok(())
    }

    fn borrow_state_for_worker(&mut self) -> MapResult<Self::Worker> {
        self.borrowed.fetch_add(1, Ordering::AcqRel);
        Ok(InMemoryStateWorker {
            inner: Arc::clone(&self.inner),
            borrowed: Arc::clone(&self.borrowed),
        })
    }
}

/// Worker view of an [`InMemoryScavengeState`]
pub struct InMemoryStateWorker<R> {
    inner: Arc<RwLock<StateInner<R>>>,
    borrowed: Arc<AtomicUsize>,
}

impl<R> Drop for InMemoryStateWorker<R> {
    fn drop(&mut self) {
        self.borrowed.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<R: RedactionRequestMap + 'static> ScavengeStateForChunkExecutorWorker for InMemoryStateWorker<R> {
    fn sum_chunk_weights(&self, start: u32, end: u32) -> MapResult<f32> {
        let inner = self.inner.read();
        Ok(inner
            .chunk_weights
            .range(start, end.saturating_add(1))
            .map(|(_, weight)| *weight)
            .sum())
    }

    fn reset_chunk_weights(&mut self, start: u32, end: u32) -> MapResult<()> {
        let mut inner = self.inner.write();
        for chunk in start..=end {
            inner.chunk_weights.try_remove(&chunk)?;
        }
        Ok(())
    }

    fn try_get_chunk_execution_info(
        &self,
        stream_id: &str,
    ) -> MapResult<Option<ChunkExecutionInfo>> {
        self.inner
            .read()
            .original_streams
            .try_get_value(&stream_id.to_string())
    }

    fn try_get_metastream_data(&self, stream_id: &str) -> MapResult<Option<MetastreamData>> {
        self.inner
            .read()
            .metastreams
            .try_get_value(&stream_id.to_string())
    }

    fn redaction_targets(&self, start: i64, end_exclusive: i64) -> MapResult<Vec<i64>> {
        self.inner
            .read()
            .redactions
            .redaction_targets(start, end_exclusive)
    }
}
