//! Collision-aware map keyed by stream hash
//!
//! Per-stream scavenge data is stored against the 64-bit hash of the stream
//! name. Hash collisions are rare, so storing the hash instead of the name
//! keeps the state small and fixed-size per entry. When two known streams do
//! collide, their entries are kept in a second submap keyed by the explicit
//! stream name.
//!
//! # Handles
//!
//! A [`StreamHandle`] records which submap an entry lives in. Lookups by
//! handle therefore need no collision check, and a handle doubles as the
//! resume cursor for [`CollisionMap::enumerate`].
//!
//! # Enumeration order
//!
//! The full sequence is every collision (ascending key) followed by every
//! non-collision (ascending hash). A single handle is enough to resume:
//!
//! - `None`: start from the beginning
//! - `Id(k)`: continue the collisions strictly after `k`, then all non-collisions
//! - `Hash(h)`: the collisions are done, continue the non-collisions strictly after `h`

use std::fmt;
use std::sync::Arc;

use crate::hash::LongHasher;
use crate::map::{MapResult, ScavengeMap};

/// Identifies a stream either by hash or by explicit key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum StreamHandle<K> {
    /// No stream. As a checkpoint: nothing has been visited yet.
    #[default]
    None,
    /// Identified by hash; the stream's hash does not collide
    Hash(u64),
    /// Identified by explicit key; the stream's hash collides
    Id(K),
}

/// Discriminant of a [`StreamHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHandleKind {
    /// [`StreamHandle::None`]
    None,
    /// [`StreamHandle::Hash`]
    Hash,
    /// [`StreamHandle::Id`]
    Id,
}

impl<K> StreamHandle<K> {
    /// Handle for a non-colliding stream
    pub const fn for_hash(hash: u64) -> Self {
        StreamHandle::Hash(hash)
    }

    /// Handle for a colliding stream
    pub fn for_stream_id(key: K) -> Self {
        StreamHandle::Id(key)
    }

    /// Get the kind of this handle
    pub const fn kind(&self) -> StreamHandleKind {
        match self {
            StreamHandle::None => StreamHandleKind::None,
            StreamHandle::Hash(_) => StreamHandleKind::Hash,
            StreamHandle::Id(_) => StreamHandleKind::Id,
        }
    }
}

impl<K: fmt::Display> fmt::Display for StreamHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamHandle::None => write!(f, "None"),
            StreamHandle::Hash(hash) => write!(f, "Hash: {hash}"),
            StreamHandle::Id(key) => write!(f, "Id: {key}"),
        }
    }
}

/// Predicate telling whether a key is a known collision
pub type IsCollision<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

/// Map from stream key to value that only stores explicit keys for
/// colliding streams
pub struct CollisionMap<K, V> {
    hasher: Arc<dyn LongHasher<K>>,
    is_collision: IsCollision<K>,
    non_collisions: Box<dyn ScavengeMap<u64, V>>,
    collisions: Box<dyn ScavengeMap<K, V>>,
}

impl<K, V> CollisionMap<K, V>
where
    K: Ord + Clone + 'static,
    V: 'static,
{
    /// Create a collision map over the two submaps
    ///
    /// `is_collision` must answer for every key passed to [`try_get_value`](Self::try_get_value)
    /// and [`set`](Self::set); keys are checked for collisions before they reach this map.
    pub fn new(
        hasher: Arc<dyn LongHasher<K>>,
        is_collision: IsCollision<K>,
        non_collisions: Box<dyn ScavengeMap<u64, V>>,
        collisions: Box<dyn ScavengeMap<K, V>>,
    ) -> Self {
        Self {
            hasher,
            is_collision,
            non_collisions,
            collisions,
        }
    }

    /// Look up by key, dispatching on whether the key is a known collision
    pub fn try_get_value(&self, key: &K) -> MapResult<Option<V>> {
        if (self.is_collision)(key) {
            self.collisions.try_get_value(key)
        } else {
            self.non_collisions.try_get_value(&self.hasher.hash(key))
        }
    }

    /// Look up by handle. `None` handles find nothing.
    pub fn try_get_value_by_handle(&self, handle: &StreamHandle<K>) -> MapResult<Option<V>> {
        match handle {
            StreamHandle::None => Ok(None),
            StreamHandle::Hash(hash) => self.non_collisions.try_get_value(hash),
            StreamHandle::Id(key) => self.collisions.try_get_value(key),
        }
    }

    /// Insert or overwrite the value for `key`
    pub fn set(&mut self, key: K, value: V) -> MapResult<()> {
        if (self.is_collision)(&key) {
            self.collisions.set(key, value)
        } else {
            let hash = self.hasher.hash(&key);
            self.non_collisions.set(hash, value)
        }
    }

    /// Notify the map that `key`, which did not collide before, now does.
    ///
    /// Moves the entry stored under the key's hash to the collision submap.
    /// Calling this again for the same key, or for a key with no entry, does
    /// nothing.
    pub fn notify_collision(&mut self, key: &K) -> MapResult<()> {
        let hash = self.hasher.hash(key);
        if let Some(value) = self.non_collisions.try_remove(&hash)? {
            self.collisions.set(key.clone(), value)?;
        }
        Ok(())
    }

    /// Enumerate all entries after `checkpoint` (collisions, then non-collisions)
    pub fn enumerate(
        &self,
        checkpoint: &StreamHandle<K>,
    ) -> MapResult<impl Iterator<Item = (StreamHandle<K>, V)>> {
        let (collisions, non_collisions) = match checkpoint {
            StreamHandle::None => (
                self.collisions.active_records()?,
                self.non_collisions.active_records()?,
            ),
            StreamHandle::Id(key) => (
                self.collisions.active_records_from_checkpoint(key)?,
                self.non_collisions.active_records()?,
            ),
            StreamHandle::Hash(hash) => (
                Vec::new().into_iter(),
                self.non_collisions.active_records_from_checkpoint(hash)?,
            ),
        };

        Ok(collisions
            .map(|(key, value)| (StreamHandle::Id(key), value))
            .chain(non_collisions.map(|(hash, value)| (StreamHandle::Hash(hash), value))))
    }
}
