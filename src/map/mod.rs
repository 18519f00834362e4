//! Ordered key/value stores backing the scavenge state
//!
//! # Overview
//!
//! [`ScavengeMap`] is the capability every backing store provides: insert or
//! overwrite, lookup, remove, and ascending iteration, optionally resumed
//! strictly after a checkpoint key. The collision-aware map and the redaction
//! request map are built on it and depend only on the trait.
//!
//! Iteration always works on a snapshot: the key order (and the values) are
//! materialized before the caller consumes them, so the caller may overwrite
//! values in the same map while it walks the records.
//!
//! # Implementations
//!
//! - [`InMemoryScavengeMap`]: `BTreeMap` based, used for tests and small logs
//! - `SqliteRedactionRequestMap` (feature `sqlite`): persistent redaction requests

mod memory;

pub use memory::InMemoryScavengeMap;

/// Errors returned by backing maps
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The backing store failed
    #[error("backend error: {0}")]
    Backend(String),
    /// SQLite failure
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for backing map operations
pub type MapResult<T> = Result<T, MapError>;

/// Materialized, ascending sequence of records
pub type Records<K, V> = std::vec::IntoIter<(K, V)>;

/// Ordered key/value store used by the scavenge state
pub trait ScavengeMap<K, V>: Send + Sync {
    /// Insert or overwrite the value for `key`
    fn set(&mut self, key: K, value: V) -> MapResult<()>;

    /// Get the value for `key`
    fn try_get_value(&self, key: &K) -> MapResult<Option<V>>;

    /// Remove `key`, returning the value it had
    fn try_remove(&mut self, key: &K) -> MapResult<Option<V>>;

    /// All records in ascending key order
    fn all_records(&self) -> MapResult<Records<K, V>>;

    /// Whether a record counts as live. Stores that tombstone entries
    /// logically override this.
    fn is_active(&self, _key: &K, _value: &V) -> bool {
        true
    }

    /// Live records in ascending key order
    fn active_records(&self) -> MapResult<Records<K, V>> {
        let records: Vec<(K, V)> = self
            .all_records()?
            .filter(|(key, value)| self.is_active(key, value))
            .collect();
        Ok(records.into_iter())
    }

    /// Live records with keys strictly greater than `checkpoint`
    fn active_records_from_checkpoint(&self, checkpoint: &K) -> MapResult<Records<K, V>>
    where
        K: Ord,
    {
        let records: Vec<(K, V)> = self
            .active_records()?
            .skip_while(|(key, _)| key <= checkpoint)
            .collect();
        Ok(records.into_iter())
    }
}
