//! In-memory scavenge map.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{MapResult, Records, ScavengeMap};

/// Predicate deciding whether a record is live
pub type ActiveFilter<K, V> = Arc<dyn Fn(&K, &V) -> bool + Send + Sync>;

/// Ordered in-memory implementation of [`ScavengeMap`]
pub struct InMemoryScavengeMap<K, V> {
    records: BTreeMap<K, V>,
    filter: Option<ActiveFilter<K, V>>,
}

impl<K: Ord, V> InMemoryScavengeMap<K, V> {
    /// Create an empty map where every record is active
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            filter: None,
        }
    }

    /// Create an empty map that only reports records accepted by `filter`
    /// as active
    pub fn with_filter<F>(filter: F) -> Self
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        Self {
            records: BTreeMap::new(),
            filter: Some(Arc::new(filter)),
        }
    }

    /// Number of stored records, active or not
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the map holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with keys in `[start, end)`, ascending
    pub fn range(&self, start: K, end: K) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.records
            .range(start..)
            .take_while(move |(key, _)| **key < end)
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl<K: Ord, V> Default for InMemoryScavengeMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for InMemoryScavengeMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryScavengeMap")
            .field("records", &self.records)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<K, V> ScavengeMap<K, V> for InMemoryScavengeMap<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn set(&mut self, key: K, value: V) -> MapResult<()> {
        self.records.insert(key, value);
        Ok(())
    }

    fn try_get_value(&self, key: &K) -> MapResult<Option<V>> {
        Ok(self.records.get(key).cloned())
    }

    fn try_remove(&mut self, key: &K) -> MapResult<Option<V>> {
        Ok(self.records.remove(key))
    }

    fn all_records(&self) -> MapResult<Records<K, V>> {
        // copy so the caller can write to the map while consuming the records
        let snapshot: Vec<(K, V)> = self
            .records
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(snapshot.into_iter())
    }

    fn is_active(&self, key: &K, value: &V) -> bool {
        match &self.filter {
            Some(filter) => filter(key, value),
            None => true,
        }
    }
}
