use crate::map::{InMemoryScavengeMap, MapResult, Records, ScavengeMap};

use super::RedactionRequestPayload;

/// Set of log positions whose records must be redacted
///
/// Keyed by the log position of the target prepare. The value is a
/// presence marker.
pub trait RedactionRequestMap: ScavengeMap<i64, ()> {
    /// Register a target. Registering a known target does nothing.
    fn register_redaction_request(&mut self, position: i64) -> MapResult<()> {
        if self.try_get_value(&position)?.is_none() {
            self.set(position, ())?;
        }
        Ok(())
    }

    /// Register a target from a request event payload.
    ///
    /// Returns `Ok(false)` and registers nothing if the payload is malformed.
    fn register_from_payload(&mut self, position: i64, payload: &[u8]) -> MapResult<bool> {
        if RedactionRequestPayload::try_from_bytes(payload).is_none() {
            tracing::warn!(position, "malformed redaction request payload");
            return Ok(false);
        }
        self.register_redaction_request(position)?;
        Ok(true)
    }

    /// Targets in `[start, end_exclusive)`, ascending
    fn redaction_targets(&self, start: i64, end_exclusive: i64) -> MapResult<Vec<i64>>;

    /// Remove every request
    fn delete_all(&mut self) -> MapResult<()>;
}

/// In-memory redaction request map
#[derive(Debug, Default)]
pub struct InMemoryRedactionRequestMap {
    requests: InMemoryScavengeMap<i64, ()>,
}

impl InMemoryRedactionRequestMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScavengeMap<i64, ()> for InMemoryRedactionRequestMap {
    fn set(&mut self, key: i64, value: ()) -> MapResult<()> {
        self.requests.set(key, value)
    }

    fn try_get_value(&self, key: &i64) -> MapResult<Option<()>> {
        self.requests.try_get_value(key)
    }

    fn try_remove(&mut self, key: &i64) -> MapResult<Option<()>> {
        self.requests.try_remove(key)
    }

    fn all_records(&self) -> MapResult<Records<i64, ()>> {
        self.requests.all_records()
    }
}

impl RedactionRequestMap for InMemoryRedactionRequestMap {
    fn redaction_targets(&self, start: i64, end_exclusive: i64) -> MapResult<Vec<i64>> {
        Ok(self
            .requests
            .range(start, end_exclusive)
            .map(|(position, _)| *position)
            .collect())
    }

    fn delete_all(&mut self) -> MapResult<()> {
        self.requests.clear();
        Ok(())
    }
}
