use serde::{Deserialize, Serialize};

/// Body of a redaction request event
///
/// A missing `targetEventNumber` and an explicit `null` both mean no
/// specific event number. Unknown fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionRequestPayload {
    /// Event number of the record to redact
    #[serde(default)]
    pub target_event_number: Option<i64>,
}

impl RedactionRequestPayload {
    /// Parse a JSON payload. Returns `None` if the payload is malformed or
    /// is not a JSON object.
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        // the derived impl would also accept the sequence form, e.g. `[1]`
        let object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(bytes).ok()?;
        serde_json::from_value(serde_json::Value::Object(object)).ok()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
