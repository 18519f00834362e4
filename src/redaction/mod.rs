//! Redaction of targeted records
//!
//! Redaction requests are registered ahead of a scavenge as log positions of
//! the prepare records whose payload must be destroyed. During chunk
//! execution each physical chunk asks the request map for the targets in its
//! position range and feeds them to a [`RedactionTargetChecker`], which the
//! record loop queries once per prepare in ascending position order. Matching
//! records are rewritten by a [`RecordRedactor`].

mod checker;
mod payload;
mod redactor;
mod requests;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use checker::RedactionTargetChecker;
pub use payload::RedactionRequestPayload;
pub use redactor::{RecordRedactor, Redactor, REDACTED_BYTE};
pub use requests::{InMemoryRedactionRequestMap, RedactionRequestMap};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRedactionRequestMap;
