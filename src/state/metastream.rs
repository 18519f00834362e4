use crate::constants::METASTREAM_PREFIX;

/// Tells metadata streams apart from original streams
pub trait MetastreamLookup: Send + Sync {
    /// Check if `stream_id` names a metadata stream
    fn is_metastream(&self, stream_id: &str) -> bool;

    /// Metadata stream of an original stream
    fn metastream_of(&self, stream_id: &str) -> String;

    /// Original stream of a metadata stream
    fn original_stream_of<'a>(&self, metastream_id: &'a str) -> Option<&'a str>;
}

/// Metastreams are the original stream name prefixed with `$$`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogV2MetastreamLookup;

impl MetastreamLookup for LogV2MetastreamLookup {
    #[inline]
    fn is_metastream(&self, stream_id: &str) -> bool {
        stream_id.starts_with(METASTREAM_PREFIX)
    }

    fn metastream_of(&self, stream_id: &str) -> String {
        format!("{METASTREAM_PREFIX}{stream_id}")
    }

    fn original_stream_of<'a>(&self, metastream_id: &'a str) -> Option<&'a str> {
        metastream_id.strip_prefix(METASTREAM_PREFIX)
    }
}
