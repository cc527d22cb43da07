//! Error types for decoding hub frames.

/// Errors produced while decoding or encoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large ({0} bytes)")]
    Oversized(usize),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}
