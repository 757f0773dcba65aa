use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message has no '<IDS|MSG>' delimiter frame")]
    MissingDelimiter,
    #[error("message has {found} frames after the delimiter, expected at least {expected}")]
    MissingFrames { expected: usize, found: usize },
    #[error("message received had invalid signature")]
    InvalidSignature,
    #[error("malformed {part} frame: {reason}")]
    Malformed { part: &'static str, reason: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("content of '{msg_type}' does not match its type: {source}")]
    Content {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported signature scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("failed to read connection file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
