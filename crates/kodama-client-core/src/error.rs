//! Error taxonomy for the client core
//!
//! Protocol errors never escape the decoder; they name the reason a frame
//! was dropped. Connection errors are surfaced once to the caller of the
//! connect attempt that failed. Sink errors are reported and leave the
//! affected source's video path uninitialized.

use thiserror::Error;

/// Reasons a frame or text envelope was dropped
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown message kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("Frame too short for {kind}: {len} bytes, need {min}")]
    Truncated {
        kind: &'static str,
        len: usize,
        min: usize,
    },

    #[error("Invalid JSON in {kind} payload: {source}")]
    InvalidJson {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Codec string too long: {0} bytes (max 255)")]
    CodecTooLong(usize),
}

/// Connection attempt failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("WebSocket connection failed: {url}")]
    Failed { url: String },

    #[error("Disconnected before the connection opened")]
    Disconnected,

    #[error("Connect attempt superseded by a newer connect")]
    Superseded,

    #[error("Session thread is no longer running")]
    SessionClosed,
}

/// Buffered-media sink failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Codec not supported: {0}")]
    UnsupportedCodec(String),

    #[error("Failed to create sink: {0}")]
    CreateFailed(String),

    #[error("Append rejected: {0}")]
    AppendRejected(String),
}
