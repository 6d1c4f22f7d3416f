use thiserror::Error;

/// Errors from the packet/message transport. Framing errors are fatal
/// for the connection they occur on.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    #[error("unexpected EOF mid-packet")]
    UnexpectedEof,

    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("message correlation failure: expected id {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },

    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("remote error {code}: {message}")]
    Remote {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("failed to spawn plugin {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
