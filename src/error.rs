//! Error types for sesswire.

use thiserror::Error;

/// Main error type for all sesswire operations.
#[derive(Debug, Error)]
pub enum SesswireError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (structured message bodies).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed record, bad reply line, wrong argument count).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The source buffer ended before a complete varint or record body.
    #[error("short buffer")]
    ShortBuffer,

    /// A varint did not terminate within ten bytes or exceeds 64 bits.
    #[error("varint overflow")]
    VarintOverflow,

    /// A wire quantity exceeded its declared maximum.
    #[error("{subject} {value} exceeds maximum {max}")]
    Overflow {
        /// What overflowed ("message type", "message body", "varint").
        subject: &'static str,
        /// The decoded value.
        value: u64,
        /// The configured maximum.
        max: u64,
    },

    /// A decoded integer fell outside the representable range.
    ///
    /// Carries the value clamped to the nearest bound.
    #[error("integer out of range")]
    IntegerRange {
        /// The input clamped to `i64::MIN`/`i64::MAX`.
        clamped: i64,
    },

    /// No constructor registered for the decoded message type.
    #[error("unrecognized message type: {0}")]
    UnrecognizedType(u64),

    /// A message type number was registered twice.
    #[error("duplicate message type {type_id} (already registered by module {module})")]
    DuplicateType {
        /// Module that owns the existing registration.
        module: String,
        /// The conflicting type number.
        type_id: u64,
    },

    /// A non-hello command arrived before the handshake completed.
    #[error("hello command required")]
    HelloRequired,

    /// The handshake was refused by this side or by the peer.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Handler callback returned an error; terminal for the session.
    #[error("handler error: {0}")]
    Handler(String),

    /// The session is closed; no further writes are accepted.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using SesswireError.
pub type Result<T> = std::result::Result<T, SesswireError>;

/// Classify an error as a benign network disconnect rather than a bug.
///
/// Used for logging only; the session never retries. A peer going away
/// mid-connection shows up as one of a handful of I/O kinds that carry no
/// diagnostic value beyond "the other side left".
pub fn is_benign_disconnect(err: &SesswireError) -> bool {
    match err {
        SesswireError::ConnectionClosed => true,
        SesswireError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}
