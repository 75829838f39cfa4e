//! Error types for the framed channel

use thiserror::Error;

use crate::channel::packet::MessageKind;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection is gone; the message was not delivered
    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("expected a {expected:?} payload, got {actual:?}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
