//! Protocol error types.

use thiserror::Error;

/// Errors from encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame body exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or actual size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Announced payload exceeds [`crate::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Announced size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Size header was not a non-negative decimal integer.
    #[error("invalid size header: {0:?}")]
    InvalidSizeHeader(String),

    /// Bytes did not name a known token.
    #[error("unknown token: {0:?}")]
    UnknownToken(String),

    /// Payload document could not be (de)serialized.
    #[error("payload encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A list entry violated the data model (e.g. empty reminder).
    #[error("invalid collection: {0}")]
    InvalidCollection(String),
}
