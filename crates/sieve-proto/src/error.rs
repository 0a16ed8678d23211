//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Frame header or payload is malformed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame exceeded the configured size limit.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame sequence does not follow the stream grammar.
    #[error("invalid stream: {0}")]
    InvalidStream(String),
}
