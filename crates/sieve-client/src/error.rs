//! Client error types.

use sieve_proto::ErrorEnvelope;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] sieve_proto::Error),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// The connector answered with an error trailer.
    #[error("query failed: {0}")]
    Remote(ErrorEnvelope),
}

impl Error {
    /// The connector's error envelope, for [`Error::Remote`].
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            Error::Remote(envelope) => Some(envelope),
            _ => None,
        }
    }
}
