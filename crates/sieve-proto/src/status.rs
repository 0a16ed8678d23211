//! Stream trailers and the structured error envelope.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Error categories understood by the transport.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BadRequest,
    Unauthorized,
    NotFound,
    #[serde(rename = "internal")]
    InternalServerError,
    NotImplemented,
    Timeout,
}

impl ErrorCategory {
    /// Transport status code derived from the category.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCategory::BadRequest => 400,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::NotFound => 404,
            ErrorCategory::InternalServerError => 500,
            ErrorCategory::NotImplemented => 501,
            ErrorCategory::Timeout => 504,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::BadRequest => "bad_request",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InternalServerError => "internal",
            ErrorCategory::NotImplemented => "not_implemented",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried in a stream trailer.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ErrorEnvelope {
    /// Stable error code, e.g. `access_denied`.
    pub cause: String,
    pub category: ErrorCategory,
    /// Human readable detail, outermost first.
    pub messages: Vec<String>,
}

impl ErrorEnvelope {
    pub fn new(cause: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            cause: cause.into(),
            category,
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.category.status_code()
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if !self.messages.is_empty() {
            write!(f, ": {}", self.messages.join("; "))?;
        }
        Ok(())
    }
}

/// Final outcome of a record stream.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum Status {
    Ok,
    Error(ErrorEnvelope),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}
