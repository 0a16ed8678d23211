//! Error taxonomy shared by the policy, transformation and source layers.
//!
//! Every error carries a stable code (the envelope `cause`) and maps onto a
//! transport category.

use std::fmt;

use sieve_proto::{ErrorCategory, ErrorEnvelope, FieldType};
use thiserror::Error;

/// Why policy evaluation refused a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No rule targets the queried entity, or nothing is left to project.
    NoPolicyMatches,
    /// An explicitly requested field is not permitted.
    FieldNotAllowed { field: String },
    /// Rules target the entity but none grants the requested action.
    ActionNotAllowed,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NoPolicyMatches => "no_policy_matches",
            DenyReason::FieldNotAllowed { .. } => "field_not_allowed",
            DenyReason::ActionNotAllowed => "action_not_allowed",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoPolicyMatches => f.write_str("No policies match the provided query"),
            DenyReason::FieldNotAllowed { field } => {
                write!(f, "Field '{field}' is not allowed by any policy")
            }
            DenyReason::ActionNotAllowed => {
                f.write_str("No policy allows this action on the provided target")
            }
        }
    }
}

/// Connector errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The query is not a single-table SELECT or does not parse.
    #[error("{0}")]
    InvalidQuery(String),

    /// Policy evaluation refused the query.
    #[error("{0}")]
    AccessDenied(DenyReason),

    /// A transform target or conditional variable is not in the schema.
    #[error("{0}")]
    FieldNotFound(String),

    #[error("Attempted to call {function} transform on an unsupported type {field_type}")]
    UnsupportedType {
        function: String,
        field_type: FieldType,
    },

    #[error("{function} requires argument '{argument}'")]
    MissingArgument { function: String, argument: String },

    #[error("{function} argument '{argument}' {reason}")]
    WrongArgument {
        function: String,
        argument: String,
        reason: String,
    },

    /// A conditional did not produce a boolean.
    #[error("{0}")]
    EvaluateBoolOnly(String),

    #[error("no transformation named '{0}' is registered")]
    UnknownTransformation(String),

    /// A policy document violates the model's invariants.
    #[error("{0}")]
    InvalidPolicy(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("source '{0}' does not exist")]
    SourceNotFound(String),

    #[error("no driver is registered for source type '{0}'")]
    SourceNotSupported(String),

    #[error("{0} is closed")]
    Closed(String),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    /// Deadline exceeded or the request was cancelled.
    #[error("{0}")]
    Timeout(String),

    /// The upstream source failed.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn wrong_argument(
        function: impl Into<String>,
        argument: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::WrongArgument {
            function: function.into(),
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_argument(function: impl Into<String>, argument: impl Into<String>) -> Self {
        Error::MissingArgument {
            function: function.into(),
            argument: argument.into(),
        }
    }

    /// Stable error code, used as the envelope cause.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidQuery(_) => "invalid_query",
            Error::AccessDenied(_) => "access_denied",
            Error::FieldNotFound(_) => "field_not_found",
            Error::UnsupportedType { .. } => "unsupported_type",
            Error::MissingArgument { .. } => "missing_argument",
            Error::WrongArgument { .. } => "wrong_argument",
            Error::EvaluateBoolOnly(_) => "evaluate_bool_only",
            Error::UnknownTransformation(_) => "unknown_transformation",
            Error::InvalidPolicy(_) => "invalid_policy",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::SourceNotFound(_) => "source_not_found",
            Error::SourceNotSupported(_) => "source_not_supported",
            Error::Closed(_) => "closed",
            Error::NotImplemented(_) => "not_implemented",
            Error::Timeout(_) => "timeout",
            Error::Upstream(_) => "upstream",
            Error::Internal(_) => "internal",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unauthenticated(_) => ErrorCategory::Unauthorized,
            Error::SourceNotFound(_) | Error::SourceNotSupported(_) => ErrorCategory::NotFound,
            Error::NotImplemented(_) => ErrorCategory::NotImplemented,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::Upstream(_) | Error::Internal(_) => ErrorCategory::InternalServerError,
            _ => ErrorCategory::BadRequest,
        }
    }

    /// Whether the message may contain details that must stay server-side.
    pub fn is_internal(&self) -> bool {
        self.category() == ErrorCategory::InternalServerError
    }

    /// Wire envelope for this error.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let envelope =
            ErrorEnvelope::new(self.code(), self.category()).with_message(self.to_string());
        match self {
            Error::AccessDenied(reason) => {
                let envelope = envelope.with_message(format!("reason={}", reason.code()));
                match reason {
                    DenyReason::FieldNotAllowed { field } => {
                        envelope.with_message(format!("field={field}"))
                    }
                    _ => envelope,
                }
            }
            _ => envelope,
        }
    }
}

impl From<sieve_proto::Error> for Error {
    fn from(err: sieve_proto::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
