//! Wire protocol for the sieve connector.
//!
//! A client sends one [`QueryRequest`]; the connector answers with a record
//! stream in which the schema travels once, on the first [`Record`], and
//! every record after it carries positional [`Value`]s aligned with that
//! schema. The stream closes with a [`Status`] trailer that holds an
//! [`ErrorEnvelope`] on failure.
//!
//! # Modules
//!
//! - [`value`] - Field values and their wire tags
//! - [`schema`] - Column types and ordered schemas
//! - [`record`] - Record frames
//! - [`message`] - Requests and stream frames
//! - [`status`] - Trailers and error envelopes
//! - [`framing`] - Length-prefix framing
//! - [`codec`] - rkyv encoding of requests and streams
//! - [`error`] - Protocol error types

pub mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod record;
pub mod schema;
pub mod status;
pub mod value;

pub use codec::{decode_request, decode_stream, encode_request, put_stream_frame, DecodedStream};
pub use error::Error;
pub use message::{MetadataEntry, QueryRequest, StreamFrame, AUTHORIZATION};
pub use record::Record;
pub use schema::{FieldInfo, FieldType, Schema};
pub use status::{ErrorCategory, ErrorEnvelope, Status};
pub use value::Value;
