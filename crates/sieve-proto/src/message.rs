//! Request and stream frame types.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{Record, Status};

/// Metadata key holding the bearer credential.
pub const AUTHORIZATION: &str = "authorization";

/// One request metadata entry.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

/// A query submitted by a client.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct QueryRequest {
    /// Client-chosen correlation id.
    pub request_id: u64,
    pub metadata: Vec<MetadataEntry>,
    /// Label of the source to query.
    pub data_source: String,
    /// SQL `SELECT` text.
    pub query: String,
    /// Row limit, 0 for none.
    pub limit: i64,
    /// Row offset, 0 for none.
    pub offset: i64,
}

impl QueryRequest {
    pub fn new(request_id: u64, data_source: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            request_id,
            metadata: Vec::new(),
            data_source: data_source.into(),
            query: query.into(),
            limit: 0,
            offset: 0,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push(MetadataEntry {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Attach `Bearer <token>` as the authorization entry. The token must
    /// already be base64 encoded.
    pub fn with_bearer(self, encoded_token: &str) -> Self {
        self.with_metadata(AUTHORIZATION, format!("Bearer {encoded_token}"))
    }

    /// First metadata value for `key`, compared case-insensitively.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }
}

/// One frame of a response stream.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum StreamFrame {
    Record(Record),
    /// Trailer; always the last frame.
    End(Status),
}
