//! Sieve client API.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sieve_proto::{DecodedStream, QueryRequest, Record, Schema, Status, Value};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::Error;

/// Records returned by one query, with the schema they align with.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Check a decoded stream and split it into schema and rows.
    pub fn from_stream(stream: DecodedStream) -> Result<Self, Error> {
        if let Status::Error(envelope) = stream.status {
            return Err(Error::Remote(envelope));
        }

        let mut records = stream.records.into_iter();
        let first: Record = records.next().ok_or_else(|| {
            sieve_proto::Error::InvalidStream("successful stream without a schema".to_string())
        })?;
        let schema = first.schema.ok_or_else(|| {
            sieve_proto::Error::InvalidStream("first record does not carry a schema".to_string())
        })?;

        let mut rows = Vec::new();
        if !first.fields.is_empty() {
            rows.push(first.fields);
        }
        rows.extend(records.map(|r| r.fields));
        Ok(Self { schema, rows })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of column `name` in row `row`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.schema.field_index(name)?;
        self.rows.get(row)?.get(index)
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

/// A client for a sieve connector.
///
/// # Example
///
/// ```ignore
/// use sieve_client::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new("tls+tcp://connector:8443")
///         .with_tls_ca_file("/etc/sieve/ca.pem")
///         .with_token("ana-token");
///     let client = Client::connect(config)?;
///
///     let result = client.query("payments-db", "SELECT processor FROM transactions").await?;
///     for row in result.rows() {
///         println!("{row:?}");
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    bearer: Option<String>,
    next_request_id: AtomicU64,
}

impl Client {
    pub fn connect(config: ClientConfig) -> Result<Self, Error> {
        let bearer = config.token.as_deref().map(|t| STANDARD.encode(t.as_bytes()));
        Ok(Self {
            connection: Connection::establish(config)?,
            bearer,
            next_request_id: AtomicU64::new(1),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `sql` against the source labeled `data_source`.
    pub async fn query(&self, data_source: &str, sql: &str) -> Result<QueryResult, Error> {
        self.query_page(data_source, sql, 0, 0).await
    }

    /// Like [`Client::query`], with a row limit and offset (0 for none).
    pub async fn query_page(
        &self,
        data_source: &str,
        sql: &str,
        limit: i64,
        offset: i64,
    ) -> Result<QueryResult, Error> {
        let mut request = QueryRequest::new(self.next_request_id(), data_source, sql)
            .with_limit(limit)
            .with_offset(offset);
        if let Some(bearer) = &self.bearer {
            request = request.with_bearer(bearer);
        }
        self.send(&request).await
    }

    /// Send a prepared request as is.
    pub async fn send(&self, request: &QueryRequest) -> Result<QueryResult, Error> {
        QueryResult::from_stream(self.connection.send(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_proto::{ErrorCategory, ErrorEnvelope, FieldInfo, FieldType};

    fn schema() -> Schema {
        Schema::new("payments-db", "transactions")
            .with_field(FieldInfo::new("processor", FieldType::Text))
    }

    #[test]
    fn test_result_from_schema_frame_stream() {
        let stream = DecodedStream {
            records: vec![
                Record::schema_frame(schema()),
                Record::new(vec![Value::from("visa")]),
                Record::new(vec![Value::from("amex")]),
            ],
            status: Status::Ok,
        };
        let result = QueryResult::from_stream(stream).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(1, "processor"), Some(&Value::from("amex")));
        assert_eq!(result.get(0, "ssn"), None);
    }

    #[test]
    fn test_result_schema_on_first_data_record() {
        let stream = DecodedStream {
            records: vec![Record::new(vec![Value::from("visa")]).with_schema(schema())],
            status: Status::Ok,
        };
        let result = QueryResult::from_stream(stream).unwrap();
        assert_eq!(result.rows(), &[vec![Value::from("visa")]]);
    }

    #[test]
    fn test_error_trailer() {
        let envelope = ErrorEnvelope::new("access_denied", ErrorCategory::BadRequest)
            .with_message("No policies match the provided query");
        let stream = DecodedStream {
            records: vec![],
            status: Status::Error(envelope.clone()),
        };
        let err = QueryResult::from_stream(stream).unwrap_err();
        assert_eq!(err.envelope(), Some(&envelope));
        assert_eq!(err.envelope().map(|e| e.status_code()), Some(400));
    }
}
