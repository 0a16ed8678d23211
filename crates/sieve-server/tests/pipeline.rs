//! End-to-end request handling against an in-memory source.

use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sieve_core::RequestContext;
use sieve_proto::{decode_stream, DecodedStream, ErrorCategory, ErrorEnvelope, QueryRequest, Status, Value};
use sieve_server::auth::encode_token;
use sieve_server::{RequestHandler, ServerConfig};

const DATASET: &str = r#"
tables:
  transactions:
    fields:
      - { name: id, type: BIGINT }
      - { name: processor, type: TEXT }
      - { name: card_number, type: VARCHAR, size: 19 }
      - { name: value, type: DOUBLE }
      - { name: vendor, type: TEXT }
      - { name: ssn, type: VARCHAR, size: 11 }
    rows:
      - [1, visa, "4111111111111111", 12.5, acme, "123-45-6789"]
      - [2, amex, "371449635398431", 250.75, globex, "987-65-4321"]
      - [3, visa, "4012888888881881", 99.99, acme, "555-12-3456"]
  counters:
    fields:
      - { name: my_field, type: BIGINT }
      - { name: name, type: VARCHAR }
    rows:
      - [64, first]
      - [10, second]
"#;

const POLICIES: &str = r#"
label: card-readers
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.transactions
    action: read
    effect: allow
    fields: [card_number, processor]
---
label: auditors
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.transactions
    action: read
    effect: allow
    fields: ["*"]
  - target: records:c.transactions
    action: read
    effect: deny
    fields: [card_number]
---
label: incrementers
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.counters
    action: read
    effect: allow
    fields: ["*"]
    transformations:
      - field: my_field
        function: plusOne
        where: "my_field == 64"
---
label: broken-where
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.counters
    action: read
    effect: allow
    fields: ["*"]
    transformations:
      - field: my_field
        function: plusOne
        where: "nonexistent == 64"
---
label: bad-type
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.counters
    action: read
    effect: allow
    fields: ["*"]
    transformations:
      - field: name
        function: plusOne
---
label: outsiders
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:other.table
    action: read
    effect: allow
    fields: ["*"]
---
label: masked-cards
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.transactions
    action: read
    effect: allow
    fields: [card_number, vendor]
    transformations:
      - field: card_number
        function: masking
        args:
          visibleChars: 4
  - target: records:c.transactions
    action: read
    effect: deny
    where:
      - vendor: globex
"#;

const DIRECTORY: &str = r#"
identities:
  - { id: cora, tokens: [cora-token], roles: [card-reader] }
  - { id: audrey, tokens: [audrey-token], roles: [auditor] }
  - { id: ivan, tokens: [ivan-token], roles: [incrementer] }
  - { id: bea, tokens: [bea-token], roles: [broken] }
  - { id: tad, tokens: [tad-token], roles: [typo] }
  - { id: otto, tokens: [otto-token], roles: [outsider] }
  - { id: mia, tokens: [mia-token], roles: [masker] }
roles:
  - { name: card-reader, policies: [card-readers] }
  - { name: auditor, policies: [auditors] }
  - { name: incrementer, policies: [incrementers] }
  - { name: broken, policies: [broken-where] }
  - { name: typo, policies: [bad-type] }
  - { name: outsider, policies: [outsiders] }
  - { name: masker, policies: [masked-cards] }
policy_files: [policies.yaml]
sources:
  - label: payments-db
    type: memory
    endpoint: payments.yaml
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    handler: RequestHandler,
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn fixture_with(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "payments.yaml", DATASET);
    write(dir.path(), "policies.yaml", POLICIES);
    write(dir.path(), "directory.yaml", DIRECTORY);

    let config = configure(ServerConfig::new(dir.path().join("directory.yaml")));
    let handler = RequestHandler::from_config(&config).unwrap();
    Fixture { _dir: dir, handler }
}

fn fixture() -> Fixture {
    fixture_with(|config| config)
}

impl Fixture {
    async fn query(&self, token: &str, sql: &str) -> DecodedStream {
        self.request(QueryRequest::new(7, "payments-db", sql).with_bearer(&encode_token(token)))
            .await
    }

    async fn request(&self, request: QueryRequest) -> DecodedStream {
        let reply = self
            .handler
            .respond(&RequestContext::new("7").0, &request)
            .await;
        let decoded = decode_stream(&reply.bytes).unwrap();
        assert_eq!(decoded.status, reply.status);
        decoded
    }
}

fn field_names(stream: &DecodedStream) -> Vec<&str> {
    stream.records[0]
        .schema
        .as_ref()
        .expect("first record carries the schema")
        .field_names()
        .collect()
}

fn rows(stream: &DecodedStream) -> Vec<Vec<Value>> {
    stream.records[1..].iter().map(|r| r.fields.clone()).collect()
}

fn envelope(stream: &DecodedStream) -> &ErrorEnvelope {
    match &stream.status {
        Status::Error(envelope) => envelope,
        Status::Ok => panic!("expected an error trailer"),
    }
}

#[tokio::test]
async fn select_star_rewritten_to_allowed_subset() {
    let fixture = fixture();
    let stream = fixture.query("cora-token", "SELECT * FROM transactions").await;

    assert!(stream.status.is_ok());
    assert_eq!(field_names(&stream), vec!["processor", "card_number"]);
    assert_eq!(
        rows(&stream),
        vec![
            vec![Value::from("visa"), Value::from("4111111111111111")],
            vec![Value::from("amex"), Value::from("371449635398431")],
            vec![Value::from("visa"), Value::from("4012888888881881")],
        ]
    );
}

#[tokio::test]
async fn deny_dominates_allow_at_field_level() {
    let fixture = fixture();

    let denied = fixture
        .query("audrey-token", "SELECT card_number FROM transactions")
        .await;
    assert!(denied.records.is_empty());
    let env = envelope(&denied);
    assert_eq!(env.cause, "access_denied");
    assert_eq!(env.category, ErrorCategory::BadRequest);

    let allowed = fixture
        .query("audrey-token", "SELECT processor FROM transactions")
        .await;
    assert!(allowed.status.is_ok());
    assert_eq!(field_names(&allowed), vec!["processor"]);
    assert_eq!(rows(&allowed).len(), 3);
}

#[tokio::test]
async fn conditional_transformation_on_matching_where() {
    let fixture = fixture();
    let stream = fixture.query("ivan-token", "SELECT my_field FROM counters").await;

    assert!(stream.status.is_ok());
    assert_eq!(
        rows(&stream),
        vec![vec![Value::Int64(65)], vec![Value::Int64(10)]]
    );
}

#[tokio::test]
async fn invalid_conditional_variable_fails_the_stream() {
    let fixture = fixture();
    let stream = fixture.query("bea-token", "SELECT * FROM counters").await;

    assert_eq!(stream.records.len(), 1, "only the schema frame is emitted");
    assert!(stream.records[0].fields.is_empty());
    let env = envelope(&stream);
    assert_eq!(env.cause, "field_not_found");
    assert_eq!(
        env.to_string(),
        "field_not_found: Could not evaluate where clause because 'nonexistent' is not a field in payments-db"
    );
}

#[tokio::test]
async fn unsupported_transform_type_emits_nothing() {
    let fixture = fixture();
    let stream = fixture.query("tad-token", "SELECT * FROM counters").await;

    assert!(stream.records.is_empty());
    assert_eq!(
        envelope(&stream).to_string(),
        "unsupported_type: Attempted to call plusOne transform on an unsupported type VARCHAR"
    );
}

#[tokio::test]
async fn no_matching_policy() {
    let fixture = fixture();
    let stream = fixture.query("otto-token", "SELECT * FROM transactions").await;

    assert!(stream.records.is_empty());
    let env = envelope(&stream);
    assert_eq!(env.cause, "access_denied");
    assert_eq!(env.messages[0], "No policies match the provided query");
}

#[tokio::test]
async fn deny_where_filters_rows_and_masks() {
    let fixture = fixture();
    let stream = fixture
        .query("mia-token", "SELECT card_number, vendor FROM transactions")
        .await;

    assert!(stream.status.is_ok());
    assert_eq!(
        rows(&stream),
        vec![
            vec![Value::from("************1111"), Value::from("acme")],
            vec![Value::from("************1881"), Value::from("acme")],
        ]
    );
}

#[tokio::test]
async fn repeated_masked_column_is_refused() {
    let fixture = fixture();
    let stream = fixture
        .query("mia-token", "SELECT card_number, card_number FROM transactions")
        .await;

    assert!(stream.records.is_empty());
    assert_eq!(envelope(&stream).cause, "invalid_query");
}

#[tokio::test]
async fn request_limit_and_offset() {
    let fixture = fixture();
    let request = QueryRequest::new(8, "payments-db", "SELECT processor FROM transactions")
        .with_bearer(&encode_token("audrey-token"))
        .with_limit(1)
        .with_offset(1);
    let stream = fixture.request(request).await;
    assert_eq!(rows(&stream), vec![vec![Value::from("amex")]]);
}

#[tokio::test]
async fn authentication_failures() {
    let fixture = fixture();

    let stream = fixture.query("stolen-token", "SELECT * FROM transactions").await;
    assert_eq!(envelope(&stream).category, ErrorCategory::Unauthorized);

    let anonymous = fixture
        .request(QueryRequest::new(9, "payments-db", "SELECT * FROM transactions"))
        .await;
    assert_eq!(envelope(&anonymous).cause, "unauthenticated");
}

#[tokio::test]
async fn unknown_source_and_bad_sql() {
    let fixture = fixture();

    let request = QueryRequest::new(10, "crm", "SELECT * FROM contacts")
        .with_bearer(&encode_token("cora-token"));
    let stream = fixture.request(request).await;
    assert_eq!(envelope(&stream).cause, "source_not_found");
    assert_eq!(envelope(&stream).category, ErrorCategory::NotFound);

    let stream = fixture.query("cora-token", "DROP TABLE transactions").await;
    assert_eq!(envelope(&stream).cause, "invalid_query");
}

#[tokio::test]
async fn expired_deadline_maps_to_timeout() {
    let fixture = fixture_with(|config| config.with_request_timeout(Duration::ZERO));
    let stream = fixture.query("cora-token", "SELECT * FROM transactions").await;
    assert_eq!(envelope(&stream).category, ErrorCategory::Timeout);
}
