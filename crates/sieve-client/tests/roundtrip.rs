//! Client against a live server over IPC.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sieve_client::{Client, ClientConfig, Error};
use sieve_proto::{ErrorCategory, Value};
use sieve_server::{RequestHandler, ServerConfig, Transport};

const DATASET: &str = r#"
tables:
  transactions:
    fields:
      - { name: processor, type: TEXT }
      - { name: card_number, type: VARCHAR }
    rows:
      - [visa, "4111111111111111"]
      - [amex, "371449635398431"]
"#;

const DIRECTORY: &str = r#"
identities:
  - { id: ana, tokens: [ana-token], roles: [analyst] }
roles:
  - { name: analyst, policies: [tokenized-cards] }
policies:
  - label: tokenized-cards
    version: 1
    created_at: 2024-01-01T00:00:00Z
    updated_at: 2024-01-01T00:00:00Z
    rules:
      - target: records:*
        action: read
        effect: allow
        fields: ["*"]
        transformations:
          - field: card_number
            function: tokenization
            args:
              maxSize: 16
sources:
  - { label: payments-db, type: memory, endpoint: payments.yaml }
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn query_over_ipc() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("payments.yaml"), DATASET).unwrap();
    std::fs::write(dir.path().join("directory.yaml"), DIRECTORY).unwrap();

    let address = format!("ipc://{}", dir.path().join("sieve.sock").display());
    let config = ServerConfig::new(dir.path().join("directory.yaml"))
        .without_tcp()
        .with_ipc_address(&address)
        .with_transport_workers(2)
        .with_shutdown_timeout(Duration::from_secs(1));
    let handler = Arc::new(RequestHandler::from_config(&config).unwrap());
    let transport = match Transport::new(&config, handler) {
        Ok(transport) => transport,
        Err(sieve_server::Error::Transport(msg)) if msg.contains("Permission denied") => return,
        Err(err) => panic!("transport creation failed: {err}"),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let server = tokio::spawn(async move { transport.run_until_shutdown(shutdown_rx).await });

    let client_config = ClientConfig::new(&address).with_timeout(Duration::from_secs(10));
    let client = Client::connect(client_config.clone().with_token("ana-token")).unwrap();

    let result = client
        .query("payments-db", "SELECT * FROM transactions")
        .await
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.get(0, "processor"), Some(&Value::from("visa")));
    match result.get(0, "card_number") {
        Some(Value::String(token)) => {
            assert_eq!(token.len(), 16);
            assert_ne!(token, "4111111111111111");
        }
        other => panic!("unexpected card_number {other:?}"),
    }

    let page = client
        .query_page("payments-db", "SELECT processor FROM transactions", 1, 1)
        .await
        .unwrap();
    assert_eq!(page.rows(), &[vec![Value::from("amex")]]);

    let anonymous = Client::connect(client_config).unwrap();
    match anonymous.query("payments-db", "SELECT * FROM transactions").await {
        Err(Error::Remote(envelope)) => assert_eq!(envelope.category, ErrorCategory::Unauthorized),
        other => panic!("expected an unauthorized trailer, got {other:?}"),
    }

    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
