//! Sieve client - async client for the sieve privacy connector.
//!
//! # Quick Start
//!
//! ```ignore
//! use sieve_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ClientConfig::localhost().with_token("ana-token"))?;
//!     let result = client.query("payments-db", "SELECT * FROM transactions").await?;
//!     println!("{} rows", result.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;

pub use client::{Client, QueryResult};
pub use config::ClientConfig;
pub use connection::Connection;
pub use error::Error;

/// Re-export protocol types.
pub use sieve_proto as proto;
