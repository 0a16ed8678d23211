//! Sieve server library.
//!
//! Serves the connector over nng: each request is authenticated, checked
//! against the caller's policies, rewritten, run against the upstream
//! source, and answered with a transformed record stream.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod sink;
pub mod transport;

pub use config::{Args, ServerConfig};
pub use error::Error;
pub use handler::{Reply, RequestHandler};
pub use sink::FrameSink;
pub use transport::{Transport, TransportMetrics};
