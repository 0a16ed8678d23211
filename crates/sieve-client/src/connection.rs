//! Connection management for the sieve client.

use async_nng::AsyncContext;
use nng::options::transport::tls::CaFile;
use nng::options::Options;
use nng::{DialerBuilder, Message, Protocol, Socket};

use sieve_proto::{decode_stream, encode_request, DecodedStream, QueryRequest};

use crate::config::ClientConfig;
use crate::error::Error;

const TLS_SCHEME: &str = "tls+tcp://";

/// A REQ socket dialed to a connector.
///
/// Each request runs on its own nng context, so one connection can carry
/// concurrent queries.
pub struct Connection {
    socket: Socket,
    config: ClientConfig,
}

impl Connection {
    /// Dial the configured address.
    pub fn establish(config: ClientConfig) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Req0)
            .map_err(|e| Error::Connection(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<nng::options::RecvMaxSize>(config.max_message_size)
            .map_err(|e| Error::Connection(format!("failed to set max message size: {}", e)))?;
        socket
            .set_opt::<nng::options::SendTimeout>(Some(config.timeout))
            .map_err(|e| Error::Connection(format!("failed to set send timeout: {}", e)))?;
        socket
            .set_opt::<nng::options::RecvTimeout>(Some(config.timeout))
            .map_err(|e| Error::Connection(format!("failed to set recv timeout: {}", e)))?;

        match &config.tls_ca_file {
            Some(ca_file) if config.address.starts_with(TLS_SCHEME) => {
                let dialer = DialerBuilder::new(&socket, &config.address).map_err(|e| {
                    Error::Connection(format!("failed to create dialer for {}: {}", config.address, e))
                })?;
                dialer
                    .set_opt::<CaFile>(ca_file.to_string_lossy().into_owned())
                    .map_err(|e| {
                        Error::Connection(format!(
                            "failed to load CA file {}: {}",
                            ca_file.display(),
                            e
                        ))
                    })?;
                dialer.start(false).map_err(|(_, e)| {
                    Error::Connection(format!("failed to connect to {}: {}", config.address, e))
                })?;
            }
            _ => socket.dial(&config.address).map_err(|e| {
                Error::Connection(format!("failed to connect to {}: {}", config.address, e))
            })?,
        }

        Ok(Self { socket, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn create_context(&self) -> Result<AsyncContext<'_>, Error> {
        AsyncContext::try_from(&self.socket)
            .map_err(|e| Error::Connection(format!("failed to create async context: {}", e)))
    }

    /// Send one request and decode the whole reply stream.
    pub async fn send(&self, request: &QueryRequest) -> Result<DecodedStream, Error> {
        let framed = encode_request(request)?;
        if framed.len() > self.config.max_message_size {
            return Err(Error::Connection(format!(
                "request too large: {} bytes (max: {})",
                framed.len(),
                self.config.max_message_size
            )));
        }

        let mut ctx = self.create_context()?;
        ctx.send(Message::from(framed.as_slice()), Some(self.config.timeout))
            .await
            .map_err(|(_, e)| match e {
                nng::Error::TimedOut => Error::Timeout,
                _ => Error::Connection(format!("failed to send request: {}", e)),
            })?;

        let reply = ctx
            .receive(Some(self.config.timeout))
            .await
            .map_err(|e| match e {
                nng::Error::TimedOut => Error::Timeout,
                _ => Error::Connection(format!("failed to receive reply: {}", e)),
            })?;

        Ok(decode_stream(reply.as_slice())?)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .finish()
    }
}
