//! Server transport layer using async-nng.
//!
//! A REP socket listens on TCP and/or IPC. Worker threads each drive an
//! nng context on a small runtime of their own and hand every decoded
//! request to the main tokio runtime, so request handling shares one
//! scheduler regardless of which worker received it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_nng::AsyncContext;
use nng::options::transport::tls::CertKeyFile;
use nng::options::Options;
use nng::{ListenerBuilder, Message, Protocol, Socket};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use sieve_core::{CancelHandle, RequestContext};
use sieve_proto::decode_request;

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::{Reply, RequestHandler};

const RECEIVE_POLL: Duration = Duration::from_secs(1);

/// Pause after a receive error before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Grace period for cancelled requests to write their trailer.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Transport metrics for monitoring.
#[derive(Debug)]
pub struct TransportMetrics {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    started_at: Instant,
}

impl TransportMetrics {
    fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn record(&self, success: bool, received_bytes: usize, sent_bytes: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_received.fetch_add(received_bytes as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent_bytes as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests currently being handled, with the handles that cancel them.
#[derive(Default)]
struct InFlight {
    next: AtomicU64,
    requests: Mutex<HashMap<u64, CancelHandle>>,
    idle: Notify,
}

impl InFlight {
    fn register(&self, cancel: CancelHandle) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().insert(id, cancel);
        id
    }

    fn complete(&self, id: u64) {
        let mut requests = self.requests.lock();
        requests.remove(&id);
        if requests.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn len(&self) -> usize {
        self.requests.lock().len()
    }

    fn cancel_all(&self) {
        for cancel in self.requests.lock().values() {
            cancel.cancel();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.len() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Server transport that handles incoming connections.
pub struct Transport {
    socket: Socket,
    handler: Arc<RequestHandler>,
    max_message_size: usize,
    metrics: Arc<TransportMetrics>,
    in_flight: Arc<InFlight>,
    worker_count: usize,
    shutdown_timeout: Duration,
}

impl Transport {
    /// Create a transport listening on the configured addresses.
    pub fn new(config: &ServerConfig, handler: Arc<RequestHandler>) -> Result<Self, Error> {
        config.validate()?;

        let socket = Socket::new(Protocol::Rep0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;
        socket
            .set_opt::<nng::options::RecvMaxSize>(config.max_message_size)
            .map_err(|e| Error::Transport(format!("failed to set max message size: {}", e)))?;

        for address in config.tcp_address.iter().chain(config.ipc_address.iter()) {
            match &config.tls_cert_key {
                Some(cert_key) if ServerConfig::is_tls(address) => {
                    listen_tls(&socket, address, cert_key)?;
                }
                _ => socket.listen(address).map_err(|e| {
                    Error::Transport(format!("failed to listen on {}: {}", address, e))
                })?,
            }
            tracing::info!(address = %address, tls = ServerConfig::is_tls(address), "listening");
        }

        Ok(Self {
            socket,
            handler,
            max_message_size: config.max_message_size,
            metrics: Arc::new(TransportMetrics::new()),
            in_flight: Arc::new(InFlight::default()),
            worker_count: config.transport_workers.max(1),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Serve until `shutdown` fires, then drain and close sources.
    ///
    /// Workers stop accepting first. In-flight requests get the shutdown
    /// timeout to finish; whatever is left is cancelled and answers with a
    /// `timeout` trailer.
    pub async fn run_until_shutdown(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let handles = self.spawn_worker_threads(stop_flag.clone())?;
        tracing::info!(workers = handles.len(), "transport ready, accepting requests");

        let _ = shutdown.recv().await;
        stop_flag.store(true, Ordering::SeqCst);
        tracing::info!(
            in_flight = self.in_flight.len(),
            timeout_secs = self.shutdown_timeout.as_secs(),
            "shutdown signal received, draining requests"
        );

        if tokio::time::timeout(self.shutdown_timeout, self.in_flight.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.in_flight.len(),
                "shutdown timeout elapsed, cancelling requests"
            );
            self.in_flight.cancel_all();
            let _ = tokio::time::timeout(CANCEL_GRACE, self.in_flight.wait_idle()).await;
        }

        let _ = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;

        if let Err(e) = self.handler.sources().close().await {
            tracing::error!(error = %e, "failed to close sources");
        }

        tracing::info!(
            total_requests = self.metrics.total_requests(),
            failed = self.metrics.failed_requests(),
            bytes_received = self.metrics.total_bytes_received(),
            bytes_sent = self.metrics.total_bytes_sent(),
            uptime_secs = self.metrics.uptime().as_secs(),
            "transport stopped"
        );
        Ok(())
    }

    fn worker(&self, runtime: Handle) -> TransportWorker {
        TransportWorker {
            handler: self.handler.clone(),
            max_message_size: self.max_message_size,
            in_flight: self.in_flight.clone(),
            runtime,
        }
    }

    fn spawn_worker_threads(
        &self,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<Vec<thread::JoinHandle<()>>, Error> {
        let runtime = Handle::current();
        let mut handles = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let socket = self.socket.clone();
            let worker = self.worker(runtime.clone());
            let metrics = self.metrics.clone();
            let stop_flag = stop_flag.clone();

            let handle = thread::Builder::new()
                .name(format!("sieve-transport-{}", worker_id))
                .spawn(move || {
                    let local = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(local) => local,
                        Err(e) => {
                            tracing::error!(error = %e, worker_id, "failed to build worker runtime");
                            return;
                        }
                    };
                    local.block_on(worker.serve(worker_id, &socket, &metrics, &stop_flag));
                })
                .map_err(|e| Error::Transport(format!("failed to spawn transport worker: {}", e)))?;

            handles.push(handle);
        }

        Ok(handles)
    }
}

/// Start a TLS listener presenting the certificate chain and key in
/// `cert_key`.
fn listen_tls(socket: &Socket, address: &str, cert_key: &Path) -> Result<(), Error> {
    let listener = ListenerBuilder::new(socket, address)
        .map_err(|e| Error::Transport(format!("failed to create listener on {}: {}", address, e)))?;
    listener
        .set_opt::<CertKeyFile>(cert_key.to_string_lossy().into_owned())
        .map_err(|e| {
            Error::Transport(format!(
                "failed to load TLS certificate {}: {}",
                cert_key.display(),
                e
            ))
        })?;
    listener
        .start()
        .map_err(|(_, e)| Error::Transport(format!("failed to listen on {}: {}", address, e)))?;
    Ok(())
}

/// How long to wait before receiving again after `error`; `None` once the
/// socket is closed.
fn receive_backoff(error: &nng::Error) -> Option<Duration> {
    match error {
        nng::Error::TimedOut => Some(Duration::ZERO),
        nng::Error::Closed => None,
        _ => Some(RECEIVE_BACKOFF),
    }
}

struct TransportWorker {
    handler: Arc<RequestHandler>,
    max_message_size: usize,
    in_flight: Arc<InFlight>,
    runtime: Handle,
}

impl TransportWorker {
    async fn serve(
        &self,
        worker_id: usize,
        socket: &Socket,
        metrics: &TransportMetrics,
        stop_flag: &AtomicBool,
    ) {
        let mut ctx = match AsyncContext::try_from(socket) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(error = %e, worker_id, "failed to create async context");
                return;
            }
        };

        loop {
            if stop_flag.load(Ordering::SeqCst) {
                tracing::debug!(worker_id, "transport worker stopping");
                return;
            }

            match ctx.receive(Some(RECEIVE_POLL)).await {
                Ok(msg) => {
                    let received_bytes = msg.len();
                    let reply = self.process(msg.as_slice()).await;
                    let sent_bytes = reply.bytes.len();

                    let response = Message::from(reply.bytes.as_slice());
                    if let Err((_, e)) = ctx.send(response, None).await {
                        tracing::error!(error = %e, worker_id, "failed to send reply");
                        metrics.record(false, received_bytes, 0);
                    } else {
                        metrics.record(reply.is_ok(), received_bytes, sent_bytes);
                    }
                }
                Err(e) => match receive_backoff(&e) {
                    Some(Duration::ZERO) => continue,
                    Some(backoff) => {
                        tracing::error!(error = %e, worker_id, "receive error");
                        tokio::time::sleep(backoff).await;
                    }
                    None => {
                        tracing::debug!(worker_id, "socket closed, transport worker stopping");
                        return;
                    }
                },
            }
        }
    }

    /// Decode one request message and run it on the main runtime.
    async fn process(&self, data: &[u8]) -> Reply {
        if data.len() > self.max_message_size {
            let (ctx, _) = RequestContext::new("unknown");
            return self.handler.reject(
                &ctx,
                &sieve_core::Error::InvalidQuery(format!(
                    "message too large: {} bytes (max: {})",
                    data.len(),
                    self.max_message_size
                )),
            );
        }

        let request = match decode_request(data) {
            Ok(request) => request,
            Err(e) => {
                let (ctx, _) = RequestContext::new("unknown");
                return self.handler.reject(
                    &ctx,
                    &sieve_core::Error::InvalidQuery(format!("malformed request: {e}")),
                );
            }
        };

        let (ctx, cancel) = RequestContext::new(request.request_id.to_string());
        let id = self.in_flight.register(cancel);
        let handler = self.handler.clone();
        let task_ctx = ctx.clone();
        let task = self
            .runtime
            .spawn(async move { handler.respond(&task_ctx, &request).await });
        let reply = match task.await {
            Ok(reply) => reply,
            Err(e) => self.handler.reject(
                &ctx,
                &sieve_core::Error::Internal(format!("request task failed: {e}")),
            ),
        };
        self.in_flight.complete(id);
        reply
    }
}
