//! Per-request context threaded through handler, evaluator, sources and
//! streams.
//!
//! The context carries the request id, an optional deadline and a
//! cancellation signal. Nothing else is ambient.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Request-scoped context. Cheap to clone; clones share cancellation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    deadline: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
}

/// Cancels every clone of the context it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl RequestContext {
    /// Create a context and the handle that cancels it.
    pub fn new(request_id: impl Into<String>) -> (Self, CancelHandle) {
        let (tx, _rx) = watch::channel(false);
        let cancel = Arc::new(tx);
        let ctx = Self {
            request_id: request_id.into(),
            deadline: None,
            cancel: cancel.clone(),
        };
        (ctx, CancelHandle { cancel })
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new("background").0
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Fail if the request was cancelled or its deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Timeout("request cancelled".to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Timeout("deadline exceeded".to_string()));
        }
        Ok(())
    }

    /// Resolves once the request is cancelled or the deadline passes.
    pub async fn done(&self) {
        let mut rx = self.cancel.subscribe();
        let cancelled = async move {
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => cancelled.await,
        }
    }

    /// Drive `fut` unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.done() => {
                self.check()?;
                Err(Error::Timeout("request cancelled".to_string()))
            }
            result = fut => result,
        }
    }

    /// Tracing span for work done on behalf of this request.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("request", request_id = %self.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_when_live() {
        let (ctx, _handle) = RequestContext::new("r-1");
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.request_id(), "r-1");
    }

    #[test]
    fn test_cancel_reaches_clones() {
        let (ctx, handle) = RequestContext::new("r-2");
        let clone = ctx.clone();
        handle.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(clone.check(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = RequestContext::background()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        match result {
            Err(Error::Timeout(msg)) => assert_eq!(msg, "deadline exceeded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_observes_cancel() {
        let (ctx, handle) = RequestContext::new("r-3");
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                ctx.run(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1)
                })
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert!(matches!(task.await.unwrap(), Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_run_returns_result() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
    }
}
