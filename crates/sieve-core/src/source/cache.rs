use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Source, SourceCatalog, SourceRegistry};
use crate::context::RequestContext;
use crate::error::{Error, Result};

/// Hot sources keyed by label.
///
/// Lookups of cached sources take a shared lock only. Opening a source
/// happens under a single writer lock; a caller that waited on the writer
/// re-checks the map and reuses whatever the previous holder opened, so
/// concurrent first requests for a label open it once.
pub struct SourceCache {
    catalog: Arc<dyn SourceCatalog>,
    registry: SourceRegistry,
    sources: RwLock<HashMap<String, Arc<dyn Source>>>,
    writer: Mutex<()>,
    closed: AtomicBool,
}

impl SourceCache {
    pub fn new(catalog: Arc<dyn SourceCatalog>, registry: SourceRegistry) -> Self {
        Self {
            catalog,
            registry,
            sources: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn cached(&self, label: &str) -> Option<Arc<dyn Source>> {
        self.sources.read().get(label).cloned()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("source cache".to_string()));
        }
        Ok(())
    }

    /// Return the hot source for `label`, opening it on first use.
    pub async fn get(&self, ctx: &RequestContext, label: &str) -> Result<Arc<dyn Source>> {
        self.ensure_open()?;
        if let Some(source) = self.cached(label) {
            return Ok(source);
        }

        let _writer = ctx.run(async { Ok(self.writer.lock().await) }).await?;
        self.ensure_open()?;
        if let Some(source) = self.cached(label) {
            debug!(request_id = ctx.request_id(), data_source = label, "source opened concurrently, reusing");
            return Ok(source);
        }

        let descriptor = self.catalog.get_source(ctx, label).await?;
        let factory = self.registry.get(&descriptor.source_type)?;
        let source = ctx.run(factory.open(&descriptor)).await?;

        self.sources
            .write()
            .insert(label.to_string(), Arc::clone(&source));
        info!(
            request_id = ctx.request_id(),
            data_source = label,
            source_type = %descriptor.source_type,
            "source opened"
        );
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every hot source. Later `get`s fail with `closed`.
    ///
    /// All sources are closed even if some fail; the failures are reported
    /// together.
    pub async fn close(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let sources: Vec<(String, Arc<dyn Source>)> = self.sources.write().drain().collect();
        let mut failures = Vec::new();
        for (label, source) in sources {
            match source.close().await {
                Ok(()) => debug!(data_source = %label, "source closed"),
                Err(e) => {
                    warn!(data_source = %label, error = %e, "failed to close source");
                    failures.push(format!("{label}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Upstream(format!(
                "failed to close {} source(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}
