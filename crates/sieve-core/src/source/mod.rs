//! Upstream data sources.
//!
//! A [`Source`] executes rewritten queries against one upstream and writes a
//! schema frame followed by records into a [`RecordSink`]. Sources are
//! opened by a [`SourceFactory`] chosen by the descriptor's source type and
//! kept hot in the [`SourceCache`].

mod cache;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sieve_lang::Query;
use sieve_proto::Schema;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::stream::RecordSink;

pub use cache::SourceCache;
pub use memory::{MemoryFactory, MemorySource, MemoryTable};

/// How to reach an upstream.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub label: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl SourceDescriptor {
    pub fn new(
        label: impl Into<String>,
        source_type: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            source_type: source_type.into(),
            endpoint: endpoint.into(),
            credentials: None,
            service_id: None,
        }
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("label", &self.label)
            .field("source_type", &self.source_type)
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .field("service_id", &self.service_id)
            .finish()
    }
}

/// A hot connection to one upstream.
#[async_trait]
pub trait Source: Send + Sync {
    fn label(&self) -> &str;

    /// Schema of the entity `query` targets.
    async fn schema(&self, ctx: &RequestContext, query: &Query) -> Result<Schema>;

    /// Execute `query`, writing a schema frame and then records to `sink`.
    async fn query(
        &self,
        ctx: &RequestContext,
        query: &Query,
        schema: &Schema,
        sink: &mut dyn RecordSink,
    ) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens sources of one type.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, descriptor: &SourceDescriptor) -> Result<Arc<dyn Source>>;
}

/// Resolves source labels to descriptors.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn get_source(&self, ctx: &RequestContext, label: &str) -> Result<SourceDescriptor>;
}

/// Source type to factory map. Read-only once built.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    factories: HashMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder::default()
    }

    pub fn get(&self, source_type: &str) -> Result<Arc<dyn SourceFactory>> {
        self.factories
            .get(source_type)
            .cloned()
            .ok_or_else(|| Error::SourceNotSupported(source_type.to_string()))
    }

    pub fn source_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}

#[derive(Default)]
pub struct SourceRegistryBuilder {
    factories: HashMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistryBuilder {
    pub fn register(mut self, source_type: impl Into<String>, factory: Arc<dyn SourceFactory>) -> Self {
        self.factories.insert(source_type.into(), factory);
        self
    }

    pub fn build(self) -> SourceRegistry {
        SourceRegistry {
            factories: self.factories,
        }
    }
}
