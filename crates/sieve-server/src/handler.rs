//! Request handler: authenticate, evaluate, rewrite, stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sieve_core::{
    Directory, Error, IdentityService, MemoryFactory, PolicyEvaluator, RecordSink, RequestContext,
    Result, SourceCache, SourceCatalog, SourceRegistry, TransformStream, TransformationRegistry,
};
use sieve_lang::Query;
use sieve_proto::{ErrorCategory, ErrorEnvelope, QueryRequest, Status};
use tracing::{debug, error, info, warn, Instrument};

use crate::auth::{self, JwtIdentityService};
use crate::config::{ServerConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::sink::FrameSink;

/// An encoded reply and the status it ends with.
#[derive(Debug)]
pub struct Reply {
    pub bytes: Vec<u8>,
    pub status: Status,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Handles query requests end to end.
pub struct RequestHandler {
    identity: Arc<dyn IdentityService>,
    sources: Arc<SourceCache>,
    registry: TransformationRegistry,
    evaluator: PolicyEvaluator,
    request_timeout: Duration,
    max_message_size: usize,
}

impl RequestHandler {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        sources: Arc<SourceCache>,
        registry: TransformationRegistry,
    ) -> Self {
        Self {
            identity,
            sources,
            registry,
            evaluator: PolicyEvaluator::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Load the directory named by `config` and wire the built-in
    /// transformations and source drivers around it.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let registry = TransformationRegistry::builder().with_builtins().build();
        let directory = Arc::new(Directory::load(&config.directory_path, &registry)?);

        let sources = SourceRegistry::builder().register(
            sieve_core::source::memory::SOURCE_TYPE,
            Arc::new(MemoryFactory::new()),
        );
        #[cfg(feature = "postgres")]
        let sources = sources.register(
            sieve_core::source::postgres::SOURCE_TYPE,
            Arc::new(sieve_core::source::postgres::PostgresFactory),
        );
        let catalog: Arc<dyn SourceCatalog> = directory.clone();
        let cache = Arc::new(SourceCache::new(catalog, sources.build()));

        let identity: Arc<dyn IdentityService> = match &config.jwt_secret {
            Some(secret) => {
                info!("bearer tokens are validated as JWTs");
                Arc::new(JwtIdentityService::with_secret(directory, secret.as_bytes()))
            }
            None => directory,
        };

        Ok(Self::new(identity, cache, registry)
            .with_request_timeout(config.request_timeout)
            .with_max_message_size(config.max_message_size))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn sources(&self) -> &Arc<SourceCache> {
        &self.sources
    }

    /// Run `request` and stream its records into `sink`.
    ///
    /// Nothing reaches `sink` until every construction-time check has
    /// passed; the first record carries the schema. Returns the number of
    /// data records sent.
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        request: &QueryRequest,
        sink: &mut dyn RecordSink,
    ) -> Result<u64> {
        let token = auth::bearer_token(request)?;
        let identity = self.identity.validate_token(ctx, &token).await?;
        let policies = self.identity.identity_policies(ctx, &identity.id).await?;
        debug!(
            request_id = ctx.request_id(),
            identity = %identity.id,
            policies = policies.len(),
            "authenticated"
        );

        let query = parse_query(request)?;
        let source = self.sources.get(ctx, &request.data_source).await?;
        let schema = source.schema(ctx, &query).await?;

        let evaluation = self.evaluator.evaluate(&query, &schema, &policies)?;
        let projected = match evaluation.query.fields() {
            Some(fields) => schema.project(fields),
            None => schema.clone(),
        };

        let mut stream = TransformStream::new(
            sink,
            projected,
            &evaluation.transformations,
            &self.registry,
            &request.data_source,
        )?;
        source
            .query(ctx, &evaluation.query, &schema, &mut stream)
            .await?;
        let records = stream.records();
        stream.finish().await?;
        Ok(records)
    }

    /// Run `request` under the configured deadline and encode the reply,
    /// trailer included.
    pub async fn respond(&self, ctx: &RequestContext, request: &QueryRequest) -> Reply {
        let ctx = ctx.clone().with_timeout(self.request_timeout);
        let started = Instant::now();
        let mut sink = FrameSink::new(self.max_message_size);

        let result = ctx
            .run(self.handle(&ctx, request, &mut sink))
            .instrument(ctx.span())
            .await;
        let status = match result {
            Ok(records) => {
                info!(
                    request_id = ctx.request_id(),
                    data_source = %request.data_source,
                    records,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "query completed"
                );
                Status::Ok
            }
            Err(e) => Status::Error(self.envelope(&ctx, &e)),
        };
        self.finish(&ctx, sink, status)
    }

    /// Reply for a request that failed before it could be handled.
    pub fn reject(&self, ctx: &RequestContext, err: &Error) -> Reply {
        let status = Status::Error(self.envelope(ctx, err));
        self.finish(ctx, FrameSink::new(self.max_message_size), status)
    }

    fn finish(&self, ctx: &RequestContext, sink: FrameSink, status: Status) -> Reply {
        match sink.finish(status.clone()) {
            Ok(bytes) => Reply { bytes, status },
            Err(e) => {
                error!(request_id = ctx.request_id(), error = %e, "failed to encode reply");
                let status = Status::Error(generic_envelope(ctx));
                let bytes = FrameSink::new(self.max_message_size)
                    .finish(status.clone())
                    .unwrap_or_default();
                Reply { bytes, status }
            }
        }
    }

    /// Wire envelope for `err`. Internal errors stay in the log.
    fn envelope(&self, ctx: &RequestContext, err: &Error) -> ErrorEnvelope {
        if err.is_internal() {
            error!(request_id = ctx.request_id(), code = err.code(), error = %err, "request failed");
            return generic_envelope(ctx);
        }
        warn!(request_id = ctx.request_id(), code = err.code(), error = %err, "request rejected");
        err.to_envelope()
    }
}

fn generic_envelope(ctx: &RequestContext) -> ErrorEnvelope {
    ErrorEnvelope::new("internal", ErrorCategory::InternalServerError).with_message(format!(
        "internal error, reference request {}",
        ctx.request_id()
    ))
}

/// Parse the SQL and fold the request's limit and offset into it.
fn parse_query(request: &QueryRequest) -> Result<Query> {
    let mut query = Query::parse(&request.query).map_err(|e| Error::InvalidQuery(e.to_string()))?;
    if request.limit < 0 || request.offset < 0 {
        return Err(Error::InvalidQuery(
            "limit and offset must not be negative".to_string(),
        ));
    }
    if request.limit > 0 {
        let limit = request.limit as u64;
        query.set_limit(Some(query.limit().map_or(limit, |l| l.min(limit))));
    }
    if request.offset > 0 {
        query.set_offset(Some(request.offset as u64));
    }
    Ok(query)
}
