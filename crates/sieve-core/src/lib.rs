//! Sieve core - policy evaluation, field transformations and sources.
//!
//! A request flows through this crate in four steps: the caller's
//! [`Policy`] set is evaluated against the query and the source
//! [`Schema`](sieve_proto::Schema) by the [`PolicyEvaluator`], the
//! rewritten query runs on a [`Source`] taken from the [`SourceCache`], and
//! every record the source produces passes through a [`TransformStream`]
//! before it reaches the wire.

pub mod context;
pub mod error;
pub mod identity;
pub mod label;
pub mod policy;
pub mod source;
pub mod stream;
pub mod transform;

pub use context::{CancelHandle, RequestContext};
pub use error::{DenyReason, Error, Result};
pub use identity::{Directory, Identity, IdentityService};
pub use label::Label;
pub use policy::{
    load_policies, load_policy_path, Action, Effect, Evaluation, Policy, PolicyEvaluator, Rule,
    Scalar, Target, TransformationSpec,
};
pub use source::{
    MemoryFactory, MemorySource, MemoryTable, Source, SourceCache, SourceCatalog,
    SourceDescriptor, SourceFactory, SourceRegistry,
};
pub use stream::{RecordSink, TransformStream};
pub use transform::{Transformation, TransformationRegistry};

/// Re-export protocol types.
pub use sieve_proto as proto;
