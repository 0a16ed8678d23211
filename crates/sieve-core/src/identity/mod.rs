//! Identities, their policies, and source descriptors.

mod directory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::Result;
use crate::policy::Policy;
use crate::source::SourceCatalog;

pub use directory::{Directory, RoleEntry};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Token validation and policy lookup. Source descriptors come from the
/// [`SourceCatalog`] supertrait.
#[async_trait]
pub trait IdentityService: SourceCatalog {
    /// Translate a decoded bearer token into an identity.
    async fn validate_token(&self, ctx: &RequestContext, token: &str) -> Result<Identity>;

    /// Policies attached to the identity's roles, transitively, each once,
    /// in a stable order.
    async fn identity_policies(&self, ctx: &RequestContext, identity_id: &str) -> Result<Vec<Policy>>;
}
