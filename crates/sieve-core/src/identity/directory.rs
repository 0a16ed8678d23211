//! A YAML-backed, in-process identity service.
//!
//! ```yaml
//! identities:
//!   - id: ana
//!     tokens: [ana-token]
//!     roles: [analyst]
//! roles:
//!   - name: analyst
//!     policies: [card-analytics]
//!     inherits: [viewer]
//!   - name: viewer
//!     policies: [vendor-filter]
//! policy_files: [policies]
//! policies:
//!   - label: vendor-filter
//!     ...
//! sources:
//!   - label: payments-db
//!     type: memory
//!     endpoint: data/payments.yaml
//! ```
//!
//! `policy_files` and relative memory endpoints resolve against the
//! directory file's location.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{Identity, IdentityService};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::policy::{load_policy_path, Policy};
use crate::source::{SourceCatalog, SourceDescriptor};
use crate::transform::TransformationRegistry;

/// A role: attached policies plus roles it inherits from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleEntry {
    pub name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub inherits: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IdentityEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    identities: Vec<IdentityEntry>,
    #[serde(default)]
    roles: Vec<RoleEntry>,
    #[serde(default)]
    policy_files: Vec<PathBuf>,
    #[serde(default)]
    policies: Vec<Policy>,
    #[serde(default)]
    sources: Vec<SourceDescriptor>,
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Tokens, identities, roles, policies and sources held in memory.
///
/// Tokens are kept only as SHA-256 digests.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    tokens: HashMap<String, String>,
    identities: HashMap<String, Identity>,
    assignments: HashMap<String, Vec<String>>,
    roles: HashMap<String, RoleEntry>,
    policies: HashMap<String, Policy>,
    sources: HashMap<String, SourceDescriptor>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.insert(policy.label.to_string(), policy);
        self
    }

    pub fn with_role(mut self, role: RoleEntry) -> Self {
        self.roles.insert(role.name.clone(), role);
        self
    }

    pub fn with_identity<I, S>(mut self, identity: Identity, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assignments
            .insert(identity.id.clone(), roles.into_iter().map(Into::into).collect());
        self.identities.insert(identity.id.clone(), identity);
        self
    }

    pub fn with_token(mut self, token: &str, identity_id: impl Into<String>) -> Self {
        self.tokens.insert(token_digest(token), identity_id.into());
        self
    }

    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.insert(source.label.clone(), source);
        self
    }

    /// Check that every reference resolves and every policy is valid.
    pub fn validate(&self, registry: &TransformationRegistry) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidPolicy(format!("directory: {msg}")));

        for identity in self.tokens.values() {
            if !self.identities.contains_key(identity) {
                return invalid(format!("token issued to unknown identity '{identity}'"));
            }
        }
        for (identity, roles) in &self.assignments {
            if let Some(role) = roles.iter().find(|r| !self.roles.contains_key(*r)) {
                return invalid(format!("identity '{identity}' has unknown role '{role}'"));
            }
        }
        for role in self.roles.values() {
            if let Some(p) = role.policies.iter().find(|p| !self.policies.contains_key(*p)) {
                return invalid(format!("role '{}' attaches unknown policy '{p}'", role.name));
            }
            if let Some(r) = role.inherits.iter().find(|r| !self.roles.contains_key(*r)) {
                return invalid(format!("role '{}' inherits unknown role '{r}'", role.name));
            }
        }
        for policy in self.policies.values() {
            policy.validate(registry)?;
        }
        Ok(())
    }

    /// Parse a directory document. Relative paths resolve against `base`.
    pub fn from_yaml(yaml: &str, base: &Path, registry: &TransformationRegistry) -> Result<Self> {
        let file: DirectoryFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::InvalidPolicy(format!("malformed directory YAML: {e}")))?;

        let mut directory = Self::new();
        let mut policies = file.policies;
        for path in &file.policy_files {
            policies.extend(load_policy_path(&base.join(path), registry)?);
        }
        for policy in policies {
            if directory.policies.contains_key(policy.label.as_str()) {
                return Err(Error::InvalidPolicy(format!(
                    "directory: policy '{}' is defined twice",
                    policy.label
                )));
            }
            directory = directory.with_policy(policy);
        }
        for role in file.roles {
            directory = directory.with_role(role);
        }
        for entry in file.identities {
            for token in &entry.tokens {
                directory = directory.with_token(token, entry.id.clone());
            }
            let identity = Identity {
                id: entry.id,
                name: entry.name,
            };
            directory = directory.with_identity(identity, entry.roles);
        }
        for mut source in file.sources {
            if source.source_type == crate::source::memory::SOURCE_TYPE
                && !source.endpoint.is_empty()
                && Path::new(&source.endpoint).is_relative()
            {
                source.endpoint = base.join(&source.endpoint).to_string_lossy().into_owned();
            }
            directory = directory.with_source(source);
        }

        directory.validate(registry)?;
        Ok(directory)
    }

    pub fn load(path: &Path, registry: &TransformationRegistry) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidPolicy(format!("cannot read {}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let directory = Self::from_yaml(&yaml, base, registry)?;
        info!(
            path = %path.display(),
            identities = directory.identities.len(),
            roles = directory.roles.len(),
            policies = directory.policies.len(),
            sources = directory.sources.len(),
            "directory loaded"
        );
        Ok(directory)
    }

    pub fn identity(&self, id: &str) -> Option<&Identity> {
        self.identities.get(id)
    }

    /// Policies reachable from `identity_id`'s roles, depth first in
    /// declaration order, each once.
    pub fn policies_for(&self, identity_id: &str) -> Result<Vec<Policy>> {
        let roles = self
            .assignments
            .get(identity_id)
            .ok_or_else(|| Error::Unauthenticated(format!("unknown identity '{identity_id}'")))?;

        let mut visited_roles = HashSet::new();
        let mut seen_policies = HashSet::new();
        let mut policies = Vec::new();
        let mut stack: Vec<&str> = roles.iter().rev().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if !visited_roles.insert(name) {
                continue;
            }
            let Some(role) = self.roles.get(name) else {
                continue;
            };
            for label in &role.policies {
                if seen_policies.insert(label.as_str()) {
                    if let Some(policy) = self.policies.get(label) {
                        policies.push(policy.clone());
                    }
                }
            }
            stack.extend(role.inherits.iter().rev().map(String::as_str));
        }
        Ok(policies)
    }
}

#[async_trait]
impl SourceCatalog for Directory {
    async fn get_source(&self, ctx: &RequestContext, label: &str) -> Result<SourceDescriptor> {
        ctx.check()?;
        self.sources
            .get(label)
            .cloned()
            .ok_or_else(|| Error::SourceNotFound(label.to_string()))
    }
}

#[async_trait]
impl IdentityService for Directory {
    async fn validate_token(&self, ctx: &RequestContext, token: &str) -> Result<Identity> {
        ctx.check()?;
        let identity = self
            .tokens
            .get(&token_digest(token))
            .and_then(|id| self.identities.get(id))
            .cloned()
            .ok_or_else(|| Error::Unauthenticated("invalid bearer token".to_string()))?;
        debug!(request_id = ctx.request_id(), identity = %identity.id, "token accepted");
        Ok(identity)
    }

    async fn identity_policies(&self, ctx: &RequestContext, identity_id: &str) -> Result<Vec<Policy>> {
        ctx.check()?;
        self.policies_for(identity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const POLICIES: &str = r#"
label: card-analytics
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.transactions
    action: read
    effect: allow
    fields: [card_number]
---
label: vendor-filter
version: 1
created_at: 2024-01-01T00:00:00Z
updated_at: 2024-01-01T00:00:00Z
rules:
  - target: records:c.transactions
    action: read
    effect: allow
    fields: [vendor]
"#;

    const DIRECTORY: &str = r#"
identities:
  - id: ana
    name: Ana
    tokens: [ana-token]
    roles: [analyst, viewer]
  - id: bob
    tokens: [bob-token]
    roles: [viewer]
roles:
  - name: analyst
    policies: [card-analytics]
    inherits: [viewer, analyst]
  - name: viewer
    policies: [vendor-filter, card-analytics]
policy_files: [policies.yaml]
sources:
  - label: payments-db
    type: memory
    endpoint: data/payments.yaml
"#;

    fn registry() -> TransformationRegistry {
        TransformationRegistry::builder().with_builtins().build()
    }

    fn directory() -> (tempfile::TempDir, Directory) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policies.yaml"), POLICIES).unwrap();
        std::fs::write(dir.path().join("directory.yaml"), DIRECTORY).unwrap();
        let directory = Directory::load(&dir.path().join("directory.yaml"), &registry()).unwrap();
        (dir, directory)
    }

    fn labels(policies: &[Policy]) -> Vec<&str> {
        policies.iter().map(|p| p.label.as_str()).collect()
    }

    #[tokio::test]
    async fn test_token_to_policies() {
        let (_dir, directory) = directory();
        let ctx = RequestContext::background();

        let ana = directory.validate_token(&ctx, "ana-token").await.unwrap();
        assert_eq!(ana.name.as_deref(), Some("Ana"));
        let policies = directory.identity_policies(&ctx, &ana.id).await.unwrap();
        assert_eq!(labels(&policies), vec!["card-analytics", "vendor-filter"]);

        let policies = directory.identity_policies(&ctx, "bob").await.unwrap();
        assert_eq!(labels(&policies), vec!["vendor-filter", "card-analytics"]);
    }

    #[tokio::test]
    async fn test_bad_token() {
        let (_dir, directory) = directory();
        let err = directory
            .validate_token(&RequestContext::background(), "guess")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthenticated");
    }

    #[tokio::test]
    async fn test_sources_resolve_relative_to_file() {
        let (dir, directory) = directory();
        let ctx = RequestContext::background();
        let source = directory.get_source(&ctx, "payments-db").await.unwrap();
        assert_eq!(
            Path::new(&source.endpoint),
            dir.path().join("data/payments.yaml")
        );
        assert!(matches!(
            directory.get_source(&ctx, "crm").await,
            Err(Error::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_dangling_references_rejected() {
        let base = Path::new(".");
        let unknown_role = "identities:\n  - id: x\n    roles: [ghost]\n";
        assert!(Directory::from_yaml(unknown_role, base, &registry()).is_err());

        let unknown_policy = "roles:\n  - name: r\n    policies: [ghost]\n";
        assert!(Directory::from_yaml(unknown_policy, base, &registry()).is_err());

        let unknown_parent = "roles:\n  - name: r\n    inherits: [ghost]\n";
        assert!(Directory::from_yaml(unknown_parent, base, &registry()).is_err());
    }
}
