//! Versioned policy documents and their YAML form.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::Rule;
use crate::error::{Error, Result};
use crate::label::Label;
use crate::transform::TransformationRegistry;

/// A labeled, versioned bundle of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub label: Label,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn new(label: Label) -> Self {
        let now = Utc::now();
        Self {
            label,
            version: 1,
            created_at: now,
            updated_at: now,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn validate(&self, registry: &TransformationRegistry) -> Result<()> {
        if self.version < 1 {
            return Err(Error::InvalidPolicy(format!(
                "policy {}: version must be at least 1",
                self.label
            )));
        }
        if self.updated_at < self.created_at {
            return Err(Error::InvalidPolicy(format!(
                "policy {}: updated_at precedes created_at",
                self.label
            )));
        }
        for rule in &self.rules {
            rule.validate(registry)
                .map_err(|e| match e {
                    Error::InvalidPolicy(msg) => {
                        Error::InvalidPolicy(format!("policy {}: {msg}", self.label))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Parse and validate a single YAML policy.
    pub fn from_yaml(yaml: &str, registry: &TransformationRegistry) -> Result<Self> {
        let policy: Policy = serde_yaml::from_str(yaml)
            .map_err(|e| Error::InvalidPolicy(format!("malformed policy YAML: {e}")))?;
        policy.validate(registry)?;
        Ok(policy)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Parse every document of a (possibly multi-document) YAML stream.
pub fn load_policies(yaml: &str, registry: &TransformationRegistry) -> Result<Vec<Policy>> {
    let mut policies = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::InvalidPolicy(format!("malformed policy YAML: {e}")))?;
        if value.is_null() {
            continue;
        }
        let policy: Policy = serde_yaml::from_value(value)
            .map_err(|e| Error::InvalidPolicy(format!("malformed policy YAML: {e}")))?;
        policy.validate(registry)?;
        policies.push(policy);
    }
    Ok(policies)
}

/// Load a policy file, or every `.yaml`/`.yml` file of a directory in name
/// order.
pub fn load_policy_path(path: &Path, registry: &TransformationRegistry) -> Result<Vec<Policy>> {
    let read = |p: &Path| {
        std::fs::read_to_string(p)
            .map_err(|e| Error::InvalidPolicy(format!("cannot read {}: {e}", p.display())))
    };

    if !path.is_dir() {
        return load_policies(&read(path)?, registry);
    }

    let mut files: Vec<_> = std::fs::read_dir(path)
        .map_err(|e| Error::InvalidPolicy(format!("cannot read {}: {e}", path.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut policies = Vec::new();
    for file in files {
        policies.extend(load_policies(&read(&file)?, registry)?);
    }
    Ok(policies)
}
