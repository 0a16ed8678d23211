//! Rules and transformation specs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sieve_lang::{Expression, Literal};

use super::target::{Target, WILDCARD};
use crate::error::{Error, Result};
use crate::label::is_valid_field;
use crate::transform::TransformationRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Only `read` is evaluated; the others are accepted so policies can be
/// authored ahead of write support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// Value of an equality in a `where` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&Scalar> for Literal {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Bool(b) => Literal::Bool(*b),
            Scalar::Int(i) => Literal::Int(*i),
            Scalar::Float(f) => Literal::Float(*f),
            Scalar::String(s) => Literal::String(s.clone()),
        }
    }
}

/// A per-field transformation attached to an allow rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSpec {
    pub field: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, serde_json::Value>,
    /// Optional condition gating the transformation per record.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl TransformationSpec {
    pub fn new(field: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            function: function.into(),
            args: BTreeMap::new(),
            condition: None,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_where(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// The condition, ignoring blank strings.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// One allow or deny clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub target: Target,
    pub action: Action,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// Disjunction of conjunctive equality maps.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<BTreeMap<String, Scalar>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<TransformationSpec>,
}

impl Rule {
    pub fn new(effect: Effect, action: Action, target: Target) -> Self {
        Self {
            target,
            action,
            effect,
            fields: None,
            conditions: None,
            transformations: Vec::new(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_where(mut self, clause: BTreeMap<String, Scalar>) -> Self {
        self.conditions.get_or_insert_with(Vec::new).push(clause);
        self
    }

    pub fn with_transformation(mut self, spec: TransformationSpec) -> Self {
        self.transformations.push(spec);
        self
    }

    pub fn is_allow(&self) -> bool {
        self.effect == Effect::Allow
    }

    /// Explicitly listed fields, empty when the rule lists none.
    pub fn listed_fields(&self) -> &[String] {
        self.fields.as_deref().unwrap_or_default()
    }

    pub fn grants_all_fields(&self) -> bool {
        self.listed_fields().iter().any(|f| f == WILDCARD)
    }

    /// Check the rule's invariants. Transformation specs are checked
    /// against `registry`, including their arguments and conditions.
    pub fn validate(&self, registry: &TransformationRegistry) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidPolicy(format!("rule on {}: {msg}", self.target)));

        if self.fields.is_some() && self.conditions.is_some() {
            return invalid("'fields' and 'where' are mutually exclusive".into());
        }
        if self.effect == Effect::Deny && !self.transformations.is_empty() {
            return invalid("deny rules cannot carry transformations".into());
        }
        if let Some(field) = self.listed_fields().iter().find(|f| !is_valid_field(f)) {
            return invalid(format!("'{field}' is not a valid field name"));
        }
        if let Some(conditions) = &self.conditions {
            if conditions.is_empty() || conditions.iter().any(|c| c.is_empty()) {
                return invalid("'where' must list at least one non-empty equality map".into());
            }
            for column in conditions.iter().flat_map(|c| c.keys()) {
                if column == WILDCARD || !is_valid_field(column) {
                    return invalid(format!("'{column}' is not a valid where column"));
                }
            }
        }

        for spec in &self.transformations {
            if spec.field == WILDCARD || !is_valid_field(&spec.field) {
                return invalid(format!(
                    "'{}' is not a valid transformation field",
                    spec.field
                ));
            }
            if let Some(condition) = spec.condition() {
                Expression::compile(condition).map_err(|e| {
                    Error::InvalidPolicy(format!(
                        "where clause '{condition}' of {} on {}: {e}",
                        spec.function, spec.field
                    ))
                })?;
            }
            registry.validate(spec)?;
        }
        Ok(())
    }
}
