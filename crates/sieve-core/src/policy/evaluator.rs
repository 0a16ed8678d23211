//! Policy evaluation: rules + schema + query → rewritten query or denial.

use std::collections::HashSet;

use sieve_lang::{negated_equalities, Literal, Query};
use sieve_proto::Schema;
use tracing::debug;

use super::document::Policy;
use super::rule::{Action, Rule, TransformationSpec};
use super::target::WILDCARD;
use crate::error::{DenyReason, Error, Result};

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The query to run upstream.
    pub query: Query,
    /// Transformations to apply, in application order.
    pub transformations: Vec<TransformationSpec>,
}

/// Evaluates `read` access.
///
/// Deny beats allow at field level. A deny rule that names neither fields
/// nor rows denies the whole entity. Allow rules only grant the fields they
/// list; an allow rule with a `where` clause grants nothing by itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, query: &Query, schema: &Schema, policies: &[Policy]) -> Result<Evaluation> {
        let entity = query.entity();

        let matching: Vec<&Rule> = policies
            .iter()
            .flat_map(|p| p.rules.iter())
            .filter(|r| r.target.matches_entity(entity))
            .collect();
        if matching.is_empty() {
            debug!(entity, "no rule targets entity");
            return Err(Error::AccessDenied(DenyReason::NoPolicyMatches));
        }

        let (allows, denies): (Vec<&Rule>, Vec<&Rule>) = matching
            .into_iter()
            .filter(|r| r.action == Action::Read)
            .partition(|r| r.is_allow());
        if allows.is_empty() && denies.is_empty() {
            debug!(entity, "rules target entity but none governs read");
            return Err(Error::AccessDenied(DenyReason::ActionNotAllowed));
        }

        let permitted = permitted_fields(schema, &allows, &denies);

        let mut rewritten = query.clone();
        let projection: Vec<String> = match query.fields() {
            None => {
                let projection: Vec<String> = schema
                    .field_names()
                    .filter(|name| permitted.contains(*name))
                    .map(str::to_string)
                    .collect();
                if projection.is_empty() {
                    debug!(entity, "nothing left to project");
                    return Err(Error::AccessDenied(DenyReason::NoPolicyMatches));
                }
                rewritten.set_fields(projection.clone());
                projection
            }
            Some(requested) => {
                let mut seen = HashSet::with_capacity(requested.len());
                if let Some(field) = requested.iter().find(|f| !seen.insert(f.as_str())) {
                    return Err(Error::InvalidQuery(format!(
                        "field '{field}' is selected more than once"
                    )));
                }
                if let Some(field) = requested.iter().find(|f| !permitted.contains(f.as_str())) {
                    debug!(entity, field = %field, "requested field not permitted");
                    return Err(Error::AccessDenied(DenyReason::FieldNotAllowed {
                        field: field.clone(),
                    }));
                }
                requested.to_vec()
            }
        };

        for rule in &denies {
            let Some(conditions) = &rule.conditions else {
                continue;
            };
            let clauses = conditions.iter().map(|clause| {
                clause
                    .iter()
                    .map(|(column, value)| (column.clone(), Literal::from(value)))
                    .collect::<Vec<_>>()
            });
            if let Some((predicate, params)) = negated_equalities(clauses) {
                rewritten.add_where(predicate, params);
            }
        }

        let transformations = applicable_transformations(&allows, &projection);
        debug!(
            entity,
            fields = projection.len(),
            transformations = transformations.len(),
            "query permitted"
        );

        Ok(Evaluation {
            query: rewritten,
            transformations,
        })
    }
}

fn permitted_fields<'a>(schema: &'a Schema, allows: &[&'a Rule], denies: &[&'a Rule]) -> HashSet<&'a str> {
    let mut permitted: HashSet<&str> = if allows.iter().any(|r| r.grants_all_fields()) {
        schema.field_names().collect()
    } else {
        allows
            .iter()
            .copied()
            .flat_map(Rule::listed_fields)
            .map(String::as_str)
            .collect()
    };

    for deny in denies {
        let whole_entity = deny.fields.is_none() && deny.conditions.is_none();
        if whole_entity || deny.grants_all_fields() {
            permitted.clear();
            break;
        }
        for field in deny.listed_fields() {
            permitted.remove(field.as_str());
        }
    }
    permitted
}

fn applicable_transformations(allows: &[&Rule], projection: &[String]) -> Vec<TransformationSpec> {
    let projected: HashSet<&str> = projection.iter().map(String::as_str).collect();
    allows
        .iter()
        .filter(|rule| {
            rule.listed_fields()
                .iter()
                .any(|f| f == WILDCARD || projected.contains(f.as_str()))
        })
        .flat_map(|rule| rule.transformations.iter())
        .filter(|spec| projected.contains(spec.field.as_str()))
        .cloned()
        .collect()
}
