//! Query model: a parsed SELECT that policies can rewrite before it is
//! handed to a source.

use crate::ast::{BinaryOp, Expr, Literal, Projection, SelectStatement};
use crate::error::ParseError;
use crate::parser::parse_select;
use crate::span::Span;

/// A single-table SELECT with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statement: SelectStatement,
    params: Vec<Literal>,
}

impl Query {
    /// Parse client SQL. Client queries may not reference positional
    /// parameters; those are reserved for rewrites.
    pub fn parse(sql: &str) -> Result<Self, ParseError> {
        let statement = parse_select(sql)?;
        if let Some(selection) = &statement.selection {
            let max = selection.max_param();
            if max > 0 {
                return Err(ParseError::new(
                    format!("unexpected parameter ${max}"),
                    Span::default(),
                )
                .with_hint("inline literal values in the query"));
            }
        }
        Ok(Self {
            statement,
            params: Vec::new(),
        })
    }

    pub fn statement(&self) -> &SelectStatement {
        &self.statement
    }

    /// Table name.
    pub fn entity(&self) -> &str {
        &self.statement.table.name
    }

    /// Collection qualifier from `FROM collection.entity`, if written.
    pub fn collection(&self) -> Option<&str> {
        self.statement.table.collection.as_deref()
    }

    /// `records:<collection>.<entity>`, using `default_collection` when the
    /// query is unqualified.
    pub fn target(&self, default_collection: &str) -> String {
        format!(
            "records:{}.{}",
            self.collection().unwrap_or(default_collection),
            self.entity()
        )
    }

    pub fn wants_all(&self) -> bool {
        matches!(self.statement.projection, Projection::Wildcard)
    }

    /// Explicit projection, or `None` for `SELECT *`.
    pub fn fields(&self) -> Option<&[String]> {
        match &self.statement.projection {
            Projection::Wildcard => None,
            Projection::Columns(columns) => Some(columns),
        }
    }

    /// Replace the projection.
    pub fn set_fields(&mut self, fields: Vec<String>) {
        self.statement.projection = Projection::Columns(fields);
    }

    pub fn selection(&self) -> Option<&Expr> {
        self.statement.selection.as_ref()
    }

    pub fn params(&self) -> &[Literal] {
        &self.params
    }

    /// Conjoin `predicate` with the current WHERE clause.
    ///
    /// `predicate` refers to `params` as `$1..$k`; they are renumbered to
    /// follow the parameters already bound.
    pub fn add_where(&mut self, mut predicate: Expr, params: Vec<Literal>) {
        let shift = self.params.len();
        predicate.map_params(&mut |n| n + shift);
        self.params.extend(params);

        self.statement.selection = Some(match self.statement.selection.take() {
            Some(existing) => Expr::binary(BinaryOp::And, existing, predicate),
            None => predicate,
        });
    }

    pub fn limit(&self) -> Option<u64> {
        self.statement.limit
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.statement.limit = limit;
    }

    pub fn offset(&self) -> Option<u64> {
        self.statement.offset
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.statement.offset = offset;
    }

    /// SQL text with `$n` placeholders, and the values they bind.
    pub fn raw(&self) -> (String, Vec<Literal>) {
        (self.statement.to_string(), self.params.clone())
    }
}

/// Build `NOT ((c1 = $1 AND c2 = $2) OR (c3 = $3))` from a disjunction of
/// equality maps. Returns `None` when there is nothing to negate.
pub fn negated_equalities<I, M>(clauses: I) -> Option<(Expr, Vec<Literal>)>
where
    I: IntoIterator<Item = M>,
    M: IntoIterator<Item = (String, Literal)>,
{
    let mut params = Vec::new();
    let conjunctions = clauses.into_iter().filter_map(|clause| {
        let equalities: Vec<Expr> = clause
            .into_iter()
            .map(|(column, value)| {
                params.push(value);
                Expr::binary(BinaryOp::Eq, Expr::Ident(column), Expr::Param(params.len()))
            })
            .collect();
        Expr::chain(BinaryOp::And, equalities)
    });
    let disjunction = Expr::chain(BinaryOp::Or, conjunctions.collect::<Vec<_>>())?;
    Some((Expr::not(disjunction), params))
}
