//! Evaluation of expression trees over bound variables.
//!
//! Coercion rules:
//!
//! - `Int` and `Float` mix freely; the result of mixed arithmetic is `Float`.
//!   `Int / Int` is integer division. Integer overflow and division by zero
//!   are errors.
//! - `Timestamp` compares with `Timestamp` or with an RFC 3339 string.
//! - `Bytes` compares with `Bytes` or with a string's UTF-8 bytes.
//! - `NULL = NULL` holds; any other comparison involving `NULL` is false,
//!   except `<>` which is true. Arithmetic on `NULL` yields `NULL`.
//! - `AND`, `OR` and `NOT` require booleans. `AND`/`OR` short-circuit.
//!
//! [`evaluate_sql`] replaces the `NULL` rules with SQL's three-valued logic:
//! comparisons involving `NULL` yield `NULL`, `NOT NULL` is `NULL`, and
//! `AND`/`OR` follow the Kleene truth tables.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use sieve_proto::Value;

use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::EvalError;

/// A runtime value inside the expression evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Variable {
    pub fn type_name(&self) -> &'static str {
        match self {
            Variable::Null => "null",
            Variable::Int(_) => "int",
            Variable::Float(_) => "float",
            Variable::String(_) => "string",
            Variable::Bool(_) => "bool",
            Variable::Bytes(_) => "bytes",
            Variable::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variable::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Null => f.write_str("null"),
            Variable::Int(i) => write!(f, "{i}"),
            Variable::Float(v) => write!(f, "{v}"),
            Variable::String(s) => write!(f, "{s:?}"),
            Variable::Bool(b) => write!(f, "{b}"),
            Variable::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Variable::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&Literal> for Variable {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Null => Variable::Null,
            Literal::Bool(b) => Variable::Bool(*b),
            Literal::Int(i) => Variable::Int(*i),
            Literal::Float(f) => Variable::Float(*f),
            Literal::String(s) => Variable::String(s.clone()),
        }
    }
}

impl From<&Value> for Variable {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Variable::Null,
            Value::Int32(i) => Variable::Int(*i as i64),
            Value::Int64(i) => Variable::Int(*i),
            Value::Float(f) => Variable::Float(*f as f64),
            Value::Double(f) => Variable::Float(*f),
            Value::String(s) => Variable::String(s.clone()),
            Value::Bytes(b) => Variable::Bytes(b.clone()),
            Value::Bool(b) => Variable::Bool(*b),
            Value::Timestamp(micros) => DateTime::from_timestamp_micros(*micros)
                .map(Variable::Timestamp)
                .unwrap_or(Variable::Null),
        }
    }
}

/// Name resolution for identifiers.
pub trait Environment {
    fn lookup(&self, name: &str) -> Option<&Variable>;
}

impl Environment for HashMap<String, Variable> {
    fn lookup(&self, name: &str) -> Option<&Variable> {
        self.get(name)
    }
}

impl<E: Environment + ?Sized> Environment for &E {
    fn lookup(&self, name: &str) -> Option<&Variable> {
        (**self).lookup(name)
    }
}

/// How `NULL` behaves in comparisons and boolean connectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    TwoValued,
    ThreeValued,
}

/// Evaluate `expr`; `params[0]` binds `$1`.
pub fn evaluate(
    expr: &Expr,
    env: &dyn Environment,
    params: &[Variable],
) -> Result<Variable, EvalError> {
    eval(expr, env, params, Logic::TwoValued)
}

/// Evaluate a WHERE clause the way a SQL database would.
pub fn evaluate_sql(
    expr: &Expr,
    env: &dyn Environment,
    params: &[Variable],
) -> Result<Variable, EvalError> {
    eval(expr, env, params, Logic::ThreeValued)
}

fn eval(
    expr: &Expr,
    env: &dyn Environment,
    params: &[Variable],
    logic: Logic,
) -> Result<Variable, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(lit.into()),
        Expr::Ident(name) => env
            .lookup(name)
            .cloned()
            .ok_or_else(|| EvalError::FieldNotFound(name.clone())),
        Expr::Param(n) => params
            .get(n.wrapping_sub(1))
            .cloned()
            .ok_or(EvalError::UnboundParameter(*n)),
        Expr::Unary { op, expr } => {
            let value = eval(expr, env, params, logic)?;
            match (op, value) {
                (UnaryOp::Not, Variable::Bool(b)) => Ok(Variable::Bool(!b)),
                (UnaryOp::Not, Variable::Null) if logic == Logic::ThreeValued => Ok(Variable::Null),
                (UnaryOp::Neg, Variable::Int(i)) => {
                    i.checked_neg().map(Variable::Int).ok_or(EvalError::Overflow)
                }
                (UnaryOp::Neg, Variable::Float(f)) => Ok(Variable::Float(-f)),
                (UnaryOp::Neg, Variable::Null) => Ok(Variable::Null),
                (UnaryOp::Not, other) => Err(EvalError::TypeMismatch(format!(
                    "NOT requires a bool operand, found {}",
                    other.type_name()
                ))),
                (UnaryOp::Neg, other) => Err(EvalError::TypeMismatch(format!(
                    "cannot negate {}",
                    other.type_name()
                ))),
            }
        }
        Expr::IsNull { expr, negated } => {
            let is_null = matches!(eval(expr, env, params, logic)?, Variable::Null);
            Ok(Variable::Bool(is_null != *negated))
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = require_bool(op, eval(left, env, params, logic)?, logic)?;
                // short circuit
                let decisive = *op == BinaryOp::Or;
                if lhs == Some(decisive) {
                    return Ok(Variable::Bool(decisive));
                }
                let rhs = require_bool(op, eval(right, env, params, logic)?, logic)?;
                Ok(match (lhs, rhs) {
                    (_, Some(b)) if b == decisive => Variable::Bool(decisive),
                    (Some(_), Some(_)) => Variable::Bool(!decisive),
                    _ => Variable::Null,
                })
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(
                *op,
                eval(left, env, params, logic)?,
                eval(right, env, params, logic)?,
            ),
            _ => {
                let lhs = eval(left, env, params, logic)?;
                let rhs = eval(right, env, params, logic)?;
                if logic == Logic::ThreeValued
                    && (lhs == Variable::Null || rhs == Variable::Null)
                {
                    return Ok(Variable::Null);
                }
                compare(*op, &lhs, &rhs)
            }
        },
    }
}

/// `None` stands for an unknown (`NULL`) operand under three-valued logic.
fn require_bool(op: &BinaryOp, value: Variable, logic: Logic) -> Result<Option<bool>, EvalError> {
    match value {
        Variable::Bool(b) => Ok(Some(b)),
        Variable::Null if logic == Logic::ThreeValued => Ok(None),
        other => Err(EvalError::TypeMismatch(format!(
            "{} requires bool operands, found {}",
            op.symbol(),
            other.type_name()
        ))),
    }
}

fn arithmetic(op: BinaryOp, lhs: Variable, rhs: Variable) -> Result<Variable, EvalError> {
    match (lhs, rhs) {
        (Variable::Null, _) | (_, Variable::Null) => Ok(Variable::Null),
        (Variable::Int(a), Variable::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                _ if b == 0 => return Err(EvalError::DivisionByZero),
                _ => a.checked_div(b),
            };
            result.map(Variable::Int).ok_or(EvalError::Overflow)
        }
        (lhs, rhs) => {
            let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) else {
                return Err(EvalError::TypeMismatch(format!(
                    "cannot apply {} to {} and {}",
                    op.symbol(),
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ if b == 0.0 => return Err(EvalError::DivisionByZero),
                _ => a / b,
            };
            Ok(Variable::Float(result))
        }
    }
}

fn as_float(value: &Variable) -> Option<f64> {
    match value {
        Variable::Int(i) => Some(*i as f64),
        Variable::Float(f) => Some(*f),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, EvalError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EvalError::TypeMismatch(format!("'{s}' is not an RFC 3339 timestamp")))
}

fn compare(op: BinaryOp, lhs: &Variable, rhs: &Variable) -> Result<Variable, EvalError> {
    let ordering = match (lhs, rhs) {
        (Variable::Null, Variable::Null) => Some(Ordering::Equal),
        (Variable::Null, _) | (_, Variable::Null) => None,
        (Variable::Int(a), Variable::Int(b)) => Some(a.cmp(b)),
        (Variable::Int(_) | Variable::Float(_), Variable::Int(_) | Variable::Float(_)) => {
            as_float(lhs).zip(as_float(rhs)).and_then(|(a, b)| a.partial_cmp(&b))
        }
        (Variable::String(a), Variable::String(b)) => Some(a.cmp(b)),
        (Variable::Bool(a), Variable::Bool(b)) => Some(a.cmp(b)),
        (Variable::Bytes(a), Variable::Bytes(b)) => Some(a.cmp(b)),
        (Variable::Bytes(a), Variable::String(b)) => Some(a.as_slice().cmp(b.as_bytes())),
        (Variable::String(a), Variable::Bytes(b)) => Some(a.as_bytes().cmp(b.as_slice())),
        (Variable::Timestamp(a), Variable::Timestamp(b)) => Some(a.cmp(b)),
        (Variable::Timestamp(a), Variable::String(b)) => Some(a.cmp(&parse_timestamp(b)?)),
        (Variable::String(a), Variable::Timestamp(b)) => Some(parse_timestamp(a)?.cmp(b)),
        _ => {
            return Err(EvalError::TypeMismatch(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };

    let result = match (op, ordering) {
        (BinaryOp::Ne, None) => true,
        (_, None) => false,
        (BinaryOp::Eq, Some(o)) => o == Ordering::Equal,
        (BinaryOp::Ne, Some(o)) => o != Ordering::Equal,
        (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
        (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
        (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
        (BinaryOp::Ge, Some(o)) => o != Ordering::Less,
        (other, _) => {
            return Err(EvalError::TypeMismatch(format!(
                "{} is not a comparison",
                other.symbol()
            )))
        }
    };
    Ok(Variable::Bool(result))
}
