//! Query and expression language for sieve.
//!
//! Two front ends share one lexer:
//!
//! - [`Query`] parses the single-table `SELECT` statements clients submit,
//!   lets the policy layer rewrite the projection and conjoin predicates,
//!   and renders SQL with positional parameters for the source driver.
//! - [`Expression`] compiles the boolean conditions that gate per-field
//!   transformations and evaluates them against record values.
//!
//! # SELECT syntax
//!
//! ```text
//! SELECT * FROM transactions
//! SELECT processor, card_number FROM payments.transactions WHERE value > 100 LIMIT 10
//! ```
//!
//! Keywords are case-insensitive. Identifiers may be double-quoted, strings
//! are single-quoted with `''` as the escaped quote.
//!
//! # Expression grammar
//!
//! ```text
//! expr           := or
//! or             := and (("||" | OR) and)*
//! and            := not (("&&" | AND) not)*
//! not            := ("!" | NOT) not | comparison
//! comparison     := additive ((cmp additive) | IS [NOT] NULL)?
//! cmp            := "==" | "=" | "!=" | "<>" | "<" | "<=" | ">" | ">="
//! additive       := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/") unary)*
//! unary          := "-" unary | primary
//! primary        := literal | identifier | "(" expr ")"
//! literal        := integer | float | string | TRUE | FALSE | NULL
//! ```
//!
//! In conditions both quote styles delimit strings. Evaluation rules are
//! documented in [`eval`].
//!
//! # Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use sieve_lang::{Expression, Query, Variable};
//!
//! let mut query = Query::parse("SELECT * FROM transactions").unwrap();
//! query.set_fields(vec!["processor".into()]);
//! assert_eq!(query.raw().0, "SELECT processor FROM transactions");
//!
//! let cond = Expression::compile("my_field == 64").unwrap();
//! let env = HashMap::from([("my_field".to_string(), Variable::Int(64))]);
//! assert!(cond.evaluate_bool(&env).unwrap());
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod expression;
pub mod lexer;
pub mod parser;
pub mod query;
pub mod span;

pub use ast::{BinaryOp, Expr, Literal, Projection, SelectStatement, TableRef, UnaryOp};
pub use error::{EvalError, ParseError};
pub use eval::{evaluate, evaluate_sql, Environment, Variable};
pub use expression::Expression;
pub use query::{negated_equalities, Query};
pub use span::Span;
