//! Syntax tree for SELECT statements and expressions.
//!
//! `Display` renders SQL text. Sub-expressions are parenthesised only where
//! precedence requires it, so rendered text parses back to an equivalent tree.

use std::fmt;

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(true) => f.write_str("TRUE"),
            Literal::Bool(false) => f.write_str("FALSE"),
            // negatives are wrapped so "a - -1" never renders as a comment
            Literal::Int(i) if *i < 0 => write!(f, "({i})"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(v) if *v < 0.0 => write!(f, "({v:?})"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div => 6,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 4
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

const NOT_PRECEDENCE: u8 = 3;
const COMPARISON_PRECEDENCE: u8 = 4;
const NEG_PRECEDENCE: u8 = 7;
const PRIMARY_PRECEDENCE: u8 = 8;

/// An expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    /// 1-based positional parameter.
    Param(usize),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }

    /// Fold `exprs` into a left-deep chain joined by `op`.
    pub fn chain(op: BinaryOp, exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs
            .into_iter()
            .reduce(|acc, next| Expr::binary(op, acc, next))
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Literal(_) | Expr::Ident(_) | Expr::Param(_) => PRIMARY_PRECEDENCE,
            Expr::Unary {
                op: UnaryOp::Not, ..
            } => NOT_PRECEDENCE,
            Expr::Unary {
                op: UnaryOp::Neg, ..
            } => NEG_PRECEDENCE,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::IsNull { .. } => COMPARISON_PRECEDENCE,
        }
    }

    /// Visit every node, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => expr.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Literal(_) | Expr::Ident(_) | Expr::Param(_) => {}
        }
    }

    /// Rewrite every positional parameter in place.
    pub fn map_params(&mut self, f: &mut impl FnMut(usize) -> usize) {
        match self {
            Expr::Param(n) => *n = f(*n),
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => expr.map_params(f),
            Expr::Binary { left, right, .. } => {
                left.map_params(f);
                right.map_params(f);
            }
            Expr::Literal(_) | Expr::Ident(_) => {}
        }
    }

    /// Highest parameter index referenced, 0 when none.
    pub fn max_param(&self) -> usize {
        let mut max = 0;
        self.walk(&mut |e| {
            if let Expr::Param(n) = e {
                max = max.max(*n);
            }
        });
        max
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Ident(name) => write_ident(f, name),
            Expr::Param(n) => write!(f, "${n}"),
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => {
                f.write_str("NOT ")?;
                expr.fmt_operand(f, NOT_PRECEDENCE)
            }
            Expr::Unary {
                op: UnaryOp::Neg,
                expr,
            } => {
                f.write_str("-")?;
                expr.fmt_operand(f, PRIMARY_PRECEDENCE)
            }
            Expr::Binary { op, left, right } => {
                let (lhs, rhs) = if op.is_comparison() {
                    (op.precedence() + 1, op.precedence() + 1)
                } else {
                    (op.precedence(), op.precedence() + 1)
                };
                left.fmt_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f, rhs)
            }
            Expr::IsNull { expr, negated } => {
                expr.fmt_operand(f, COMPARISON_PRECEDENCE + 1)?;
                f.write_str(if *negated { " IS NOT NULL" } else { " IS NULL" })
            }
        }
    }
}

const KEYWORDS: [&str; 12] = [
    "select", "from", "where", "limit", "offset", "and", "or", "not", "is", "null", "true",
    "false",
];

/// Write an identifier, quoting it unless it is a plain lower-case name.
pub(crate) fn write_ident(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !KEYWORDS.contains(&name);
    if plain {
        f.write_str(name)
    } else {
        write!(f, "\"{}\"", name.replace('"', "\"\""))
    }
}

/// SELECT projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Wildcard,
    Columns(Vec<String>),
}

/// `[collection.]entity` in the FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub collection: Option<String>,
    pub name: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(collection) = &self.collection {
            write_ident(f, collection)?;
            f.write_str(".")?;
        }
        write_ident(f, &self.name)
    }
}

/// A single-table SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Projection,
    pub table: TableRef,
    pub selection: Option<Expr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        match &self.projection {
            Projection::Wildcard => f.write_str("*")?,
            Projection::Columns(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_ident(f, column)?;
                }
            }
        }
        write!(f, " FROM {}", self.table)?;
        if let Some(selection) = &self.selection {
            write!(f, " WHERE {selection}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_parenthesisation() {
        let or = Expr::binary(BinaryOp::Or, Expr::ident("a"), Expr::ident("b"));
        let and = Expr::binary(BinaryOp::And, or, Expr::ident("c"));
        assert_eq!(and.to_string(), "(a OR b) AND c");

        let sub = Expr::binary(
            BinaryOp::Sub,
            Expr::ident("x"),
            Expr::binary(BinaryOp::Sub, Expr::ident("y"), Expr::ident("z")),
        );
        assert_eq!(sub.to_string(), "x - (y - z)");
    }

    #[test]
    fn test_not_wraps_lower_precedence() {
        let eq = Expr::binary(BinaryOp::Eq, Expr::ident("a"), Expr::Param(1));
        assert_eq!(Expr::not(eq.clone()).to_string(), "NOT a = $1");
        let or = Expr::binary(BinaryOp::Or, eq.clone(), eq);
        assert_eq!(Expr::not(or).to_string(), "NOT (a = $1 OR a = $1)");
    }

    #[test]
    fn test_ident_quoting() {
        assert_eq!(Expr::ident("card_number").to_string(), "card_number");
        assert_eq!(Expr::ident("cardNumber").to_string(), "\"cardNumber\"");
        assert_eq!(Expr::ident("limit").to_string(), "\"limit\"");
        assert_eq!(Expr::ident("a\"b").to_string(), "\"a\"\"b\"");
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(Literal::String("o'neil".into()).to_string(), "'o''neil'");
        assert_eq!(Literal::Float(2.0).to_string(), "2.0");
        assert_eq!(Literal::Int(-3).to_string(), "(-3)");
    }

    #[test]
    fn test_map_params() {
        let mut e = Expr::binary(BinaryOp::And, Expr::Param(1), Expr::Param(2));
        e.map_params(&mut |n| n + 3);
        assert_eq!(e.max_param(), 5);
        assert_eq!(e.to_string(), "$4 AND $5");
    }
}
