//! Recursive descent parser for SELECT statements and expressions.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::Span;

/// How double-quoted tokens are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `"name"` is a quoted identifier, strings use single quotes.
    Sql,
    /// Both quote styles delimit strings.
    Expression,
}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    end: usize,
    dialect: Dialect,
}

impl Parser {
    pub fn new(source: &str, dialect: Dialect) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            end: source.len(),
            dialect,
        })
    }

    /// `SELECT projection FROM [collection.]entity [WHERE expr] [LIMIT n] [OFFSET n] [;]`
    pub fn parse_select(&mut self) -> Result<SelectStatement, ParseError> {
        match self.peek() {
            Some(Token::Select) => {
                self.advance();
            }
            Some(_) => {
                let tok = self.next()?;
                return Err(ParseError::new(
                    format!("only SELECT statements are supported, found {}", tok.token.describe()),
                    tok.span,
                ));
            }
            None => return Err(self.eof_error()),
        }

        let projection = self.parse_projection()?;
        self.expect(Token::From)?;
        let table = self.parse_table_ref()?;

        let selection = if self.eat(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let limit = if self.eat(&Token::Limit) {
            Some(self.expect_count()?)
        } else {
            None
        };
        let offset = if self.eat(&Token::Offset) {
            Some(self.expect_count()?)
        } else {
            None
        };
        self.eat(&Token::Semicolon);
        self.expect_end()?;

        Ok(SelectStatement {
            projection,
            table,
            selection,
            limit,
            offset,
        })
    }

    /// Parse a standalone expression that must consume the whole input.
    pub fn parse_standalone_expr(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        self.expect_end()?;
        Ok(expr)
    }

    fn parse_projection(&mut self) -> Result<Projection, ParseError> {
        if self.eat(&Token::Star) {
            return Ok(Projection::Wildcard);
        }
        let mut columns = vec![self.expect_name()?];
        while self.eat(&Token::Comma) {
            columns.push(self.expect_name()?);
        }
        Ok(Projection::Columns(columns))
    }

    fn parse_table_ref(&mut self) -> Result<TableRef, ParseError> {
        let first = self.expect_name()?;
        if self.eat(&Token::Dot) {
            let name = self.expect_name()?;
            Ok(TableRef {
                collection: Some(first),
                name,
            })
        } else {
            Ok(TableRef {
                collection: None,
                name: first,
            })
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or | Token::OrKw)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And | Token::AndKw)) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::Bang | Token::NotKw)) {
            self.advance();
            return Ok(Expr::not(self.parse_not()?));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;

        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::NotKw);
            self.expect(Token::Null)?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(self.parse_unary()?),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.next()?;
        let expr = match tok.token {
            Token::Int(i) => Expr::Literal(Literal::Int(i)),
            Token::Float(f) => Expr::Literal(Literal::Float(f)),
            Token::SingleQuoted(s) => Expr::Literal(Literal::String(s)),
            Token::DoubleQuoted(s) => match self.dialect {
                Dialect::Sql => Expr::Ident(quoted_ident(s, tok.span)?),
                Dialect::Expression => Expr::Literal(Literal::String(s)),
            },
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::Null => Expr::Literal(Literal::Null),
            Token::Ident(name) => Expr::Ident(name),
            Token::Param(0) => {
                return Err(ParseError::new("parameters are numbered from $1", tok.span))
            }
            Token::Param(n) => Expr::Param(n),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                inner
            }
            other => {
                return Err(ParseError::new(
                    format!("expected an expression, found {}", other.describe()),
                    tok.span,
                ))
            }
        };
        Ok(expr)
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        let tok = self.next()?;
        match tok.token {
            Token::Ident(name) => Ok(name),
            Token::DoubleQuoted(name) if self.dialect == Dialect::Sql => quoted_ident(name, tok.span),
            other => Err(ParseError::new(
                format!("expected a name, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    fn expect_count(&mut self) -> Result<u64, ParseError> {
        let tok = self.next()?;
        match tok.token {
            Token::Int(i) if i >= 0 => Ok(i as u64),
            other => Err(ParseError::new(
                format!("expected a row count, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.token.describe()
                ),
                tok.span,
            ))
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(tok) => Err(ParseError::new(
                format!("unexpected trailing {}", tok.token.describe()),
                tok.span,
            )
            .with_hint("joins, grouping and ordering are not supported")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn next(&mut self) -> Result<SpannedToken, ParseError> {
        let tok = self.tokens.get(self.pos).cloned().ok_or_else(|| self.eof_error())?;
        self.advance();
        Ok(tok)
    }

    fn eof_error(&self) -> ParseError {
        ParseError::new("unexpected end of input", Span::new(self.end, self.end))
    }
}

/// A quoted SQL identifier may differ from a bare one only in case or by
/// being a keyword.
fn quoted_ident(name: String, span: Span) -> Result<String, ParseError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(ParseError::new(format!("invalid identifier \"{name}\""), span)
            .with_hint("identifiers contain only letters, digits and underscores"))
    }
}

/// Parse a SELECT statement.
pub fn parse_select(source: &str) -> Result<SelectStatement, ParseError> {
    Parser::new(source, Dialect::Sql)?.parse_select()
}

/// Parse a conditional expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    Parser::new(source, Dialect::Expression)?.parse_standalone_expr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_star() {
        let stmt = parse_select("SELECT * FROM transactions").unwrap();
        assert_eq!(stmt.projection, Projection::Wildcard);
        assert_eq!(stmt.table.name, "transactions");
        assert_eq!(stmt.table.collection, None);
        assert!(stmt.selection.is_none());
    }

    #[test]
    fn test_select_columns_with_collection() {
        let stmt =
            parse_select(r#"select id, "Vendor" from c.transactions limit 5 offset 10;"#).unwrap();
        assert_eq!(
            stmt.projection,
            Projection::Columns(vec!["id".into(), "Vendor".into()])
        );
        assert_eq!(stmt.table.collection.as_deref(), Some("c"));
        assert_eq!(stmt.limit, Some(5));
        assert_eq!(stmt.offset, Some(10));
    }

    #[test]
    fn test_quoted_identifier_grammar() {
        let stmt = parse_select(r#"SELECT "Select" FROM t WHERE "Vendor" = 'x'"#).unwrap();
        assert_eq!(stmt.projection, Projection::Columns(vec!["Select".into()]));

        for sql in [
            r#"SELECT id FROM transactions WHERE "x\" IS NULL OR 1=1) UNION SELECT ssn FROM transactions --" = 1"#,
            r#"SELECT "a b" FROM t"#,
            r#"SELECT id FROM "t;drop""#,
            r#"SELECT id FROM t WHERE "" = 1"#,
        ] {
            assert!(parse_select(sql).is_err(), "{sql}");
        }
    }

    #[test]
    fn test_where_precedence() {
        let stmt = parse_select("SELECT * FROM t WHERE a = 1 OR b = 2 AND NOT c").unwrap();
        let expected = Expr::binary(
            BinaryOp::Or,
            Expr::binary(
                BinaryOp::Eq,
                Expr::ident("a"),
                Expr::Literal(Literal::Int(1)),
            ),
            Expr::binary(
                BinaryOp::And,
                Expr::binary(
                    BinaryOp::Eq,
                    Expr::ident("b"),
                    Expr::Literal(Literal::Int(2)),
                ),
                Expr::not(Expr::ident("c")),
            ),
        );
        assert_eq!(stmt.selection, Some(expected));
    }

    #[test]
    fn test_arithmetic_binds_tighter_than_comparison() {
        let expr = parse_expression("a + 2 * b >= -c").unwrap();
        assert_eq!(expr.to_string(), "a + 2 * b >= -c");
        match expr {
            Expr::Binary { op, .. } => assert_eq!(op, BinaryOp::Ge),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_is_null() {
        let expr = parse_expression("vendor IS NOT NULL && ssn is null").unwrap();
        assert_eq!(expr.to_string(), "vendor IS NOT NULL AND ssn IS NULL");
    }

    #[test]
    fn test_double_quotes_depend_on_dialect() {
        assert_eq!(
            parse_expression(r#"name == "bob""#).unwrap(),
            Expr::binary(
                BinaryOp::Eq,
                Expr::ident("name"),
                Expr::Literal(Literal::String("bob".into()))
            )
        );
        let stmt = parse_select(r#"SELECT * FROM t WHERE "name" = 'bob'"#).unwrap();
        assert_eq!(
            stmt.selection.unwrap(),
            Expr::binary(
                BinaryOp::Eq,
                Expr::ident("name"),
                Expr::Literal(Literal::String("bob".into()))
            )
        );
    }

    #[test]
    fn test_rejects_non_select() {
        let err = parse_select("DELETE FROM transactions").unwrap_err();
        assert!(err.message.contains("only SELECT"));
        assert!(parse_select("").is_err());
    }

    #[test]
    fn test_rejects_joins() {
        let err = parse_select("SELECT * FROM a JOIN b").unwrap_err();
        assert!(err.message.contains("trailing"));
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_rejects_incomplete_expression() {
        assert!(parse_expression("a ==").is_err());
        assert!(parse_expression("(a == 1").is_err());
        assert!(parse_expression("a == 1 2").is_err());
    }

    #[test]
    fn test_rendering_reparses() {
        let source = "SELECT a, b FROM c.t WHERE (a = 1 OR b <> 'x') AND NOT (a > $1) LIMIT 3";
        let stmt = parse_select(source).unwrap();
        let rendered = stmt.to_string();
        assert_eq!(parse_select(&rendered).unwrap(), stmt);
    }
}
