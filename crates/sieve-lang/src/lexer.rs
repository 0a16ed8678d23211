//! Lexer shared by the SELECT parser and the expression compiler.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Tokens of the query and expression languages.
///
/// Keywords are case-insensitive. Whether a double-quoted token is an
/// identifier or a string is decided by the parser's dialect.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("select", ignore(ascii_case))]
    Select,
    #[token("from", ignore(ascii_case))]
    From,
    #[token("where", ignore(ascii_case))]
    Where,
    #[token("limit", ignore(ascii_case))]
    Limit,
    #[token("offset", ignore(ascii_case))]
    Offset,
    #[token("and", ignore(ascii_case))]
    AndKw,
    #[token("or", ignore(ascii_case))]
    OrKw,
    #[token("not", ignore(ascii_case))]
    NotKw,
    #[token("is", ignore(ascii_case))]
    Is,
    #[token("null", ignore(ascii_case))]
    Null,
    #[token("true", ignore(ascii_case))]
    True,
    #[token("false", ignore(ascii_case))]
    False,

    // Comparison operators
    #[token("==")]
    #[token("=")]
    Eq,
    #[token("!=")]
    #[token("<>")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Logical operators
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("!")]
    Bang,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    DoubleQuoted(String),

    // SQL style: a doubled quote stands for one quote
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    SingleQuoted(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"\$[0-9]+", |lex| lex.slice()[1..].parse::<usize>().ok())]
    Param(usize),

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl Token {
    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::DoubleQuoted(s) => format!("\"{s}\""),
            Token::SingleQuoted(s) => format!("'{s}'"),
            Token::Int(i) => format!("integer {i}"),
            Token::Float(f) => format!("number {f}"),
            Token::Param(n) => format!("parameter ${n}"),
            other => format!("{other:?}"),
        }
    }
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(other @ ('\\' | '"' | '\'')) => result.push(other),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Iterator of spanned tokens that surfaces unrecognised input as errors.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<SpannedToken, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.inner.next()?;
        let span: Span = self.inner.span().into();
        Some(match token {
            Ok(token) => Ok(SpannedToken { token, span }),
            Err(()) => Err(ParseError::new(
                format!("unrecognised input '{}'", self.inner.slice()),
                span,
            )),
        })
    }
}

/// Tokenize a whole source string, failing on the first bad token.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_keywords_ignore_case() {
        assert_eq!(
            tokens("select * From t WHERE a"),
            vec![
                Token::Select,
                Token::Star,
                Token::From,
                Token::Ident("t".into()),
                Token::Where,
                Token::Ident("a".into()),
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(tokens("selection"), vec![Token::Ident("selection".into())]);
        assert_eq!(tokens("order_id"), vec![Token::Ident("order_id".into())]);
    }

    #[test]
    fn test_operator_aliases() {
        assert_eq!(
            tokens("a = b == c != d <> e"),
            vec![
                Token::Ident("a".into()),
                Token::Eq,
                Token::Ident("b".into()),
                Token::Eq,
                Token::Ident("c".into()),
                Token::Ne,
                Token::Ident("d".into()),
                Token::Ne,
                Token::Ident("e".into()),
            ]
        );
    }

    #[test]
    fn test_numbers_and_params() {
        assert_eq!(
            tokens("42 3.5 1e3 $2"),
            vec![
                Token::Int(42),
                Token::Float(3.5),
                Token::Float(1000.0),
                Token::Param(2),
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#"'it''s' "say \"hi\"""#),
            vec![
                Token::SingleQuoted("it's".into()),
                Token::DoubleQuoted("say \"hi\"".into()),
            ]
        );
    }

    #[test]
    fn test_unrecognised_input_is_an_error() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.span, Span::new(2, 3));
        assert!(err.message.contains('#'));
    }
}
