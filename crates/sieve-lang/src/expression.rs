//! Compiled boolean expressions used as per-record conditions.

use crate::ast::Expr;
use crate::error::{EvalError, ParseError};
use crate::eval::{evaluate, Environment, Variable};
use crate::parser::parse_expression;

/// An expression parsed once and evaluated many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
    variables: Vec<String>,
}

impl Expression {
    /// Parse `source` and capture its free variables.
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        let ast = parse_expression(source)?;

        let mut variables: Vec<String> = Vec::new();
        let mut param = None;
        ast.walk(&mut |e| match e {
            Expr::Ident(name) if !variables.contains(name) => variables.push(name.clone()),
            Expr::Param(n) => param = param.or(Some(*n)),
            _ => {}
        });
        if let Some(n) = param {
            return Err(ParseError::new(
                format!("parameter ${n} cannot be used in a condition"),
                Default::default(),
            ));
        }

        Ok(Self {
            source: source.to_string(),
            ast,
            variables,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Identifiers referenced by the expression, in first-use order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn evaluate(&self, env: &dyn Environment) -> Result<Variable, EvalError> {
        evaluate(&self.ast, env, &[])
    }

    /// Evaluate and require a boolean result.
    pub fn evaluate_bool(&self, env: &dyn Environment) -> Result<bool, EvalError> {
        match self.evaluate(env)? {
            Variable::Bool(b) => Ok(b),
            other => Err(EvalError::BoolOnly(other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_free_variables_deduplicated() {
        let expr = Expression::compile("a > 1 && (b == a || c)").unwrap();
        assert_eq!(expr.variables(), &["a", "b", "c"]);
        assert_eq!(expr.source(), "a > 1 && (b == a || c)");
    }

    #[test]
    fn test_evaluate_bool() {
        let expr = Expression::compile("my_field == 64").unwrap();
        let mut env = HashMap::new();
        env.insert("my_field".to_string(), Variable::Int(64));
        assert!(expr.evaluate_bool(&env).unwrap());
        env.insert("my_field".to_string(), Variable::Int(10));
        assert!(!expr.evaluate_bool(&env).unwrap());
    }

    #[test]
    fn test_non_boolean_result_rejected() {
        let expr = Expression::compile("my_field + 1").unwrap();
        let env = HashMap::from([("my_field".to_string(), Variable::Int(1))]);
        assert_eq!(expr.evaluate(&env).unwrap(), Variable::Int(2));
        assert_eq!(expr.evaluate_bool(&env), Err(EvalError::BoolOnly("int")));
    }

    #[test]
    fn test_unknown_variable() {
        let expr = Expression::compile("nonexistent == 64").unwrap();
        let env: HashMap<String, Variable> = HashMap::new();
        assert_eq!(
            expr.evaluate_bool(&env),
            Err(EvalError::FieldNotFound("nonexistent".into()))
        );
    }

    #[test]
    fn test_compile_rejects_params_and_garbage() {
        assert!(Expression::compile("a == $1").is_err());
        assert!(Expression::compile("a ==").is_err());
        assert!(Expression::compile("").is_err());
    }
}
