use std::collections::HashMap;

use sieve_lang::{EvalError, Expression, Variable};
use sieve_proto::{FieldType, Record, Schema};
use tracing::trace;

use super::args::Args;
use super::Transformation;
use crate::error::{Error, Result};

/// Gates an inner transformation behind a `where` expression evaluated
/// against each record.
pub struct Conditional {
    inner: Box<dyn Transformation>,
    condition: Expression,
    source: String,
}

impl Conditional {
    /// `source` names the data source in error messages.
    pub fn new(inner: Box<dyn Transformation>, condition: Expression, source: impl Into<String>) -> Self {
        Self {
            inner,
            condition,
            source: source.into(),
        }
    }

    pub fn condition(&self) -> &Expression {
        &self.condition
    }

    fn bind(&self, schema: &Schema, record: &Record) -> Result<HashMap<String, Variable>> {
        let mut env = HashMap::with_capacity(self.condition.variables().len());
        for name in self.condition.variables() {
            let value = schema
                .field_index(name)
                .and_then(|i| record.get(i))
                .ok_or_else(|| self.not_a_field(name))?;
            env.insert(name.clone(), Variable::from(value));
        }
        Ok(env)
    }

    fn not_a_field(&self, name: &str) -> Error {
        Error::FieldNotFound(format!(
            "Could not evaluate where clause because '{name}' is not a field in {}",
            self.source
        ))
    }

    fn matches(&self, schema: &Schema, record: &Record) -> Result<bool> {
        let env = self.bind(schema, record)?;
        self.condition.evaluate_bool(&env).map_err(|e| match e {
            EvalError::FieldNotFound(name) => self.not_a_field(&name),
            other => Error::EvaluateBoolOnly(format!(
                "Could not evaluate where clause '{}': {other}",
                self.condition.source()
            )),
        })
    }
}

impl Transformation for Conditional {
    fn function(&self) -> &str {
        self.inner.function()
    }

    fn field(&self) -> &str {
        self.inner.field()
    }

    fn supported_types(&self) -> &[FieldType] {
        self.inner.supported_types()
    }

    fn validate(&self, args: &Args) -> Result<()> {
        self.inner.validate(args)
    }

    fn initialize(&mut self, args: &Args) -> Result<()> {
        self.inner.initialize(args)
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        if !self.matches(schema, record)? {
            trace!(function = self.inner.function(), field = self.inner.field(), "condition false");
            return Ok(());
        }
        self.inner.transform(schema, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::PlusOne;
    use sieve_proto::{FieldInfo, Value};

    fn schema() -> Schema {
        Schema::new("payments-db", "transactions").with_fields([
            FieldInfo::new("my_field", FieldType::BigInt),
            FieldInfo::new("vendor", FieldType::VarChar),
            FieldInfo::new("created", FieldType::Timestamp),
        ])
    }

    fn conditional(condition: &str) -> Conditional {
        let mut t = Conditional::new(
            Box::new(PlusOne::new("my_field")),
            Expression::compile(condition).unwrap(),
            "payments-db",
        );
        t.initialize(&Args::new()).unwrap();
        t
    }

    fn record(n: i64) -> Record {
        Record::new(vec![
            Value::Int64(n),
            Value::String("acme".into()),
            Value::Timestamp(1_704_067_200_000_000),
        ])
    }

    fn run(t: &mut Conditional, n: i64) -> Result<Value> {
        let mut r = record(n);
        t.transform(&schema(), &mut r)?;
        Ok(r.fields[0].clone())
    }

    #[test]
    fn test_applies_only_when_true() {
        let mut t = conditional("my_field == 64");
        assert_eq!(run(&mut t, 64).unwrap(), Value::Int64(65));
        assert_eq!(run(&mut t, 10).unwrap(), Value::Int64(10));
        assert_eq!(t.function(), "plusOne");
    }

    #[test]
    fn test_text_and_timestamp_bindings() {
        let mut t = conditional("vendor = 'acme' AND created >= '2024-01-01T00:00:00Z'");
        assert_eq!(run(&mut t, 1).unwrap(), Value::Int64(2));
        let mut t = conditional("created < '2023-06-01T00:00:00Z'");
        assert_eq!(run(&mut t, 1).unwrap(), Value::Int64(1));
    }

    #[test]
    fn test_unknown_variable() {
        let mut t = conditional("nonexistent == 64");
        let err = run(&mut t, 64).unwrap_err();
        assert_eq!(err.code(), "field_not_found");
        assert_eq!(
            err.to_string(),
            "Could not evaluate where clause because 'nonexistent' is not a field in payments-db"
        );
    }

    #[test]
    fn test_non_boolean_condition() {
        let mut t = conditional("my_field + 1");
        let err = run(&mut t, 64).unwrap_err();
        assert!(matches!(err, Error::EvaluateBoolOnly(_)), "{err:?}");
    }
}
