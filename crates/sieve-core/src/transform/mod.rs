//! Field transformations.
//!
//! A [`Transformation`] rewrites one field of every record in place. The
//! [`TransformationRegistry`] maps function names to constructors; it is
//! assembled once at startup through [`TransformationRegistryBuilder`] and
//! shared read-only afterwards.
//!
//! Instances hold per-request state (keys, PRNGs) and are never shared
//! between requests.
//!
//! | function       | field types                     | arguments                          |
//! |----------------|---------------------------------|------------------------------------|
//! | `identity`     | all                             |                                    |
//! | `plusOne`      | numeric                         |                                    |
//! | `rounding`     | DOUBLE, REAL                    | `roundingType`, `precision`        |
//! | `perturbation` | numeric                         | `min`, `max`, `seed`               |
//! | `tokenization` | TEXT, CHAR, VARCHAR, BYTEA      | `maxSize`                          |
//! | `scrambler`    | TEXT, CHAR, VARCHAR             |                                    |
//! | `redaction`    | TEXT, CHAR, VARCHAR, BYTEA      | `replacement`                      |
//! | `masking`      | TEXT, CHAR, VARCHAR             | `visibleChars`, `fromEnd`, `maskChar` |

pub mod args;
mod conditional;
mod identity;
mod masking;
mod numeric;
mod scrambler;
mod tokenization;

use std::collections::HashMap;
use std::fmt;

use sieve_proto::{FieldType, Record, Schema, Value};

use crate::error::{Error, Result};
use crate::policy::TransformationSpec;

pub use args::Args;
pub use conditional::Conditional;
pub use identity::Identity;
pub use masking::{Masking, Redaction};
pub use numeric::{Perturbation, PlusOne, Rounding};
pub use scrambler::Scrambler;
pub use tokenization::Tokenization;

/// A per-field value rewrite.
pub trait Transformation: Send {
    /// Registered function name.
    fn function(&self) -> &str;

    /// Name of the field this instance rewrites.
    fn field(&self) -> &str;

    /// Field types the transformation can consume.
    fn supported_types(&self) -> &[FieldType];

    /// Check argument shape. Must not change state.
    fn validate(&self, args: &Args) -> Result<()>;

    /// Prepare per-request state. Called once, after `validate`.
    fn initialize(&mut self, args: &Args) -> Result<()>;

    /// Rewrite this instance's field of `record` in place.
    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()>;
}

/// Builds a transformation bound to a field name.
pub type Constructor = fn(&str) -> Box<dyn Transformation>;

/// Function name to constructor map. Read-only once built.
#[derive(Clone, Default)]
pub struct TransformationRegistry {
    constructors: HashMap<String, Constructor>,
}

impl TransformationRegistry {
    pub fn builder() -> TransformationRegistryBuilder {
        TransformationRegistryBuilder::default()
    }

    pub fn get(&self, function: &str) -> Result<Constructor> {
        self.constructors
            .get(function)
            .copied()
            .ok_or_else(|| Error::UnknownTransformation(function.to_string()))
    }

    /// Construct an uninitialized instance for `field`.
    pub fn create(&self, function: &str, field: &str) -> Result<Box<dyn Transformation>> {
        Ok(self.get(function)?(field))
    }

    /// Check a spec's function and arguments using a throw-away instance.
    pub fn validate(&self, spec: &TransformationSpec) -> Result<()> {
        self.create(&spec.function, &spec.field)?.validate(&spec.args)
    }

    pub fn contains(&self, function: &str) -> bool {
        self.constructors.contains_key(function)
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TransformationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct TransformationRegistryBuilder {
    constructors: HashMap<String, Constructor>,
}

impl TransformationRegistryBuilder {
    /// Register `constructor` under `function`, replacing any previous one.
    pub fn register(mut self, function: impl Into<String>, constructor: Constructor) -> Self {
        self.constructors.insert(function.into(), constructor);
        self
    }

    pub fn with_builtins(self) -> Self {
        self.register(identity::FUNCTION, Identity::boxed)
            .register(numeric::PLUS_ONE, PlusOne::boxed)
            .register(numeric::ROUNDING, Rounding::boxed)
            .register(numeric::PERTURBATION, Perturbation::boxed)
            .register(tokenization::FUNCTION, Tokenization::boxed)
            .register(scrambler::FUNCTION, Scrambler::boxed)
            .register(masking::REDACTION, Redaction::boxed)
            .register(masking::MASKING, Masking::boxed)
    }

    pub fn build(self) -> TransformationRegistry {
        TransformationRegistry {
            constructors: self.constructors,
        }
    }
}

/// Locate `field` in `record` through `schema`.
pub(crate) fn field_slot<'r>(
    schema: &Schema,
    record: &'r mut Record,
    field: &str,
) -> Result<(FieldType, &'r mut Value)> {
    let index = schema
        .field_index(field)
        .ok_or_else(|| Error::FieldNotFound(format!("'{field}' is not a field in {}", schema.data_source)))?;
    let field_type = schema.fields[index].field;
    let arity = record.len();
    let value = record.get_mut(index).ok_or_else(|| {
        Error::Internal(format!(
            "record has {arity} fields, schema has {}",
            schema.fields.len()
        ))
    })?;
    Ok((field_type, value))
}

/// Error for a value whose tag the transformation cannot handle.
pub(crate) fn unsupported(function: &str, field_type: FieldType) -> Error {
    Error::UnsupportedType {
        function: function.to_string(),
        field_type,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = TransformationRegistry::builder().with_builtins().build();
        assert_eq!(
            registry.names(),
            vec![
                "identity",
                "masking",
                "perturbation",
                "plusOne",
                "redaction",
                "rounding",
                "scrambler",
                "tokenization",
            ]
        );
        let t = registry.create("plusOne", "amount").unwrap();
        assert_eq!(t.function(), "plusOne");
        assert_eq!(t.field(), "amount");
    }

    #[test]
    fn test_unknown_function() {
        let registry = TransformationRegistry::builder().build();
        assert!(matches!(
            registry.get("identity"),
            Err(Error::UnknownTransformation(name)) if name == "identity"
        ));
    }

    #[test]
    fn test_custom_registration_overrides() {
        fn shout(field: &str) -> Box<dyn Transformation> {
            Identity::boxed(field)
        }
        let registry = TransformationRegistry::builder()
            .register("shout", shout)
            .build();
        assert!(registry.contains("shout"));
        assert!(!registry.contains("identity"));
    }

    #[test]
    fn test_validate_uses_args() {
        let registry = TransformationRegistry::builder().with_builtins().build();
        let ok = TransformationSpec::new("v", "rounding").with_arg("precision", 2);
        registry.validate(&ok).unwrap();

        let bad = TransformationSpec::new("v", "rounding").with_arg("roundingType", "up");
        assert!(matches!(
            registry.validate(&bad),
            Err(Error::WrongArgument { .. })
        ));
    }

    #[test]
    fn test_field_slot_missing() {
        let schema = testing::schema_of("a", FieldType::Int);
        let mut record = Record::new(vec![Value::Int32(1)]);
        assert!(matches!(
            field_slot(&schema, &mut record, "b"),
            Err(Error::FieldNotFound(_))
        ));
    }
}
