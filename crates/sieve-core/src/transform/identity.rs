use sieve_proto::{FieldType, Record, Schema};

use super::{field_slot, Args, Transformation};
use crate::error::Result;

pub(crate) const FUNCTION: &str = "identity";

/// Leaves the value untouched.
#[derive(Debug, Clone)]
pub struct Identity {
    field: String,
}

impl Identity {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }
}

impl Transformation for Identity {
    fn function(&self) -> &str {
        FUNCTION
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &FieldType::ALL
    }

    fn validate(&self, _args: &Args) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self, _args: &Args) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        field_slot(schema, record, &self.field).map(|_| ())
    }
}
