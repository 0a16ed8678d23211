//! Record frames.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{Schema, Value};

/// A dense positional row aligned with `Schema::fields`.
///
/// Only the first record of a stream carries `schema`; every later record
/// carries fields alone.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Record {
    pub schema: Option<Schema>,
    pub fields: Vec<Value>,
}

impl Record {
    pub fn new(fields: Vec<Value>) -> Self {
        Self {
            schema: None,
            fields,
        }
    }

    /// A schema-carrying record with no fields, used to open a stream.
    pub fn schema_frame(schema: Schema) -> Self {
        Self {
            schema: Some(schema),
            fields: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.fields.get_mut(index)
    }
}
