//! Source schemas: the ordered, typed column list of one entity.

use std::fmt;
use std::str::FromStr;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::Value;

/// Column types a source may expose.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    BigInt,
    Int,
    SmallInt,
    Bool,
    ByteA,
    Char,
    VarChar,
    Text,
    Double,
    Real,
    Timestamp,
}

impl FieldType {
    pub const ALL: [FieldType; 11] = [
        FieldType::BigInt,
        FieldType::Int,
        FieldType::SmallInt,
        FieldType::Bool,
        FieldType::ByteA,
        FieldType::Char,
        FieldType::VarChar,
        FieldType::Text,
        FieldType::Double,
        FieldType::Real,
        FieldType::Timestamp,
    ];

    pub const NUMERIC: [FieldType; 5] = [
        FieldType::BigInt,
        FieldType::Int,
        FieldType::SmallInt,
        FieldType::Double,
        FieldType::Real,
    ];

    pub const TEXTUAL: [FieldType; 3] = [FieldType::Char, FieldType::VarChar, FieldType::Text];

    /// The SQL name, e.g. `VARCHAR`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::BigInt => "BIGINT",
            FieldType::Int => "INT",
            FieldType::SmallInt => "SMALLINT",
            FieldType::Bool => "BOOL",
            FieldType::ByteA => "BYTEA",
            FieldType::Char => "CHAR",
            FieldType::VarChar => "VARCHAR",
            FieldType::Text => "TEXT",
            FieldType::Double => "DOUBLE",
            FieldType::Real => "REAL",
            FieldType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn is_numeric(&self) -> bool {
        Self::NUMERIC.contains(self)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::BigInt | FieldType::Int | FieldType::SmallInt)
    }

    pub fn is_textual(&self) -> bool {
        Self::TEXTUAL.contains(self)
    }

    /// Whether `value` carries the wire tag this column type requires.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (FieldType::BigInt, Value::Int64(_))
                | (FieldType::Int | FieldType::SmallInt, Value::Int32(_))
                | (FieldType::Bool, Value::Bool(_))
                | (FieldType::ByteA, Value::Bytes(_))
                | (
                    FieldType::Char | FieldType::VarChar | FieldType::Text,
                    Value::String(_)
                )
                | (FieldType::Double, Value::Double(_))
                | (FieldType::Real, Value::Float(_))
                | (FieldType::Timestamp, Value::Timestamp(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        FieldType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown field type '{s}'"))
    }
}

/// One column of a schema.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct FieldInfo {
    /// Column type.
    pub field: FieldType,
    /// Declared size in bytes, or -1 when variable/unknown.
    pub size: i64,
    /// Column name.
    pub name: String,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field: FieldType) -> Self {
        Self {
            field,
            size: -1,
            name: name.into(),
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }
}

/// Ordered column list of one entity as reported by a source.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Schema {
    /// Label of the source that produced the schema.
    pub data_source: String,
    /// Entity (table) name.
    pub target: String,
    /// Record type name, usually the target.
    pub record_type: String,
    /// Columns in canonical order.
    pub fields: Vec<FieldInfo>,
}

impl Schema {
    pub fn new(data_source: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            data_source: data_source.into(),
            record_type: target.clone(),
            target,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldInfo>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Position of the named column.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Restrict the schema to `names`, in the order given. Unknown names are
    /// skipped.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Schema {
        Schema {
            data_source: self.data_source.clone(),
            target: self.target.clone(),
            record_type: self.record_type.clone(),
            fields: names
                .iter()
                .filter_map(|n| self.field(n.as_ref()).cloned())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transactions() -> Schema {
        Schema::new("payments-db", "transactions").with_fields([
            FieldInfo::new("id", FieldType::BigInt).with_size(8),
            FieldInfo::new("processor", FieldType::VarChar),
            FieldInfo::new("value", FieldType::Double).with_size(8),
        ])
    }

    #[test]
    fn test_field_type_display_and_parse() {
        assert_eq!(FieldType::VarChar.to_string(), "VARCHAR");
        assert_eq!("bytea".parse::<FieldType>().unwrap(), FieldType::ByteA);
        assert!("uuid".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_field_type_serde_names() {
        let json = serde_json::to_string(&FieldType::SmallInt).unwrap();
        assert_eq!(json, "\"SMALLINT\"");
        let parsed: FieldType = serde_json::from_str("\"TIMESTAMP\"").unwrap();
        assert_eq!(parsed, FieldType::Timestamp);
    }

    #[test]
    fn test_accepts_matches_wire_tags() {
        assert!(FieldType::BigInt.accepts(&Value::Int64(1)));
        assert!(!FieldType::BigInt.accepts(&Value::Int32(1)));
        assert!(FieldType::SmallInt.accepts(&Value::Int32(1)));
        assert!(FieldType::Real.accepts(&Value::Float(1.0)));
        assert!(!FieldType::Real.accepts(&Value::Double(1.0)));
        assert!(FieldType::Text.accepts(&Value::Null));
    }

    #[test]
    fn test_field_lookup() {
        let schema = transactions();
        assert_eq!(schema.field_index("value"), Some(2));
        assert_eq!(schema.field("processor").unwrap().field, FieldType::VarChar);
        assert!(schema.field("ssn").is_none());
    }

    #[test]
    fn test_project_preserves_requested_order() {
        let projected = transactions().project(&["value", "id", "missing"]);
        let names: Vec<_> = projected.field_names().collect();
        assert_eq!(names, vec!["value", "id"]);
        assert_eq!(projected.target, "transactions");
    }
}
