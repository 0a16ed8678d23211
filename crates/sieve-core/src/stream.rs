//! The transform stream: the outbound record path between a source and the
//! wire.
//!
//! A [`TransformStream`] is built per request from the evaluator's ordered
//! transformation specs. Construction resolves and initializes every
//! transformation up front, so a misconfigured policy fails the request
//! before any record is produced. Records are then rewritten in place and
//! forwarded in arrival order.

use std::collections::HashSet;

use async_trait::async_trait;
use sieve_lang::Expression;
use sieve_proto::{Record, Schema};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::policy::TransformationSpec;
use crate::transform::{Conditional, Transformation, TransformationRegistry};

/// Destination for outbound records.
#[async_trait]
pub trait RecordSink: Send {
    async fn send(&mut self, record: Record) -> Result<()>;
}

#[async_trait]
impl RecordSink for Vec<Record> {
    async fn send(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

#[async_trait]
impl RecordSink for mpsc::Sender<Record> {
    async fn send(&mut self, record: Record) -> Result<()> {
        mpsc::Sender::send(self, record)
            .await
            .map_err(|_| Error::Closed("record stream".to_string()))
    }
}

#[async_trait]
impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    async fn send(&mut self, record: Record) -> Result<()> {
        (**self).send(record).await
    }
}

/// Applies a request's transformations to every record on its way out.
pub struct TransformStream<S> {
    sink: S,
    schema: Schema,
    transforms: Vec<Box<dyn Transformation>>,
    schema_sent: bool,
    schema_received: bool,
    records: u64,
}

impl<S: RecordSink> TransformStream<S> {
    /// Resolve, check and initialize `specs` in order against `schema`.
    ///
    /// `source` is the data source label used in error messages.
    pub fn new(
        sink: S,
        schema: Schema,
        specs: &[TransformationSpec],
        registry: &TransformationRegistry,
        source: &str,
    ) -> Result<Self> {
        let mut names = HashSet::with_capacity(schema.fields.len());
        if let Some(name) = schema.field_names().find(|name| !names.insert(*name)) {
            return Err(Error::InvalidQuery(format!(
                "field '{name}' appears more than once in the projection"
            )));
        }

        let mut transforms: Vec<Box<dyn Transformation>> = Vec::with_capacity(specs.len());
        for spec in specs {
            let constructor = registry.get(&spec.function)?;
            let mut transformation = constructor(&spec.field);

            let info = schema.field(&spec.field).ok_or_else(|| {
                Error::FieldNotFound(format!(
                    "Could not apply {} because '{}' is not a field in {source}",
                    spec.function, spec.field
                ))
            })?;
            if !transformation.supported_types().contains(&info.field) {
                return Err(Error::UnsupportedType {
                    function: spec.function.clone(),
                    field_type: info.field,
                });
            }

            let condition = spec
                .condition()
                .map(|c| {
                    Expression::compile(c).map_err(|e| {
                        Error::InvalidPolicy(format!("where clause '{c}' does not compile: {e}"))
                    })
                })
                .transpose()?;

            transformation.validate(&spec.args)?;
            transformation.initialize(&spec.args)?;

            debug!(
                function = %spec.function,
                field = %spec.field,
                conditional = condition.is_some(),
                "transformation ready"
            );
            transforms.push(match condition {
                Some(condition) => Box::new(Conditional::new(transformation, condition, source)),
                None => transformation,
            });
        }

        Ok(Self {
            sink,
            schema,
            transforms,
            schema_sent: false,
            schema_received: false,
            records: 0,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Data records forwarded so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn transformations(&self) -> usize {
        self.transforms.len()
    }

    /// Transform and forward one record.
    pub async fn send(&mut self, mut record: Record) -> Result<()> {
        if let Some(schema) = record.schema.take() {
            self.accept_schema(schema)?;
        }
        self.schema_received = true;

        if record.fields.is_empty() && !self.schema.fields.is_empty() {
            // A bare schema frame.
            return self.send_schema().await;
        }

        self.check_shape(&record)?;
        for transformation in &mut self.transforms {
            transformation.transform(&self.schema, &mut record)?;
        }

        if !self.schema_sent {
            record.schema = Some(self.schema.clone());
            self.schema_sent = true;
        }
        self.records += 1;
        self.sink.send(record).await
    }

    /// Emit the schema frame if nothing was forwarded, and hand back the
    /// sink.
    pub async fn finish(mut self) -> Result<S> {
        self.send_schema().await?;
        Ok(self.sink)
    }

    async fn send_schema(&mut self) -> Result<()> {
        if self.schema_sent {
            return Ok(());
        }
        self.schema_sent = true;
        self.sink.send(Record::schema_frame(self.schema.clone())).await
    }

    fn accept_schema(&mut self, schema: Schema) -> Result<()> {
        let same_shape = schema.fields.len() == self.schema.fields.len()
            && schema
                .fields
                .iter()
                .zip(&self.schema.fields)
                .all(|(a, b)| a.name == b.name && a.field == b.field);
        if !same_shape {
            let problem = if self.schema_received {
                "schema changed mid-stream"
            } else {
                "source schema does not match the query"
            };
            return Err(Error::Upstream(format!("{problem} on {}", self.schema.target)));
        }
        Ok(())
    }

    fn check_shape(&self, record: &Record) -> Result<()> {
        if record.len() != self.schema.fields.len() {
            return Err(Error::Upstream(format!(
                "record has {} fields, schema has {}",
                record.len(),
                self.schema.fields.len()
            )));
        }
        for (info, value) in self.schema.fields.iter().zip(&record.fields) {
            if !info.field.accepts(value) {
                return Err(Error::Upstream(format!(
                    "field '{}' of type {} carries a {} value",
                    info.name,
                    info.field,
                    value.tag()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: RecordSink> RecordSink for TransformStream<S> {
    async fn send(&mut self, record: Record) -> Result<()> {
        TransformStream::send(self, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sieve_proto::{FieldInfo, FieldType, Value};

    fn registry() -> TransformationRegistry {
        TransformationRegistry::builder().with_builtins().build()
    }

    fn schema() -> Schema {
        Schema::new("payments-db", "transactions").with_fields([
            FieldInfo::new("my_field", FieldType::BigInt),
            FieldInfo::new("name", FieldType::VarChar),
        ])
    }

    fn row(n: i64, name: &str) -> Record {
        Record::new(vec![Value::Int64(n), Value::from(name)])
    }

    fn stream(specs: &[TransformationSpec]) -> Result<TransformStream<Vec<Record>>> {
        TransformStream::new(Vec::new(), schema(), specs, &registry(), "payments-db")
    }

    #[tokio::test]
    async fn test_conditional_plus_one() {
        let spec = TransformationSpec::new("my_field", "plusOne").with_where("my_field == 64");
        let mut s = stream(&[spec]).unwrap();
        s.send(Record::schema_frame(schema())).await.unwrap();
        s.send(row(64, "a")).await.unwrap();
        s.send(row(10, "b")).await.unwrap();
        let out = s.finish().await.unwrap();

        assert_eq!(
            out,
            vec![
                Record::schema_frame(schema()),
                row(65, "a"),
                row(10, "b"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_condition_variable_aborts_record() {
        let spec = TransformationSpec::new("my_field", "plusOne").with_where("nonexistent == 64");
        let mut s = stream(&[spec]).unwrap();
        let err = s.send(row(64, "a").with_schema(schema())).await.unwrap_err();
        assert_eq!(
            err.to_envelope().to_string(),
            "field_not_found: Could not evaluate where clause because 'nonexistent' is not a field in payments-db"
        );
        assert_eq!(s.records(), 0);
        let out = s.finish().await.unwrap();
        assert_eq!(out, vec![Record::schema_frame(schema())]);
    }

    #[test]
    fn test_unsupported_type_fails_construction() {
        let err = stream(&[TransformationSpec::new("name", "plusOne")]).err().unwrap();
        assert_eq!(
            err.to_envelope().to_string(),
            "unsupported_type: Attempted to call plusOne transform on an unsupported type VARCHAR"
        );
    }

    #[test]
    fn test_construction_checks() {
        assert!(matches!(
            stream(&[TransformationSpec::new("my_field", "explode")]),
            Err(Error::UnknownTransformation(_))
        ));
        assert!(matches!(
            stream(&[TransformationSpec::new("missing", "identity")]),
            Err(Error::FieldNotFound(_))
        ));
        assert!(matches!(
            stream(&[TransformationSpec::new("name", "tokenization").with_arg("maxSize", 0)]),
            Err(Error::WrongArgument { .. })
        ));
        assert!(matches!(
            stream(&[TransformationSpec::new("my_field", "plusOne").with_where("my_field ==")]),
            Err(Error::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_repeated_projection_field_rejected() {
        let repeated = Schema::new("payments-db", "transactions").with_fields([
            FieldInfo::new("name", FieldType::VarChar),
            FieldInfo::new("name", FieldType::VarChar),
        ]);
        let spec = TransformationSpec::new("name", "redaction");
        let err = TransformStream::new(Vec::new(), repeated, &[spec], &registry(), "payments-db")
            .err()
            .unwrap();
        assert_eq!(err.code(), "invalid_query");
    }

    #[tokio::test]
    async fn test_schema_injected_when_source_omits_it() {
        let mut s = stream(&[]).unwrap();
        s.send(row(1, "a")).await.unwrap();
        s.send(row(2, "b")).await.unwrap();
        let out = s.finish().await.unwrap();
        assert_eq!(out, vec![row(1, "a").with_schema(schema()), row(2, "b")]);
    }

    #[tokio::test]
    async fn test_changed_schema_and_bad_shape_rejected() {
        let mut s = stream(&[]).unwrap();
        s.send(Record::schema_frame(schema())).await.unwrap();

        let other = Schema::new("payments-db", "transactions")
            .with_field(FieldInfo::new("my_field", FieldType::Int));
        assert!(matches!(
            s.send(Record::new(vec![Value::Int32(1)]).with_schema(other)).await,
            Err(Error::Upstream(_))
        ));
        assert!(matches!(
            s.send(Record::new(vec![Value::Int64(1)])).await,
            Err(Error::Upstream(_))
        ));
        assert!(matches!(
            s.send(Record::new(vec![Value::Int32(1), Value::from("x")])).await,
            Err(Error::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_transforms_apply_in_order() {
        let specs = [
            TransformationSpec::new("name", "redaction").with_arg("replacement", "abcdefgh"),
            TransformationSpec::new("name", "masking"),
        ];
        let mut s = stream(&specs).unwrap();
        s.send(row(1, "secret")).await.unwrap();
        let out = s.finish().await.unwrap();
        assert_eq!(out[0].fields[1], Value::from("****efgh"));
    }

    #[tokio::test]
    async fn test_forwards_to_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut s = TransformStream::new(tx, schema(), &[], &registry(), "payments-db").unwrap();
        s.send(row(7, "x")).await.unwrap();
        drop(s);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.schema, Some(schema()));
        assert!(rx.recv().await.is_none());
    }
}
