//! In-process tables, for tests, demos and small reference datasets.
//!
//! A dataset file lists tables with their columns and rows:
//!
//! ```yaml
//! tables:
//!   transactions:
//!     fields:
//!       - { name: id, type: BIGINT }
//!       - { name: vendor, type: VARCHAR, size: 64 }
//!       - { name: created, type: TIMESTAMP }
//!     rows:
//!       - [1, acme, "2024-01-01T00:00:00Z"]
//! ```
//!
//! Queries support projection, `WHERE` with bound parameters, `LIMIT` and
//! `OFFSET`. `WHERE` uses SQL's three-valued logic, so a row whose filter
//! evaluates to `NULL` is dropped as it would be upstream.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use sieve_lang::{evaluate_sql, Query, Variable};
use sieve_proto::{FieldInfo, FieldType, Record, Schema, Value};
use tracing::debug;

use super::{Source, SourceDescriptor, SourceFactory};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::stream::RecordSink;

pub const SOURCE_TYPE: &str = "memory";

/// One table: a schema and rows aligned with it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self> {
        self.push_row(row)?;
        Ok(self)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.schema.fields.len() {
            return Err(Error::InvalidQuery(format!(
                "row has {} values, {} has {} columns",
                row.len(),
                self.schema.target,
                self.schema.fields.len()
            )));
        }
        if let Some((info, value)) = self
            .schema
            .fields
            .iter()
            .zip(&row)
            .find(|(info, value)| !info.field.accepts(value))
        {
            return Err(Error::InvalidQuery(format!(
                "column {} is {} but the row holds {}",
                info.name,
                info.field,
                value.tag()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

/// A source serving [`MemoryTable`]s.
#[derive(Debug)]
pub struct MemorySource {
    label: String,
    tables: HashMap<String, MemoryTable>,
    closed: AtomicBool,
}

impl MemorySource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tables: HashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Add `table` under its schema target. The schema's data source is set
    /// to this source's label.
    pub fn with_table(mut self, mut table: MemoryTable) -> Self {
        table.schema.data_source = self.label.clone();
        self.tables.insert(table.schema.target.clone(), table);
        self
    }

    /// Parse a YAML dataset.
    pub fn from_yaml(label: impl Into<String>, yaml: &str) -> Result<Self> {
        let label = label.into();
        let dataset: DatasetFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Upstream(format!("dataset for {label} is malformed: {e}")))?;

        let mut source = Self::new(label);
        for (name, def) in dataset.tables {
            let schema = Schema::new(source.label.clone(), name.clone()).with_fields(
                def.fields
                    .iter()
                    .map(|c| FieldInfo::new(c.name.clone(), c.field_type).with_size(c.size)),
            );
            let mut table = MemoryTable::new(schema);
            for (n, row) in def.rows.into_iter().enumerate() {
                let values = decode_row(&table.schema, row)
                    .map_err(|e| Error::Upstream(format!("{name} row {}: {e}", n + 1)))?;
                table
                    .push_row(values)
                    .map_err(|e| Error::Upstream(format!("{name} row {}: {e}", n + 1)))?;
            }
            source = source.with_table(table);
        }
        Ok(source)
    }

    pub fn from_path(label: impl Into<String>, path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::Upstream(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(label, &yaml)
    }

    fn table(&self, query: &Query) -> Result<&MemoryTable> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed(format!("source {}", self.label)));
        }
        self.tables.get(query.entity()).ok_or_else(|| {
            Error::InvalidQuery(format!(
                "'{}' is not an entity of {}",
                query.entity(),
                self.label
            ))
        })
    }

    fn matches(&self, query: &Query, schema: &Schema, row: &[Value], params: &[Variable]) -> Result<bool> {
        let Some(selection) = query.selection() else {
            return Ok(true);
        };
        let env: HashMap<String, Variable> = schema
            .fields
            .iter()
            .zip(row)
            .map(|(info, value)| (info.name.clone(), Variable::from(value)))
            .collect();
        match evaluate_sql(selection, &env, params) {
            Ok(Variable::Bool(b)) => Ok(b),
            Ok(Variable::Null) => Ok(false),
            Ok(other) => Err(Error::InvalidQuery(format!(
                "WHERE clause must be boolean, got {}",
                other.type_name()
            ))),
            Err(e) => Err(Error::InvalidQuery(format!("cannot evaluate WHERE clause: {e}"))),
        }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn schema(&self, ctx: &RequestContext, query: &Query) -> Result<Schema> {
        ctx.check()?;
        Ok(self.table(query)?.schema.clone())
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        query: &Query,
        _schema: &Schema,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        let table = self.table(query)?;
        let columns: Vec<usize> = match query.fields() {
            None => (0..table.schema.fields.len()).collect(),
            Some(fields) => fields
                .iter()
                .map(|f| {
                    table.schema.field_index(f).ok_or_else(|| {
                        Error::InvalidQuery(format!("'{f}' is not a column of {}", query.entity()))
                    })
                })
                .collect::<Result<_>>()?,
        };
        let projected = Schema {
            fields: columns.iter().map(|&i| table.schema.fields[i].clone()).collect(),
            ..table.schema.clone()
        };
        let params: Vec<Variable> = query.params().iter().map(Variable::from).collect();

        ctx.check()?;
        sink.send(Record::schema_frame(projected)).await?;

        let offset = query.offset().unwrap_or(0) as usize;
        let limit = query.limit().map_or(usize::MAX, |l| l as usize);
        let mut skipped = 0;
        let mut sent = 0;
        for row in &table.rows {
            if sent >= limit {
                break;
            }
            ctx.check()?;
            if !self.matches(query, &table.schema, row, &params)? {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            let fields = columns.iter().map(|&i| row[i].clone()).collect();
            sink.send(Record::new(fields)).await?;
            sent += 1;
        }
        debug!(
            request_id = ctx.request_id(),
            data_source = %self.label,
            entity = query.entity(),
            records = sent,
            "memory query complete"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Opens memory sources from preloaded datasets, falling back to loading
/// the descriptor's endpoint as a dataset file.
#[derive(Debug, Default)]
pub struct MemoryFactory {
    datasets: HashMap<String, Vec<MemoryTable>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `tables` for the source labeled `label`.
    pub fn with_dataset(mut self, label: impl Into<String>, tables: Vec<MemoryTable>) -> Self {
        self.datasets.insert(label.into(), tables);
        self
    }
}

#[async_trait]
impl SourceFactory for MemoryFactory {
    async fn open(&self, descriptor: &SourceDescriptor) -> Result<Arc<dyn Source>> {
        if let Some(tables) = self.datasets.get(&descriptor.label) {
            let source = tables
                .iter()
                .cloned()
                .fold(MemorySource::new(&descriptor.label), MemorySource::with_table);
            return Ok(Arc::new(source));
        }
        if descriptor.endpoint.is_empty() {
            return Err(Error::Upstream(format!(
                "memory source {} has no dataset",
                descriptor.label
            )));
        }
        let source = MemorySource::from_path(&descriptor.label, Path::new(&descriptor.endpoint))?;
        Ok(Arc::new(source))
    }
}

#[derive(Deserialize)]
struct DatasetFile {
    #[serde(default)]
    tables: HashMap<String, TableDef>,
}

#[derive(Deserialize)]
struct TableDef {
    fields: Vec<ColumnDef>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct ColumnDef {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default = "default_size")]
    size: i64,
}

fn default_size() -> i64 {
    -1
}

fn decode_row(schema: &Schema, row: Vec<serde_json::Value>) -> std::result::Result<Vec<Value>, String> {
    if row.len() != schema.fields.len() {
        return Err(format!(
            "expected {} values, found {}",
            schema.fields.len(),
            row.len()
        ));
    }
    schema
        .fields
        .iter()
        .zip(row)
        .map(|(info, raw)| {
            decode_value(info.field, &raw)
                .ok_or_else(|| format!("column {} ({}) cannot hold {raw}", info.name, info.field))
        })
        .collect()
}

fn decode_value(field_type: FieldType, raw: &serde_json::Value) -> Option<Value> {
    use serde_json::Value as Json;

    if raw.is_null() {
        return Some(Value::Null);
    }
    Some(match field_type {
        FieldType::BigInt => Value::Int64(raw.as_i64()?),
        FieldType::Int => Value::Int32(i32::try_from(raw.as_i64()?).ok()?),
        FieldType::SmallInt => Value::Int32(i16::try_from(raw.as_i64()?).ok()? as i32),
        FieldType::Bool => Value::Bool(raw.as_bool()?),
        FieldType::Double => Value::Double(raw.as_f64()?),
        FieldType::Real => Value::Float(raw.as_f64()? as f32),
        FieldType::Char | FieldType::VarChar | FieldType::Text => {
            Value::String(raw.as_str()?.to_string())
        }
        FieldType::ByteA => match raw {
            Json::String(s) => Value::Bytes(s.as_bytes().to_vec()),
            Json::Array(items) => Value::Bytes(
                items
                    .iter()
                    .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<_>>()?,
            ),
            _ => return None,
        },
        FieldType::Timestamp => match raw {
            Json::String(s) => Value::Timestamp(DateTime::parse_from_rfc3339(s).ok()?.timestamp_micros()),
            Json::Number(n) => Value::Timestamp(n.as_i64()?),
            _ => return None,
        },
    })
}
