//! PostgreSQL sources.
//!
//! Enable with `--features postgres`. The descriptor's `credentials` hold
//! the connection URL; when absent, `endpoint` is used.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::TryStreamExt;
use sieve_lang::{Literal, Query};
use sieve_proto::{FieldInfo, FieldType, Record, Schema, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};

use super::{Source, SourceDescriptor, SourceFactory};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::stream::RecordSink;

pub const SOURCE_TYPE: &str = "postgres";

const DEFAULT_SCHEMA: &str = "public";
const MAX_CONNECTIONS: u32 = 10;

const COLUMNS_SQL: &str = "SELECT column_name::text, data_type::text, \
     character_maximum_length::int4 AS character_maximum_length \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// Map an `information_schema` data type to a wire field type.
pub fn field_type(data_type: &str) -> Option<FieldType> {
    Some(match data_type {
        "bigint" => FieldType::BigInt,
        "integer" => FieldType::Int,
        "smallint" => FieldType::SmallInt,
        "boolean" => FieldType::Bool,
        "bytea" => FieldType::ByteA,
        "character" => FieldType::Char,
        "character varying" => FieldType::VarChar,
        "text" => FieldType::Text,
        "double precision" => FieldType::Double,
        "real" => FieldType::Real,
        "timestamp without time zone" | "timestamp with time zone" => FieldType::Timestamp,
        _ => return None,
    })
}

pub struct PostgresSource {
    label: String,
    pool: PgPool,
}

impl PostgresSource {
    pub async fn connect(label: impl Into<String>, url: &str) -> Result<Self> {
        let label = label.into();
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(|e| Error::Upstream(format!("cannot connect to {label}: {e}")))?;
        Ok(Self { label, pool })
    }

    fn upstream(&self, e: sqlx::Error) -> Error {
        Error::Upstream(format!("{}: {e}", self.label))
    }
}

fn bind<'q>(query: SqlxQuery<'q, Postgres, PgArguments>, param: &Literal) -> SqlxQuery<'q, Postgres, PgArguments> {
    match param {
        Literal::Null => query.bind(None::<String>),
        Literal::Bool(b) => query.bind(*b),
        Literal::Int(i) => query.bind(*i),
        Literal::Float(f) => query.bind(*f),
        Literal::String(s) => query.bind(s.clone()),
    }
}

fn decode(row: &PgRow, index: usize, field_type: FieldType) -> std::result::Result<Value, sqlx::Error> {
    let value = match field_type {
        FieldType::BigInt => row.try_get::<Option<i64>, _>(index)?.map(Value::Int64),
        FieldType::Int => row.try_get::<Option<i32>, _>(index)?.map(Value::Int32),
        FieldType::SmallInt => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::Int32(v as i32)),
        FieldType::Bool => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        FieldType::ByteA => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes),
        FieldType::Char | FieldType::VarChar | FieldType::Text => {
            row.try_get::<Option<String>, _>(index)?.map(Value::String)
        }
        FieldType::Double => row.try_get::<Option<f64>, _>(index)?.map(Value::Double),
        FieldType::Real => row.try_get::<Option<f32>, _>(index)?.map(Value::Float),
        FieldType::Timestamp => match row.try_get::<Option<DateTime<Utc>>, _>(index) {
            Ok(ts) => ts.map(|t| Value::Timestamp(t.timestamp_micros())),
            Err(_) => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|t| Value::Timestamp(t.and_utc().timestamp_micros())),
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

#[async_trait]
impl Source for PostgresSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn schema(&self, ctx: &RequestContext, query: &Query) -> Result<Schema> {
        let table_schema = query.collection().unwrap_or(DEFAULT_SCHEMA);
        let rows = ctx
            .run(async {
                sqlx::query(COLUMNS_SQL)
                    .bind(table_schema)
                    .bind(query.entity())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| self.upstream(e))
            })
            .await?;
        if rows.is_empty() {
            return Err(Error::InvalidQuery(format!(
                "'{}' is not an entity of {}",
                query.entity(),
                self.label
            )));
        }

        let mut schema = Schema::new(&self.label, query.entity());
        for row in rows {
            let name: String = row.try_get("column_name").map_err(|e| self.upstream(e))?;
            let data_type: String = row.try_get("data_type").map_err(|e| self.upstream(e))?;
            let size: Option<i32> = row
                .try_get("character_maximum_length")
                .map_err(|e| self.upstream(e))?;
            match field_type(&data_type) {
                Some(t) => {
                    schema.fields.push(FieldInfo::new(name, t).with_size(size.map_or(-1, i64::from)))
                }
                None => debug!(data_source = %self.label, column = %name, %data_type, "skipping column of unsupported type"),
            }
        }
        Ok(schema)
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        query: &Query,
        schema: &Schema,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        let projected = match query.fields() {
            Some(fields) => schema.project(fields),
            None => schema.clone(),
        };
        let (sql, params) = query.raw();
        debug!(request_id = ctx.request_id(), data_source = %self.label, %sql, "executing upstream query");

        let statement = params.iter().fold(sqlx::query(&sql), bind);
        let mut rows = statement.fetch(&self.pool);

        sink.send(Record::schema_frame(projected.clone())).await?;
        loop {
            let next = ctx
                .run(async { rows.try_next().await.map_err(|e| self.upstream(e)) })
                .await?;
            let Some(row) = next else {
                break;
            };
            let fields = projected
                .fields
                .iter()
                .enumerate()
                .map(|(i, info)| decode(&row, i, info.field))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| self.upstream(e))?;
            sink.send(Record::new(fields)).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PostgresFactory;

#[async_trait]
impl SourceFactory for PostgresFactory {
    async fn open(&self, descriptor: &SourceDescriptor) -> Result<Arc<dyn Source>> {
        let url = descriptor
            .credentials
            .as_deref()
            .unwrap_or(descriptor.endpoint.as_str());
        let source = PostgresSource::connect(&descriptor.label, url).await?;
        info!(data_source = %descriptor.label, "connected to postgres");
        Ok(Arc::new(source))
    }
}
