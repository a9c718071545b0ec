use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

use crate::connection::{ConnectionDescriptor, Engine};

/// Executes SQL against the database a descriptor points at.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run(&self, connection: &ConnectionDescriptor, sql: &str) -> Result<Vec<Value>>;

    async fn ping(&self, connection: &ConnectionDescriptor) -> Result<()> {
        self.run(connection, "SELECT 1").await.map(|_| ())
    }
}

/// Opens a short-lived pool per call, MySQL or PostgreSQL by engine type.
#[derive(Debug, Default, Clone)]
pub struct SqlxRunner;

#[async_trait]
impl QueryRunner for SqlxRunner {
    async fn run(&self, connection: &ConnectionDescriptor, sql: &str) -> Result<Vec<Value>> {
        let port = connection.port_number()?;
        tracing::debug!("Running query on {:?}", connection);

        match connection.engine_type {
            Engine::MySql => {
                let options = MySqlConnectOptions::new()
                    .host(&connection.host)
                    .port(port)
                    .username(&connection.username)
                    .password(&connection.password)
                    .database(&connection.database);
                let pool = MySqlPoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await
                    .context("Failed to connect to MySQL")?;
                let rows = sqlx::query(sql).fetch_all(&pool).await;
                pool.close().await;
                Ok(rows?.iter().map(mysql_row_to_json).collect())
            }
            Engine::PostgreSql => {
                let options = PgConnectOptions::new()
                    .host(&connection.host)
                    .port(port)
                    .username(&connection.username)
                    .password(&connection.password)
                    .database(&connection.database);
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                let rows = sqlx::query(sql).fetch_all(&pool).await;
                pool.close().await;
                Ok(rows?.iter().map(pg_row_to_json).collect())
            }
        }
    }
}

/// How a result column is turned into JSON, chosen from the driver's type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int16,
    Int32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Decimal,
    Uuid,
    Json,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Bytes,
    TextArray,
    Int32Array,
    Int64Array,
    Text,
}

fn pg_column_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "BOOL" => ColumnKind::Bool,
        "INT2" => ColumnKind::Int16,
        "INT4" => ColumnKind::Int32,
        "INT8" => ColumnKind::Int64,
        "FLOAT4" => ColumnKind::Float32,
        "FLOAT8" => ColumnKind::Float64,
        "NUMERIC" => ColumnKind::Decimal,
        "UUID" => ColumnKind::Uuid,
        "JSON" | "JSONB" => ColumnKind::Json,
        "TIMESTAMPTZ" => ColumnKind::TimestampTz,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "BYTEA" => ColumnKind::Bytes,
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => ColumnKind::TextArray,
        "INT4[]" => ColumnKind::Int32Array,
        "INT8[]" => ColumnKind::Int64Array,
        _ => ColumnKind::Text,
    }
}

fn mysql_column_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "BOOLEAN" => ColumnKind::Bool,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => ColumnKind::Int64,
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" | "BIT" => ColumnKind::UInt64,
        "FLOAT" => ColumnKind::Float32,
        "DOUBLE" => ColumnKind::Float64,
        "DECIMAL" => ColumnKind::Decimal,
        "JSON" => ColumnKind::Json,
        "TIMESTAMP" => ColumnKind::TimestampTz,
        "DATETIME" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        // Includes VARCHAR/CHAR columns with a binary collation.
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => ColumnKind::Bytes,
        _ => ColumnKind::Text,
    }
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Binary columns become text when they hold UTF-8, base64 otherwise.
fn bytes_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => Value::String(BASE64_STANDARD.encode(e.into_bytes())),
    }
}

/// Decodes column `index` as `T`. A value the typed decode rejects goes
/// through [`fallback_value`] instead of turning into `null`.
fn typed_value<'r, R, T>(row: &'r R, index: usize, to_json: impl FnOnce(T) -> Value) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(value)) => to_json(value),
        Ok(None) => Value::Null,
        Err(_) => fallback_value(row, index),
    }
}

/// Text first, then the raw bytes. `null` only for SQL NULL or a value
/// nothing can read, and the latter is logged.
fn fallback_value<'r, R>(row: &'r R, index: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    let type_name = row.columns()[index].type_info().name().to_string();
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Column {} ({}) could not be read: {}", index, type_name, e);
            return Value::Null;
        }
    }

    if let Ok(text) = row.try_get::<String, _>(index) {
        return Value::String(text);
    }
    match row.try_get_unchecked::<Vec<u8>, _>(index) {
        Ok(bytes) => bytes_value(bytes),
        Err(e) => {
            tracing::warn!("Unsupported column type {} at {}: {}", type_name, index, e);
            Value::Null
        }
    }
}

fn pg_value(row: &PgRow, i: usize, kind: ColumnKind) -> Value {
    match kind {
        ColumnKind::Bool => typed_value(row, i, Value::Bool),
        ColumnKind::Int16 => typed_value(row, i, |v: i16| Value::from(v)),
        ColumnKind::Int32 => typed_value(row, i, |v: i32| Value::from(v)),
        ColumnKind::Int64 => typed_value(row, i, |v: i64| Value::from(v)),
        ColumnKind::UInt64 => typed_value(row, i, |v: i64| Value::from(v)),
        ColumnKind::Float32 => typed_value(row, i, |v: f32| float_value(v as f64)),
        ColumnKind::Float64 => typed_value(row, i, float_value),
        ColumnKind::Decimal => typed_value(row, i, |v: Decimal| Value::String(v.to_string())),
        ColumnKind::Uuid => typed_value(row, i, |v: uuid::Uuid| Value::String(v.to_string())),
        ColumnKind::Json => typed_value(row, i, |v: Value| v),
        ColumnKind::TimestampTz => {
            typed_value(row, i, |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()))
        }
        ColumnKind::Timestamp => typed_value(row, i, |v: chrono::NaiveDateTime| Value::String(v.to_string())),
        ColumnKind::Date => typed_value(row, i, |v: chrono::NaiveDate| Value::String(v.to_string())),
        ColumnKind::Time => typed_value(row, i, |v: chrono::NaiveTime| Value::String(v.to_string())),
        ColumnKind::Bytes => typed_value(row, i, bytes_value),
        ColumnKind::TextArray => typed_value(row, i, |v: Vec<String>| Value::from(v)),
        ColumnKind::Int32Array => typed_value(row, i, |v: Vec<i32>| Value::from(v)),
        ColumnKind::Int64Array => typed_value(row, i, |v: Vec<i64>| Value::from(v)),
        ColumnKind::Text => fallback_value(row, i),
    }
}

fn mysql_value(row: &MySqlRow, i: usize, kind: ColumnKind) -> Value {
    match kind {
        ColumnKind::Bool => typed_value(row, i, Value::Bool),
        ColumnKind::Int16 | ColumnKind::Int32 | ColumnKind::Int64 => {
            typed_value(row, i, |v: i64| Value::from(v))
        }
        ColumnKind::UInt64 => typed_value(row, i, |v: u64| Value::from(v)),
        ColumnKind::Float32 => typed_value(row, i, |v: f32| float_value(v as f64)),
        ColumnKind::Float64 => typed_value(row, i, float_value),
        ColumnKind::Decimal => typed_value(row, i, |v: Decimal| Value::String(v.to_string())),
        ColumnKind::Uuid => typed_value(row, i, |v: uuid::Uuid| Value::String(v.to_string())),
        ColumnKind::Json => typed_value(row, i, |v: Value| v),
        ColumnKind::TimestampTz => {
            typed_value(row, i, |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()))
        }
        ColumnKind::Timestamp => typed_value(row, i, |v: chrono::NaiveDateTime| Value::String(v.to_string())),
        ColumnKind::Date => typed_value(row, i, |v: chrono::NaiveDate| Value::String(v.to_string())),
        ColumnKind::Time => typed_value(row, i, |v: chrono::NaiveTime| Value::String(v.to_string())),
        ColumnKind::Bytes => typed_value(row, i, bytes_value),
        ColumnKind::TextArray | ColumnKind::Int32Array | ColumnKind::Int64Array | ColumnKind::Text => {
            fallback_value(row, i)
        }
    }
}

fn pg_row_to_json(row: &PgRow) -> Value {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let kind = pg_column_kind(column.type_info().name());
        object.insert(column.name().to_string(), pg_value(row, i, kind));
    }
    Value::Object(object)
}

fn mysql_row_to_json(row: &MySqlRow) -> Value {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let kind = mysql_column_kind(column.type_info().name());
        object.insert(column.name().to_string(), mysql_value(row, i, kind));
    }
    Value::Object(object)
}
