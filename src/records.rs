//! Read access to the business ledger database.
//!
//! The ledger is owned and mutated elsewhere; this process only reads it.
//! Rows come back as ordered column→value pairs so downstream fact
//! serialization sees a stable field order.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};

use crate::errors::CoreError;

/// One record from one named table. `fields` preserves the order the store
/// returned columns in; serialization depends on that order being stable.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub table: String,
    pub id: String,
    pub fields: Vec<(String, Value)>,
}

impl SourceRow {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

#[async_trait]
pub trait RecordReader: Send + Sync {
    /// All rows of one table, in store-returned order.
    async fn fetch_all(&self, table: &str) -> Result<Vec<SourceRow>, CoreError>;

    /// Dereference a single foreign key: the named column of the row with
    /// the given id. `None` when the row does not exist or the column is
    /// NULL.
    async fn lookup_field(
        &self,
        table: &str,
        id: &str,
        column: &str,
    ) -> Result<Option<String>, CoreError>;
}

pub struct SqliteRecords {
    pool: SqlitePool,
}

impl SqliteRecords {
    pub async fn open(db_path: PathBuf) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|err| CoreError::upstream("record store", err))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_writable(db_path: PathBuf) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|err| CoreError::upstream("record store", err))?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordReader for SqliteRecords {
    async fn fetch_all(&self, table: &str) -> Result<Vec<SourceRow>, CoreError> {
        ensure_ident(table)?;

        // rowid order makes "store-returned order" reproducible across runs.
        let sql = format!("SELECT * FROM \"{table}\" ORDER BY rowid");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| CoreError::upstream("record store", err))?;

        rows.iter().map(|row| row_to_source(table, row)).collect()
    }

    async fn lookup_field(
        &self,
        table: &str,
        id: &str,
        column: &str,
    ) -> Result<Option<String>, CoreError> {
        ensure_ident(table)?;
        ensure_ident(column)?;

        let sql = format!("SELECT \"{column}\" FROM \"{table}\" WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| CoreError::upstream("record store", err))?;

        let Some(row) = row else {
            return Ok(None);
        };

        match decode_column(&row, 0)? {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text)),
            other => Ok(Some(other.to_string())),
        }
    }
}

fn ensure_ident(name: &str) -> Result<(), CoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "invalid identifier: {name:?}"
        )))
    }
}

fn row_to_source(table: &str, row: &SqliteRow) -> Result<SourceRow, CoreError> {
    let mut fields = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        fields.push((column.name().to_string(), decode_column(row, idx)?));
    }

    let id = fields
        .iter()
        .find(|(name, _)| name == "id")
        .map(|(_, value)| value_to_key(value))
        .ok_or_else(|| {
            CoreError::Persistence(format!("table {table} has no id column"))
        })?;

    Ok(SourceRow {
        table: table.to_string(),
        id,
        fields,
    })
}

fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Decode one column into a JSON value based on SQLite's declared storage
/// class. BLOBs are not meaningful as fact material and decode to NULL.
fn decode_column(row: &SqliteRow, idx: usize) -> Result<Value, CoreError> {
    let raw = row
        .try_get_raw(idx)
        .map_err(|err| CoreError::upstream("record store", err))?;

    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "INTEGER" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .map_err(|err| CoreError::upstream("record store", err))?,
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .map_err(|err| CoreError::upstream("record store", err))?,
        "BLOB" => Value::Null,
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .map_err(|err| CoreError::upstream("record store", err))?,
    };

    Ok(value)
}
