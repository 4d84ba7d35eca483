//! PostgreSQL connection backed by an sqlx pool.

use super::Connection;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::value::{Row, Value};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, Transaction, TypeInfo, ValueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A pooled PostgreSQL connection with at most one reserved transaction.
///
/// Outside a transaction, statements check out any pooled connection.
pub struct PgConnection {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
    in_tx: AtomicBool,
}

impl PgConnection {
    /// Connect using the URL and pool settings from `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(Error::ConnectionNotSet)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;

        tracing::info!(max_connections = config.max_connections, "connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
            in_tx: AtomicBool::new(false),
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("pool_size", &self.pool.size())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(sql, params = params.len(), "fetch");
        let query = bind_params(sqlx::query(sql), params);

        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.as_mut() {
            let rows = query.fetch_all(&mut **tx).await?;
            return rows.iter().map(decode_row).collect();
        }
        drop(guard);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::debug!(sql, params = params.len(), "execute");
        let query = bind_params(sqlx::query(sql), params);

        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.as_mut() {
            return Ok(query.execute(&mut **tx).await?.rows_affected());
        }
        drop(guard);

        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn begin(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(Error::AlreadyInTransaction);
        }
        *guard = Some(self.pool.begin().await?);
        self.in_tx.store(true, Ordering::SeqCst);
        tracing::debug!("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(Error::NoActiveTransaction)?;
        self.in_tx.store(false, Ordering::SeqCst);
        tx.commit().await?;
        tracing::debug!("COMMIT");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(Error::NoActiveTransaction)?;
        self.in_tx.store(false, Ordering::SeqCst);
        tx.rollback().await?;
        tracing::debug!("ROLLBACK");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Uuid(u) => query.bind(*u),
            Value::Timestamp(t) => query.bind(*t),
            Value::Json(j) => query.bind(sqlx::types::Json(j.clone())),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name())
            .map_err(|e| Error::Decode(format!("column {}: {}", column.name(), e)))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get(idx)?),
        "INT2" => Value::Int(row.try_get::<i16, _>(idx)? as i64),
        "INT4" => Value::Int(row.try_get::<i32, _>(idx)? as i64),
        "INT8" => Value::Int(row.try_get(idx)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(idx)? as f64),
        "FLOAT8" => Value::Float(row.try_get(idx)?),
        "NUMERIC" => decimal_value(row.try_get::<Decimal, _>(idx)?),
        "UUID" => Value::Uuid(row.try_get::<Uuid, _>(idx)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?.and_utc()),
        "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(idx)?),
        "JSON" | "JSONB" => Value::Json(row.try_get::<serde_json::Value, _>(idx)?),
        _ => Value::Text(row.try_get::<String, _>(idx)?),
    };
    Ok(value)
}

/// Integral numerics decode as `Int`, everything else as `Float`.
fn decimal_value(d: Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return Value::Int(i);
        }
    }
    match d.to_f64() {
        Some(f) => Value::Float(f),
        None => Value::Text(d.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_value() {
        assert_eq!(decimal_value(Decimal::new(15, 0)), Value::Int(15));
        assert_eq!(decimal_value(Decimal::new(1500, 2)), Value::Int(15));
        let f = decimal_value(Decimal::new(12345, 2)).as_f64().unwrap();
        assert!((f - 123.45).abs() < 1e-9);
    }
}
