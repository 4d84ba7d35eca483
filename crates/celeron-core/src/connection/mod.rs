//! Database connection capability.
//!
//! The core only consumes this trait: parameterized statements plus a single,
//! non-reentrant transaction per connection.

mod postgres;
mod recording;

pub use postgres::PgConnection;
pub use recording::{RecordingConnection, Responder};

use crate::error::Result;
use crate::value::{Row, Value};
use async_trait::async_trait;
use std::future::Future;

/// Executes parameterized SQL and manages one transaction at a time.
///
/// While a transaction is open, every statement issued through the connection
/// runs inside it, in submission order.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement and return its rows.
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Open a transaction. Fails with `AlreadyInTransaction` if one is open.
    async fn begin(&self) -> Result<()>;

    /// Commit the open transaction. Fails with `NoActiveTransaction` if none.
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction. Fails with `NoActiveTransaction` if none.
    async fn rollback(&self) -> Result<()>;

    /// Check if a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Run a statement and return its first row, if any.
    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }
}

/// Run `work` inside a transaction on `conn`.
///
/// Commits when `work` succeeds. On failure the transaction is rolled back and
/// the original error returned; a failing rollback is logged.
pub async fn transaction<T, F>(conn: &dyn Connection, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    conn.begin().await?;
    match work.await {
        Ok(value) => {
            conn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::warn!(error = %err, "rolling back transaction");
            if let Err(rollback_err) = conn.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Read an integer `count` column from the first row, 0 when absent.
pub(crate) fn count_from(rows: &[Row]) -> u64 {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(|v| v.as_i64())
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_transaction_commits_on_success() {
        let conn = RecordingConnection::new();
        let value = transaction(&conn, async {
            conn.execute("INSERT INTO t (a) VALUES ($1)", &[Value::Int(1)])
                .await?;
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(
            conn.sql_log(),
            vec!["BEGIN", "INSERT INTO t (a) VALUES ($1)", "COMMIT"]
        );
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let conn = RecordingConnection::new();
        let result: Result<()> = transaction(&conn, async {
            Err(Error::InvalidState("boom".into()))
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(conn.sql_log(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let conn = RecordingConnection::new();
        conn.begin().await.unwrap();
        assert!(matches!(conn.begin().await, Err(Error::AlreadyInTransaction)));
        conn.commit().await.unwrap();
        assert!(matches!(conn.commit().await, Err(Error::NoActiveTransaction)));
        assert!(matches!(conn.rollback().await, Err(Error::NoActiveTransaction)));
    }

    #[test]
    fn test_count_from() {
        let rows = vec![Row::new().with("count", 15i64)];
        assert_eq!(count_from(&rows), 15);
        assert_eq!(count_from(&[]), 0);
        let text = vec![Row::new().with("count", "3")];
        assert_eq!(count_from(&text), 3);
    }
}
