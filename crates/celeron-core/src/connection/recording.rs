//! In-memory connection that records statements instead of executing them.

use super::Connection;
use crate::error::{Error, Result};
use crate::query::Statement;
use crate::value::{Row, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Computes the rows answered for a statement.
pub type Responder = Box<dyn Fn(&Statement) -> Result<Vec<Row>> + Send + Sync>;

/// A connection that logs every statement, including `BEGIN`, `COMMIT` and
/// `ROLLBACK`, and answers from a responder.
///
/// `execute` reports the number of rows the responder returns as the affected
/// row count. Without a responder every statement returns no rows.
pub struct RecordingConnection {
    log: Mutex<Vec<Statement>>,
    responder: Option<Responder>,
    in_tx: AtomicBool,
}

impl RecordingConnection {
    /// Create a connection answering every statement with no rows.
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            responder: None,
            in_tx: AtomicBool::new(false),
        }
    }

    /// Create a connection answering through `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Statement) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Create a connection whose statements fail when their SQL contains
    /// `fragment`. Transaction control statements never fail.
    pub fn failing_on(fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        Self::with_responder(move |stmt| {
            if stmt.sql.contains(&fragment) {
                Err(Error::Connection(format!("injected failure: {}", stmt.sql)))
            } else {
                Ok(Vec::new())
            }
        })
    }

    /// Every statement recorded so far.
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().clone()
    }

    /// SQL text of every statement recorded so far.
    pub fn sql_log(&self) -> Vec<String> {
        self.log.lock().iter().map(|s| s.sql.clone()).collect()
    }

    /// Forget recorded statements.
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let statement = Statement::new(sql, params.to_vec());
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "recorded statement");
        let answer = match &self.responder {
            Some(responder) => responder(&statement),
            None => Ok(Vec::new()),
        };
        self.log.lock().push(statement);
        answer
    }

    fn control(&self, sql: &str) {
        self.log.lock().push(Statement::raw(sql));
    }
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingConnection")
            .field("statements", &self.log.lock().len())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.record(sql, params)?.len() as u64)
    }

    async fn begin(&self) -> Result<()> {
        if self.in_tx.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInTransaction);
        }
        self.control("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        if !self.in_tx.swap(false, Ordering::SeqCst) {
            return Err(Error::NoActiveTransaction);
        }
        self.control("COMMIT");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.in_tx.swap(false, Ordering::SeqCst) {
            return Err(Error::NoActiveTransaction);
        }
        self.control("ROLLBACK");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_params() {
        let conn = RecordingConnection::new();
        conn.fetch_all("SELECT * FROM users WHERE id = $1", &[Value::Int(1)])
            .await
            .unwrap();

        let statements = conn.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].params, vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_responder_answers() {
        let conn = RecordingConnection::with_responder(|stmt| {
            if stmt.sql.starts_with("SELECT COUNT") {
                Ok(vec![Row::new().with("count", 3i64)])
            } else {
                Ok(vec![Row::new(), Row::new()])
            }
        });

        let rows = conn.fetch_all("SELECT COUNT(*) AS count FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get("count"), Some(&Value::Int(3)));
        assert_eq!(conn.execute("DELETE FROM t", &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let conn = RecordingConnection::failing_on("CREATE TABLE");
        assert!(conn.execute("CREATE TABLE t ()", &[]).await.is_err());
        assert!(conn.execute("DROP TABLE t", &[]).await.is_ok());
        assert_eq!(conn.sql_log().len(), 2);
    }
}
