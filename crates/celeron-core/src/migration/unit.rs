//! Executable migration units.

use crate::connection::Connection;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a unit creates a model table or a many-to-many join table.
///
/// Primary units always run before join units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    Primary,
    Join,
}

impl std::fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationKind::Primary => f.write_str("primary"),
            MigrationKind::Join => f.write_str("join"),
        }
    }
}

/// A reversible schema change.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    /// Unique name recorded in the ledger.
    fn name(&self) -> &str;

    fn kind(&self) -> MigrationKind;

    /// Apply the change.
    async fn up(&self, conn: &dyn Connection) -> Result<()>;

    /// Revert the change.
    async fn down(&self, conn: &dyn Connection) -> Result<()>;
}

/// Resolves ledger names back to executable units, for rollback.
pub trait MigrationSource: Send + Sync {
    /// The unit recorded under `name`, if this source knows it.
    fn resolve(&self, name: &str) -> Result<Option<Arc<dyn MigrationUnit>>>;
}

/// Erase a list of SQL migrations into executable units.
pub fn into_units(migrations: Vec<SqlMigration>) -> Vec<Arc<dyn MigrationUnit>> {
    migrations
        .into_iter()
        .map(|m| Arc::new(m) as Arc<dyn MigrationUnit>)
        .collect()
}

/// A migration described by literal SQL statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlMigration {
    pub name: String,
    pub kind: MigrationKind,
    /// Table created by `up`.
    pub table: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>, kind: MigrationKind, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            table: table.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn with_up(mut self, sql: impl Into<String>) -> Self {
        self.up.push(sql.into());
        self
    }

    pub fn with_down(mut self, sql: impl Into<String>) -> Self {
        self.down.push(sql.into());
        self
    }

    /// Name without the trailing `_<millis>` generation stamp.
    pub fn stem(&self) -> &str {
        name_stem(&self.name)
    }

    /// Every statement, `up` then `down`, separated for display.
    pub fn to_sql(&self) -> String {
        let mut out = format!("-- {} ({})\n-- up\n", self.name, self.kind);
        for sql in &self.up {
            out.push_str(sql);
            out.push_str(";\n");
        }
        out.push_str("-- down\n");
        for sql in &self.down {
            out.push_str(sql);
            out.push_str(";\n");
        }
        out
    }
}

/// Strip a trailing `_<digits>` suffix from a migration name.
pub fn name_stem(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((stem, stamp)) if !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit()) => {
            stem
        }
        _ => name,
    }
}

async fn run_all(conn: &dyn Connection, statements: &[String]) -> Result<()> {
    for sql in statements {
        conn.execute(sql, &[]).await?;
    }
    Ok(())
}

#[async_trait]
impl MigrationUnit for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MigrationKind {
        self.kind
    }

    async fn up(&self, conn: &dyn Connection) -> Result<()> {
        run_all(conn, &self.up).await
    }

    async fn down(&self, conn: &dyn Connection) -> Result<()> {
        run_all(conn, &self.down).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RecordingConnection;

    #[test]
    fn test_name_stem() {
        assert_eq!(name_stem("CreateusersTable_1700000000000"), "CreateusersTable");
        assert_eq!(
            name_stem("CreateJoinTable_users_roles_1700000000000"),
            "CreateJoinTable_users_roles"
        );
        assert_eq!(name_stem("CreateJoinTable_users_roles"), "CreateJoinTable_users_roles");
        assert_eq!(name_stem("plain"), "plain");
    }

    #[tokio::test]
    async fn test_sql_migration_runs_statements_in_order() {
        let conn = RecordingConnection::new();
        let unit = SqlMigration::new("CreatepostsTable_1", MigrationKind::Primary, "posts")
            .with_up("CREATE TABLE posts ()")
            .with_up("CREATE TRIGGER t")
            .with_down("DROP TABLE posts");

        unit.up(&conn).await.unwrap();
        unit.down(&conn).await.unwrap();

        assert_eq!(
            conn.sql_log(),
            vec!["CREATE TABLE posts ()", "CREATE TRIGGER t", "DROP TABLE posts"]
        );
    }

    #[test]
    fn test_serde_shape() {
        let unit = SqlMigration::new("CreateJoinTable_a_b_1", MigrationKind::Join, "a_b");
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["kind"], "join");
        let back: SqlMigration = serde_json::from_value(json).unwrap();
        assert_eq!(back, unit);
    }
}
