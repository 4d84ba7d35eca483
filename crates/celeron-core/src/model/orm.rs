//! The data mapper context and class-level model operations.

use super::hooks::{HookPoint, HookRegistry};
use super::record::Record;
use super::validation::{Rule, Validators};
use crate::catalog::{ColumnType, ModelDef, Registry};
use crate::connection::{self, count_from, Connection};
use crate::error::{Error, Result};
use crate::query::{builder, Conditions, QueryOptions};
use crate::value::{Row, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Shared data mapper state: registry, connection, hooks and validation rules.
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

struct OrmInner {
    registry: Arc<Registry>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    hooks: HookRegistry,
    validators: Validators,
}

impl Orm {
    /// Create a mapper over `registry` with no connection yet.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(OrmInner {
                registry,
                connection: RwLock::new(None),
                hooks: HookRegistry::new(),
                validators: Validators::new(),
            }),
        }
    }

    /// Create a mapper with a connection already set.
    pub fn with_connection(registry: Arc<Registry>, connection: Arc<dyn Connection>) -> Self {
        let orm = Self::new(registry);
        orm.set_connection(connection);
        orm
    }

    /// Set or replace the connection used by every model.
    pub fn set_connection(&self, connection: Arc<dyn Connection>) {
        *self.inner.connection.write() = Some(connection);
    }

    /// Get the connection, failing with `ConnectionNotSet` when absent.
    pub fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.inner
            .connection
            .read()
            .clone()
            .ok_or(Error::ConnectionNotSet)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn validators(&self) -> &Validators {
        &self.inner.validators
    }

    /// Get a handle on a registered model.
    pub fn model(&self, name: &str) -> Result<Model> {
        let def = self.inner.registry.get_model_definition(name)?;
        Ok(Model {
            orm: self.clone(),
            def: Arc::new(def),
        })
    }

    /// Run `work` inside one transaction on the current connection.
    ///
    /// Transactions do not nest: fails with `AlreadyInTransaction` when one is
    /// already open.
    pub async fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let conn = self.connection()?;
        connection::transaction(conn.as_ref(), work).await
    }
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("models", &self.inner.registry.model_names())
            .field("connected", &self.inner.connection.read().is_some())
            .finish()
    }
}

const SAVEPOINT: &str = "celeron_atomic";

/// Run `work` all-or-nothing.
///
/// Opens a transaction, or a savepoint when one is already open on `conn`; on
/// failure only the savepoint is rolled back and the outer transaction stays
/// usable.
pub(crate) async fn atomically<T, F>(conn: &dyn Connection, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if !conn.in_transaction() {
        return connection::transaction(conn, work).await;
    }

    conn.execute(&format!("SAVEPOINT {}", SAVEPOINT), &[]).await?;
    match work.await {
        Ok(value) => {
            conn.execute(&format!("RELEASE SAVEPOINT {}", SAVEPOINT), &[])
                .await?;
            Ok(value)
        }
        Err(err) => {
            tracing::warn!(error = %err, "rolling back to savepoint");
            if let Err(rollback_err) = conn
                .execute(&format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT), &[])
                .await
            {
                tracing::warn!(error = %rollback_err, "savepoint rollback failed");
            }
            Err(err)
        }
    }
}

/// A page of records with the total number of matches ignoring paging.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<Record>,
    pub total: u64,
}

/// Handle on one registered model: class-level queries and bulk writes.
#[derive(Clone)]
pub struct Model {
    pub(crate) orm: Orm,
    pub(crate) def: Arc<ModelDef>,
}

impl Model {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn table_name(&self) -> &str {
        &self.def.table_name
    }

    pub fn definition(&self) -> &ModelDef {
        &self.def
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    /// Register a lifecycle hook for this model.
    pub fn add_hook<F>(&self, point: HookPoint, hook: F)
    where
        F: for<'a> Fn(&'a mut Record) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.orm.hooks().register(self.name(), point, hook);
    }

    /// Register validation rules for one field.
    pub fn add_rules(&self, field: &str, rules: impl IntoIterator<Item = Rule>) {
        self.orm.validators().add(self.name(), field, rules);
    }

    /// Build an unsaved record. Unknown keys are ignored.
    pub fn build(&self, data: Row) -> Record {
        let mut record = Record::empty(self.clone());
        record.fill(data);
        record
    }

    /// Build and insert a record.
    pub async fn create(&self, data: Row) -> Result<Record> {
        let mut record = self.build(data);
        record.save().await?;
        Ok(record)
    }

    /// Insert every row inside one transaction; any failure aborts them all.
    pub async fn create_many(&self, rows: Vec<Row>) -> Result<Vec<Record>> {
        let conn = self.orm.connection()?;
        atomically(conn.as_ref(), async {
            let mut created = Vec::with_capacity(rows.len());
            for row in rows {
                created.push(self.create(row).await?);
            }
            Ok(created)
        })
        .await
    }

    /// Find a record by id.
    pub async fn find_by_id(
        &self,
        id: impl Into<Value>,
        options: &QueryOptions,
    ) -> Result<Option<Record>> {
        let conditions = Conditions::new().with("id", id);
        self.find_one(&conditions, options).await
    }

    /// Find the first matching record.
    pub async fn find_one(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> Result<Option<Record>> {
        let options = options.clone().limit(1);
        Ok(self.find_all(conditions, &options).await?.into_iter().next())
    }

    /// Find every matching record, loading `options.include` relations.
    pub async fn find_all(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let mut records = self.fetch_records(conditions, options).await?;
        if !options.include.is_empty() {
            let nested = QueryOptions::default();
            for record in &mut records {
                for relation in &options.include {
                    record.load(relation, &nested).await?;
                }
            }
        }
        Ok(records)
    }

    /// Alias of [`Model::find_all`].
    pub async fn find_where(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.find_all(conditions, options).await
    }

    /// Count matching rows. Paging and ordering are ignored.
    pub async fn count(&self, conditions: &Conditions, options: &QueryOptions) -> Result<u64> {
        let (conditions, options) = self.prepare(conditions, options)?;
        let stmt = builder::count(self.table_name(), &conditions, &options.for_count());
        let rows = self.orm.connection()?.fetch_all(&stmt.sql, &stmt.params).await?;
        Ok(count_from(&rows))
    }

    /// Check if any row matches.
    pub async fn exists(&self, conditions: &Conditions) -> Result<bool> {
        Ok(self.count(conditions, &QueryOptions::default()).await? > 0)
    }

    /// Fetch one page and the unpaged total concurrently.
    pub async fn find_and_count(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> Result<Page> {
        let (total, rows) = tokio::try_join!(
            self.count(conditions, options),
            self.find_all(conditions, options)
        )?;
        Ok(Page { rows, total })
    }

    /// Apply `patch` to every matching row; returns the affected row count.
    pub async fn update_many(&self, conditions: &Conditions, patch: Row) -> Result<u64> {
        let (conditions, _) = self.prepare(conditions, &QueryOptions::default())?;
        let mut values = Vec::with_capacity(patch.len());
        for (column, value) in patch.iter() {
            self.check_column(column)?;
            values.push((column.to_string(), self.coerce(column, value.clone())));
        }
        if values.is_empty() {
            return Ok(0);
        }
        let stmt = builder::update_many(self.table_name(), &conditions, &values);
        self.orm.connection()?.execute(&stmt.sql, &stmt.params).await
    }

    /// Delete every matching row; returns the affected row count.
    pub async fn delete_many(&self, conditions: &Conditions) -> Result<u64> {
        let (conditions, _) = self.prepare(conditions, &QueryOptions::default())?;
        let stmt = builder::delete_many(self.table_name(), &conditions);
        self.orm.connection()?.execute(&stmt.sql, &stmt.params).await
    }

    /// Select and hydrate without loading relations.
    pub(crate) async fn fetch_records(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let (conditions, options) = self.prepare(conditions, options)?;
        let stmt = builder::select(self.table_name(), &conditions, &options);
        let rows = self.orm.connection()?.fetch_all(&stmt.sql, &stmt.params).await?;
        Ok(rows.into_iter().map(|row| self.hydrate(row)).collect())
    }

    pub(crate) fn hydrate(&self, row: Row) -> Record {
        Record::hydrated(self.clone(), row)
    }

    pub(crate) fn check_column(&self, column: &str) -> Result<()> {
        if self.def.has_column(column) {
            Ok(())
        } else {
            Err(Error::UnknownColumn {
                model: self.def.name.clone(),
                column: column.to_string(),
            })
        }
    }

    /// Validate every key used by a query and coerce condition values to
    /// their column types.
    pub(crate) fn prepare(
        &self,
        conditions: &Conditions,
        options: &QueryOptions,
    ) -> Result<(Conditions, QueryOptions)> {
        let mut conditions = conditions.clone();
        for (column, value) in conditions.iter_mut() {
            self.check_column(column)?;
            let raw = std::mem::replace(value, Value::Null);
            *value = self.coerce(column, raw);
        }

        let mut options = options.clone();
        for column in &options.select {
            self.check_column(column)?;
        }
        for (column, _) in &options.order_by {
            self.check_column(column)?;
        }
        if let Some(search) = &options.search {
            for field in &search.fields {
                self.check_column(field)?;
            }
        }
        for (column, value) in options.filter.iter_mut() {
            self.check_column(column)?;
            let raw = std::mem::replace(value, Value::Null);
            *value = self.coerce(column, raw);
        }
        for relation in &options.include {
            self.relation(relation)?;
        }
        Ok((conditions, options))
    }

    pub(crate) fn relation(&self, name: &str) -> Result<&crate::catalog::RelationDef> {
        self.def
            .get_relation(name)
            .ok_or_else(|| Error::RelationNotFound {
                model: self.def.name.clone(),
                relation: name.to_string(),
            })
    }

    /// Convert a value to the representation its column binds as.
    pub(crate) fn coerce(&self, column: &str, value: Value) -> Value {
        let column_type = match column {
            "id" => Some(ColumnType::Uuid),
            "created_at" | "updated_at" => Some(ColumnType::Date),
            _ => self.def.get_column(column).map(|c| c.column_type),
        };
        match column_type {
            Some(column_type) => coerce_value(column_type, value),
            None => value,
        }
    }
}

pub(crate) fn coerce_value(column_type: ColumnType, value: Value) -> Value {
    match (column_type, value) {
        (_, Value::Null) => Value::Null,
        (ColumnType::Uuid, Value::Text(s)) => match Uuid::parse_str(&s) {
            Ok(id) => Value::Uuid(id),
            Err(_) => Value::Text(s),
        },
        (ColumnType::Date, Value::Text(s)) => match parse_timestamp(&s) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Text(s),
        },
        (ColumnType::Json, Value::Json(j)) => Value::Json(j),
        (ColumnType::Json, other) => Value::Json(other.to_json()),
        (_, other) => other,
    }
}

/// Parse RFC 3339, then naive date-times and plain dates as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.def.name)
            .field("table", &self.def.table_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, RelationDef};
    use crate::connection::RecordingConnection;
    use crate::query::{Direction, Search};

    fn orm_with(conn: Arc<RecordingConnection>) -> Orm {
        let registry = Arc::new(Registry::new());
        registry
            .define(
                ModelDef::new("User", "users")
                    .with_column(ColumnDef::required("name", ColumnType::String))
                    .with_column(ColumnDef::new("status", ColumnType::String))
                    .with_column(ColumnDef::new("settings", ColumnType::Json))
                    .with_relation(RelationDef::has_many("posts", "Post")),
            )
            .unwrap();
        registry
            .define(
                ModelDef::new("Post", "posts")
                    .with_column(ColumnDef::new("title", ColumnType::String))
                    .with_column(ColumnDef::new("user_id", ColumnType::Uuid)),
            )
            .unwrap();
        Orm::with_connection(registry, conn)
    }

    #[tokio::test]
    async fn test_connection_not_set() {
        let orm = Orm::new(Arc::new(Registry::new()));
        assert!(matches!(orm.connection(), Err(Error::ConnectionNotSet)));
    }

    #[tokio::test]
    async fn test_unregistered_model() {
        let orm = orm_with(Arc::new(RecordingConnection::new()));
        assert!(matches!(orm.model("Ghost"), Err(Error::NotRegistered { .. })));
    }

    #[tokio::test]
    async fn test_find_all_builds_select() {
        let conn = Arc::new(RecordingConnection::new());
        let users = orm_with(conn.clone()).model("User").unwrap();

        let options = QueryOptions::new()
            .search(Search::new(["name"], "ali"))
            .order_by("name", Direction::Asc)
            .limit(5);
        users
            .find_all(&Conditions::new().with("status", "active"), &options)
            .await
            .unwrap();

        assert_eq!(
            conn.sql_log(),
            vec!["SELECT * FROM users WHERE status = $1 AND (name ILIKE $2) ORDER BY name ASC LIMIT 5"]
        );
    }

    #[tokio::test]
    async fn test_unknown_column_rejected_before_sql() {
        let conn = Arc::new(RecordingConnection::new());
        let users = orm_with(conn.clone()).model("User").unwrap();

        let err = users
            .find_all(&Conditions::new().with("nope", 1i64), &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));

        let err = users
            .count(&Conditions::new(), &QueryOptions::new().order_by("nope", Direction::Asc))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));
        assert!(conn.sql_log().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id_coerces_uuid() {
        let conn = Arc::new(RecordingConnection::new());
        let users = orm_with(conn.clone()).model("User").unwrap();
        let id = Uuid::new_v4();

        let found = users
            .find_by_id(id.to_string(), &QueryOptions::default())
            .await
            .unwrap();

        assert!(found.is_none());
        let statements = conn.statements();
        assert_eq!(statements[0].sql, "SELECT * FROM users WHERE id = $1 LIMIT 1");
        assert_eq!(statements[0].params, vec![Value::Uuid(id)]);
    }

    #[tokio::test]
    async fn test_find_and_count() {
        let conn = Arc::new(RecordingConnection::with_responder(|stmt| {
            if stmt.sql.starts_with("SELECT COUNT") {
                Ok(vec![Row::new().with("count", 15i64)])
            } else {
                Ok((0..10)
                    .map(|i| Row::new().with("id", Uuid::new_v4()).with("name", format!("u{}", i)))
                    .collect())
            }
        }));
        let users = orm_with(conn.clone()).model("User").unwrap();

        let page = users
            .find_and_count(
                &Conditions::new().with("status", "active"),
                &QueryOptions::new().limit(10).offset(0),
            )
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 10);
        assert_eq!(page.total, 15);
        let log = conn.sql_log();
        assert!(log.contains(&"SELECT COUNT(*) AS count FROM users WHERE status = $1".to_string()));
        assert!(log.contains(&"SELECT * FROM users WHERE status = $1 LIMIT 10 OFFSET 0".to_string()));
    }

    #[tokio::test]
    async fn test_bulk_writes() {
        let conn = Arc::new(RecordingConnection::new());
        let users = orm_with(conn.clone()).model("User").unwrap();

        users
            .update_many(
                &Conditions::new().with("status", "pending"),
                Row::new().with("status", "active"),
            )
            .await
            .unwrap();
        users
            .delete_many(&Conditions::new().with("status", Value::Null))
            .await
            .unwrap();

        assert_eq!(
            conn.sql_log(),
            vec![
                "UPDATE users SET status = $1 WHERE status = $2",
                "DELETE FROM users WHERE status IS NULL"
            ]
        );
    }

    #[tokio::test]
    async fn test_create_many_is_atomic() {
        let conn = Arc::new(RecordingConnection::with_responder(|stmt| {
            if stmt.params.contains(&Value::from("u2")) {
                Err(Error::Connection("duplicate".into()))
            } else {
                Ok(Vec::new())
            }
        }));
        let users = orm_with(conn.clone()).model("User").unwrap();

        let result = users
            .create_many(vec![
                Row::new().with("name", "u1"),
                Row::new().with("name", "u2"),
            ])
            .await;

        assert!(result.is_err());
        let log = conn.sql_log();
        assert_eq!(log.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(log.iter().filter(|s| s.starts_with("INSERT")).count(), 2);
    }

    #[test]
    fn test_coerce_value() {
        let id = Uuid::new_v4();
        assert_eq!(
            coerce_value(ColumnType::Uuid, Value::Text(id.to_string())),
            Value::Uuid(id)
        );
        assert_eq!(
            coerce_value(ColumnType::Json, Value::Int(3)),
            Value::Json(serde_json::json!(3))
        );
        assert_eq!(
            coerce_value(ColumnType::Date, Value::from("2024-01-02T03:04:05Z"))
                .as_timestamp()
                .map(|t| t.to_rfc3339()),
            Some("2024-01-02T03:04:05+00:00".to_string())
        );
        assert_eq!(coerce_value(ColumnType::String, Value::Null), Value::Null);
    }

    #[test]
    fn test_coerce_naive_dates() {
        let rfc3339 = |v: Value| v.as_timestamp().map(|t| t.to_rfc3339());
        assert_eq!(
            rfc3339(coerce_value(ColumnType::Date, Value::from("2024-01-01"))),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
        assert_eq!(
            rfc3339(coerce_value(ColumnType::Date, Value::from("2024-01-01 10:30:00"))),
            Some("2024-01-01T10:30:00+00:00".to_string())
        );
        assert_eq!(
            rfc3339(coerce_value(ColumnType::Date, Value::from("2024-01-01T10:30:00.5"))),
            Some("2024-01-01T10:30:00.500+00:00".to_string())
        );
        assert_eq!(
            coerce_value(ColumnType::Date, Value::from("next week")),
            Value::from("next week")
        );
    }

    #[tokio::test]
    async fn test_create_many_inside_transaction_uses_savepoint() {
        let conn = Arc::new(RecordingConnection::with_responder(|stmt| {
            if stmt.params.contains(&Value::from("u2")) {
                Err(Error::Connection("duplicate".into()))
            } else {
                Ok(Vec::new())
            }
        }));
        let orm = orm_with(conn.clone());
        let users = orm.model("User").unwrap();

        let inner_failed = orm
            .transaction(async {
                let result = users
                    .create_many(vec![
                        Row::new().with("name", "u1"),
                        Row::new().with("name", "u2"),
                    ])
                    .await;
                Ok(result.is_err())
            })
            .await
            .unwrap();

        assert!(inner_failed);
        let log = conn.sql_log();
        assert_eq!(log[0], "BEGIN");
        assert_eq!(log[1], "SAVEPOINT celeron_atomic");
        assert_eq!(log.iter().filter(|s| s.starts_with("INSERT")).count(), 2);
        assert_eq!(log[log.len() - 2], "ROLLBACK TO SAVEPOINT celeron_atomic");
        assert_eq!(log[log.len() - 1], "COMMIT");
    }

    #[tokio::test]
    async fn test_create_many_inside_transaction_releases_savepoint() {
        let conn = Arc::new(RecordingConnection::new());
        let orm = orm_with(conn.clone());
        let users = orm.model("User").unwrap();

        let created = orm
            .transaction(users.create_many(vec![Row::new().with("name", "u1")]))
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        let log = conn.sql_log();
        assert_eq!(log[1], "SAVEPOINT celeron_atomic");
        assert_eq!(log[log.len() - 2], "RELEASE SAVEPOINT celeron_atomic");
        assert_eq!(log[log.len() - 1], "COMMIT");
    }

    #[tokio::test]
    async fn test_nested_transaction_rejected() {
        let conn = Arc::new(RecordingConnection::new());
        let orm = orm_with(conn.clone());

        let result = orm
            .transaction(async {
                let nested = orm.transaction(async { Ok(()) }).await;
                assert!(matches!(nested, Err(Error::AlreadyInTransaction)));
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(conn.sql_log(), vec!["BEGIN", "COMMIT"]);
    }
}
