//! Tests against a live PostgreSQL server.
//!
//! Set `DATABASE_URL` to run them; without it every test returns early.

use celeron_core::migration::into_units;
use celeron_core::{
    ColumnDef, ColumnType, Conditions, Config, Connection, MigrationGenerator, MigrationKind,
    MigrationManager, MigrationUnit, ModelDef, Orm, PgConnection, QueryOptions, Registry,
    RelationDef, Row, Value,
};
use std::sync::Arc;

struct Schema {
    conn: Arc<PgConnection>,
    registry: Arc<Registry>,
    suffix: String,
}

impl Schema {
    async fn connect() -> Option<Self> {
        let config = Config::from_env();
        config.database_url.as_ref()?;
        let conn = PgConnection::connect(&config).await.unwrap();

        // Unique table names keep concurrent runs apart.
        let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let registry = Registry::new();
        registry
            .define(
                ModelDef::new("Author", format!("authors_{suffix}"))
                    .with_column(ColumnDef::required("name", ColumnType::String).unique())
                    .with_column(ColumnDef::new("status", ColumnType::String))
                    .with_relation(RelationDef::belongs_to_many(
                        "tags",
                        "Tag",
                        format!("author_tags_{suffix}"),
                    )),
            )
            .unwrap();
        registry
            .define(
                ModelDef::new("Tag", format!("tags_{suffix}"))
                    .with_column(ColumnDef::required("label", ColumnType::String)),
            )
            .unwrap();

        Some(Self {
            conn: Arc::new(conn),
            registry: Arc::new(registry),
            suffix,
        })
    }

    fn generator(&self) -> MigrationGenerator {
        MigrationGenerator::new(self.registry.clone(), Config::new())
    }

    fn manager(&self) -> MigrationManager {
        MigrationManager::new(self.conn.clone())
    }

    fn orm(&self) -> Orm {
        Orm::with_connection(self.registry.clone(), self.conn.clone())
    }

    async fn table_exists(&self, table: &str) -> bool {
        let rows = self
            .conn
            .fetch_all(
                "SELECT COUNT(*) AS count FROM information_schema.tables WHERE table_name = $1",
                &[Value::from(table)],
            )
            .await
            .unwrap();
        rows[0].get("count").and_then(Value::as_i64) == Some(1)
    }
}

#[tokio::test]
async fn test_join_table_requires_referenced_tables() {
    let Some(schema) = Schema::connect().await else {
        return;
    };
    let manager = schema.manager();
    manager.initialize().await.unwrap();

    let migrations = schema.generator().generate().unwrap();
    let join = migrations
        .iter()
        .find(|m| m.kind == MigrationKind::Join)
        .unwrap();

    schema.conn.begin().await.unwrap();
    let result = join.up(schema.conn.as_ref()).await;
    schema.conn.rollback().await.unwrap();

    assert!(result.is_err());
    assert!(!schema.table_exists(&join.table).await);
}

#[tokio::test]
async fn test_migrate_use_and_roll_back() {
    let Some(schema) = Schema::connect().await else {
        return;
    };
    let manager = schema.manager();
    let migrations = schema.generator().generate().unwrap();
    let report = manager
        .migrate_with_migrations(into_units(migrations))
        .await
        .unwrap();
    assert_eq!(report.applied.len(), 3);

    let authors_table = format!("authors_{}", schema.suffix);
    let tags_table = format!("tags_{}", schema.suffix);
    let join_table = format!("author_tags_{}", schema.suffix);
    assert!(schema.table_exists(&authors_table).await);
    assert!(schema.table_exists(&join_table).await);

    let orm = schema.orm();
    let authors = orm.model("Author").unwrap();
    let tags = orm.model("Tag").unwrap();

    // save() inserts once, then updates.
    let mut author = authors.build(Row::new().with("name", "Ada").with("status", "active"));
    author.save().await.unwrap();
    let id = author.id().unwrap();
    author.set("name", "Ada Lovelace").unwrap();
    author.save().await.unwrap();
    let found = authors
        .find_by_id(id, &QueryOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name").and_then(Value::as_str), Some("Ada Lovelace"));
    assert_eq!(
        authors.count(&Conditions::new(), &QueryOptions::default()).await.unwrap(),
        1
    );

    // Paging with an unpaged total.
    for i in 0..14 {
        authors
            .create(
                Row::new()
                    .with("name", format!("author {i}"))
                    .with("status", "active"),
            )
            .await
            .unwrap();
    }
    let page = authors
        .find_and_count(
            &Conditions::new().with("status", "active"),
            &QueryOptions::new().limit(10).offset(0),
        )
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 10);
    assert_eq!(page.total, 15);

    // attach is idempotent; sync replaces the link set.
    let first = tags.create(Row::new().with("label", "first")).await.unwrap();
    let second = tags.create(Row::new().with("label", "second")).await.unwrap();
    let first_id = first.id().unwrap();
    let second_id = second.id().unwrap();

    author.attach("tags", [first_id]).await.unwrap();
    author.attach("tags", [first_id]).await.unwrap();
    let links = schema
        .conn
        .fetch_all(
            &format!("SELECT COUNT(*) AS count FROM {join_table}"),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(links[0].get("count").and_then(Value::as_i64), Some(1));

    author.sync("tags", [second_id]).await.unwrap();
    assert!(!author.is_attached("tags", first_id).await.unwrap());
    assert!(author.is_attached("tags", second_id).await.unwrap());

    let loaded = author.load("tags", &QueryOptions::default()).await.unwrap();
    assert_eq!(loaded.records().len(), 1);

    author.sync("tags", Vec::<Value>::new()).await.unwrap();
    let loaded = author.load("tags", &QueryOptions::default()).await.unwrap();
    assert!(loaded.records().is_empty());

    // rollback(1) drops every table of the last batch.
    let rolled = manager.rollback(1).await.unwrap();
    assert_eq!(rolled.rolled_back.len(), 3);
    assert!(!schema.table_exists(&authors_table).await);
    assert!(!schema.table_exists(&tags_table).await);
    assert!(!schema.table_exists(&join_table).await);

    let status = manager.status().await.unwrap();
    assert!(status.iter().all(|r| !report.applied.contains(&r.name)));
}
