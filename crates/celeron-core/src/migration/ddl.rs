//! DDL rendering for model and join tables.

use super::unit::{MigrationKind, SqlMigration};
use crate::catalog::{ColumnDef, ModelDef, RelationDef};
use crate::error::Result;

const ID_COLUMN: &str = "id UUID PRIMARY KEY DEFAULT uuid_generate_v4()";
const CREATED_AT_COLUMN: &str = "created_at timestamp with time zone DEFAULT CURRENT_TIMESTAMP";
const UPDATED_AT_COLUMN: &str = "updated_at timestamp with time zone DEFAULT CURRENT_TIMESTAMP";

/// Trigger function maintaining `updated_at`, installed by the migration manager.
pub const UPDATED_AT_FUNCTION: &str = "CREATE OR REPLACE FUNCTION update_updated_at_column() \
RETURNS TRIGGER AS $$ BEGIN NEW.updated_at = CURRENT_TIMESTAMP; RETURN NEW; END; $$ language 'plpgsql'";

/// Render one declared column.
pub fn column_sql(column: &ColumnDef, inline_unique: bool) -> String {
    let mut sql = format!("{} {}", column.name, column.column_type.sql_type());
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique && inline_unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default.to_sql());
    }
    sql
}

/// Declared column definitions of a model, followed by the composite unique
/// constraint when more than one column is unique.
///
/// Only the first unique column keeps its inline `UNIQUE`; the others are
/// covered by the appended `UNIQUE(a, b, ...)`.
pub fn column_definitions(model: &ModelDef) -> Vec<String> {
    let mut definitions = Vec::new();
    let mut unique = Vec::new();
    for column in model.data_columns() {
        let first_unique = column.unique && unique.is_empty();
        if column.unique {
            unique.push(column.name.as_str());
        }
        definitions.push(column_sql(column, first_unique));
    }
    if unique.len() > 1 {
        definitions.push(format!("UNIQUE({})", unique.join(", ")));
    }
    definitions
}

fn create_table(table: &str, body: &[String]) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        table,
        body.join(",\n  ")
    )
}

fn trigger_statements(table: &str) -> [String; 2] {
    [
        format!("DROP TRIGGER IF EXISTS update_{table}_updated_at ON {table}"),
        format!(
            "CREATE TRIGGER update_{table}_updated_at BEFORE UPDATE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION update_updated_at_column()"
        ),
    ]
}

fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", table)
}

/// Name of the migration creating a model table.
pub fn primary_name(table: &str, stamp: i64) -> String {
    format!("Create{}Table_{}", table, stamp)
}

/// Name of the migration creating a join table.
pub fn join_name(owner_table: &str, related_table: &str, stamp: i64) -> String {
    format!("CreateJoinTable_{}_{}_{}", owner_table, related_table, stamp)
}

/// Migration creating a model's table with its implicit columns and trigger.
pub fn primary_migration(model: &ModelDef, stamp: i64) -> SqlMigration {
    let table = &model.table_name;

    let mut body = vec![ID_COLUMN.to_string()];
    let mut columns = column_definitions(model);
    // Table constraint goes after the timestamps.
    let constraint = match columns.last() {
        Some(last) if last.starts_with("UNIQUE(") => columns.pop(),
        _ => None,
    };
    body.append(&mut columns);
    body.push(CREATED_AT_COLUMN.to_string());
    body.push(UPDATED_AT_COLUMN.to_string());
    body.extend(constraint);

    let [drop_trigger, create_trigger] = trigger_statements(table);
    SqlMigration::new(primary_name(table, stamp), MigrationKind::Primary, table.as_str())
        .with_up(create_table(table, &body))
        .with_up(drop_trigger)
        .with_up(create_trigger)
        .with_down(drop_table(table))
}

/// Migration creating the join table of a many-to-many relation.
pub fn join_migration(
    owner: &ModelDef,
    related: &ModelDef,
    relation: &RelationDef,
    stamp: i64,
) -> Result<SqlMigration> {
    let through = relation.through_table()?;
    let (owner_column, related_column) =
        relation.join_columns(&owner.table_name, &related.table_name);

    let body = vec![
        ID_COLUMN.to_string(),
        format!(
            "{} UUID REFERENCES {}(id) ON DELETE CASCADE",
            owner_column, owner.table_name
        ),
        format!(
            "{} UUID REFERENCES {}(id) ON DELETE CASCADE",
            related_column, related.table_name
        ),
        CREATED_AT_COLUMN.to_string(),
        UPDATED_AT_COLUMN.to_string(),
        format!("UNIQUE({}, {})", owner_column, related_column),
    ];

    let [drop_trigger, create_trigger] = trigger_statements(through);
    Ok(SqlMigration::new(
        join_name(&owner.table_name, &related.table_name, stamp),
        MigrationKind::Join,
        through,
    )
    .with_up(create_table(through, &body))
    .with_up(drop_trigger)
    .with_up(create_trigger)
    .with_down(drop_table(through)))
}
