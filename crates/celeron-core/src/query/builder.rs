//! Pure SQL statement builders.
//!
//! Builders never touch a connection: they turn conditions and options into a
//! [`Statement`] with `$n` placeholders and the matching parameter list.
//! Column names are expected to be validated by the caller.

use super::options::{Conditions, QueryOptions, SearchMode};
use crate::value::Value;
use std::fmt;

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Accumulates parameters and hands out their placeholders.
#[derive(Default)]
struct Binder {
    params: Vec<Value>,
}

impl Binder {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn equality(&mut self, column: &str, value: &Value) -> String {
        if value.is_null() {
            format!("{} IS NULL", column)
        } else {
            format!("{} = {}", column, self.bind(value.clone()))
        }
    }

    /// Placeholder for a value list entry; nulls render as a literal.
    fn literal_or_bind(&mut self, value: &Value) -> String {
        if value.is_null() {
            "NULL".to_string()
        } else {
            self.bind(value.clone())
        }
    }

    fn finish(self, sql: String) -> Statement {
        Statement::new(sql, self.params)
    }
}

/// Render `WHERE` terms for base conditions, the search block and the filter.
fn where_terms(
    binder: &mut Binder,
    prefix: &str,
    conditions: &Conditions,
    options: &QueryOptions,
) -> Vec<String> {
    let mut terms = Vec::new();

    for (column, value) in conditions.iter() {
        terms.push(binder.equality(&format!("{}{}", prefix, column), value));
    }

    if let Some(search) = options.search.as_ref().filter(|s| s.is_active()) {
        let placeholder = binder.bind(search.bound_term());
        let alternatives: Vec<String> = search
            .fields
            .iter()
            .map(|field| match search.mode {
                SearchMode::Like => format!("{}{} ILIKE {}", prefix, field, placeholder),
                SearchMode::Exact => format!("{}{} = {}", prefix, field, placeholder),
                SearchMode::Fulltext => format!(
                    "to_tsvector({}{}) @@ to_tsquery({})",
                    prefix, field, placeholder
                ),
            })
            .collect();
        terms.push(format!("({})", alternatives.join(" OR ")));
    }

    for (column, value) in options.filter.iter() {
        terms.push(binder.equality(&format!("{}{}", prefix, column), value));
    }

    terms
}

fn push_where(sql: &mut String, terms: &[String]) {
    if !terms.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&terms.join(" AND "));
    }
}

fn projection(prefix: &str, options: &QueryOptions) -> String {
    if options.select.is_empty() {
        format!("{}*", prefix)
    } else {
        options
            .select
            .iter()
            .map(|c| format!("{}{}", prefix, c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn push_tail(sql: &mut String, prefix: &str, options: &QueryOptions) {
    if !options.order_by.is_empty() {
        let terms: Vec<String> = options
            .order_by
            .iter()
            .map(|(column, direction)| format!("{}{} {}", prefix, column, direction.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
}

/// `SELECT` over one table.
pub fn select(table: &str, conditions: &Conditions, options: &QueryOptions) -> Statement {
    let mut binder = Binder::default();
    let mut sql = format!("SELECT {} FROM {}", projection("", options), table);
    let terms = where_terms(&mut binder, "", conditions, options);
    push_where(&mut sql, &terms);
    push_tail(&mut sql, "", options);
    binder.finish(sql)
}

/// `SELECT COUNT(*) AS count` with the same filtering as [`select`].
/// Projection, ordering and paging are ignored.
pub fn count(table: &str, conditions: &Conditions, options: &QueryOptions) -> Statement {
    let mut binder = Binder::default();
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", table);
    let terms = where_terms(&mut binder, "", conditions, options);
    push_where(&mut sql, &terms);
    binder.finish(sql)
}

/// `INSERT ... RETURNING id`.
pub fn insert(table: &str, values: &[(String, Value)]) -> Statement {
    let mut binder = Binder::default();
    let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
    let placeholders: Vec<String> = values
        .iter()
        .map(|(_, v)| binder.literal_or_bind(v))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    binder.finish(sql)
}

/// `UPDATE ... WHERE id = $n`. An `id` entry in `values` is never written.
///
/// Returns `None` when there is nothing to set.
pub fn update_by_id(table: &str, values: &[(String, Value)], id: Value) -> Option<Statement> {
    let mut binder = Binder::default();
    let assignments: Vec<String> = values
        .iter()
        .filter(|(column, _)| column != "id")
        .map(|(column, value)| format!("{} = {}", column, binder.literal_or_bind(value)))
        .collect();
    if assignments.is_empty() {
        return None;
    }
    let id = binder.bind(id);
    let sql = format!(
        "UPDATE {} SET {} WHERE id = {}",
        table,
        assignments.join(", "),
        id
    );
    Some(binder.finish(sql))
}

/// `DELETE ... WHERE id = $1`.
pub fn delete_by_id(table: &str, id: Value) -> Statement {
    Statement::new(format!("DELETE FROM {} WHERE id = $1", table), vec![id])
}

/// Bulk `UPDATE` of every row matching `conditions`.
pub fn update_many(table: &str, conditions: &Conditions, patch: &[(String, Value)]) -> Statement {
    let mut binder = Binder::default();
    let assignments: Vec<String> = patch
        .iter()
        .map(|(column, value)| format!("{} = {}", column, binder.literal_or_bind(value)))
        .collect();
    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    let terms = where_terms(&mut binder, "", conditions, &QueryOptions::default());
    push_where(&mut sql, &terms);
    binder.finish(sql)
}

/// Bulk `DELETE` of every row matching `conditions`.
pub fn delete_many(table: &str, conditions: &Conditions) -> Statement {
    let mut binder = Binder::default();
    let mut sql = format!("DELETE FROM {}", table);
    let terms = where_terms(&mut binder, "", conditions, &QueryOptions::default());
    push_where(&mut sql, &terms);
    binder.finish(sql)
}

/// Columns of a join table, as seen from the owning side.
#[derive(Debug, Clone, Copy)]
pub struct JoinTable<'a> {
    pub table: &'a str,
    pub owner_column: &'a str,
    pub related_column: &'a str,
}

/// Select related rows through a join table.
pub fn select_through(
    related_table: &str,
    join: JoinTable<'_>,
    owner_id: Value,
    options: &QueryOptions,
) -> Statement {
    let mut binder = Binder::default();
    let mut sql = format!(
        "SELECT {} FROM {} r INNER JOIN {} j ON j.{} = r.id",
        projection("r.", options),
        related_table,
        join.table,
        join.related_column
    );
    let mut terms = vec![format!("j.{} = {}", join.owner_column, binder.bind(owner_id))];
    terms.extend(where_terms(&mut binder, "r.", &Conditions::new(), options));
    push_where(&mut sql, &terms);
    push_tail(&mut sql, "r.", options);
    binder.finish(sql)
}

/// Idempotent link insert.
pub fn attach(join: JoinTable<'_>, owner_id: Value, related_id: Value) -> Statement {
    Statement::new(
        format!(
            "INSERT INTO {table} ({owner}, {related}) VALUES ($1, $2) \
             ON CONFLICT ({owner}, {related}) DO NOTHING",
            table = join.table,
            owner = join.owner_column,
            related = join.related_column
        ),
        vec![owner_id, related_id],
    )
}

/// Delete links of one owner.
///
/// `None` deletes every link of the owner. `Some(ids)` is scoped to those
/// related ids; an empty list yields no statement.
pub fn detach(
    join: JoinTable<'_>,
    owner_id: Value,
    related_ids: Option<&[Value]>,
) -> Option<Statement> {
    let mut binder = Binder::default();
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        join.table,
        join.owner_column,
        binder.bind(owner_id)
    );
    if let Some(related_ids) = related_ids {
        if related_ids.is_empty() {
            return None;
        }
        let placeholders: Vec<String> = related_ids
            .iter()
            .map(|id| binder.bind(id.clone()))
            .collect();
        sql.push_str(&format!(
            " AND {} IN ({})",
            join.related_column,
            placeholders.join(", ")
        ));
    }
    Some(binder.finish(sql))
}

/// Count links between one owner and one related row.
pub fn is_attached(join: JoinTable<'_>, owner_id: Value, related_id: Value) -> Statement {
    Statement::new(
        format!(
            "SELECT COUNT(*) AS count FROM {} WHERE {} = $1 AND {} = $2",
            join.table, join.owner_column, join.related_column
        ),
        vec![owner_id, related_id],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, Search};

    const JOIN: JoinTable<'static> = JoinTable {
        table: "user_roles",
        owner_column: "users_id",
        related_column: "roles_id",
    };

    #[test]
    fn test_select_all() {
        let stmt = select("users", &Conditions::new(), &QueryOptions::default());
        assert_eq!(stmt.sql, "SELECT * FROM users");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_null_is_not_bound() {
        let conditions = Conditions::new()
            .with("status", "active")
            .with("deleted_at", Value::Null);
        let stmt = select("users", &conditions, &QueryOptions::default());

        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE status = $1 AND deleted_at IS NULL"
        );
        assert_eq!(stmt.params, vec![Value::Text("active".into())]);
    }

    #[test]
    fn test_select_with_search_filter_and_paging() {
        let options = QueryOptions::new()
            .select(["id", "name"])
            .search(Search::new(["name", "email"], "ali"))
            .filter("status", "active")
            .order_by("name", Direction::Asc)
            .order_by("created_at", Direction::Desc)
            .limit(10)
            .offset(20);
        let stmt = select("users", &Conditions::new().with("age", 30i64), &options);

        assert_eq!(
            stmt.sql,
            "SELECT id, name FROM users WHERE age = $1 AND (name ILIKE $2 OR email ILIKE $2) \
             AND status = $3 ORDER BY name ASC, created_at DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::Int(30),
                Value::Text("%ali%".into()),
                Value::Text("active".into())
            ]
        );
    }

    #[test]
    fn test_fulltext_search() {
        let options = QueryOptions::new()
            .search(Search::new(["bio"], "rust & sql").with_mode(crate::query::SearchMode::Fulltext));
        let stmt = select("users", &Conditions::new(), &options);

        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE (to_tsvector(bio) @@ to_tsquery($1))"
        );
        assert_eq!(stmt.params, vec![Value::Text("rust & sql".into())]);
    }

    #[test]
    fn test_count_ignores_paging() {
        let options = QueryOptions::new().limit(10).offset(0);
        let stmt = count("users", &Conditions::new().with("status", "active"), &options);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM users WHERE status = $1"
        );
    }

    #[test]
    fn test_insert_renders_null_literal() {
        let values = vec![
            ("name".to_string(), Value::from("alice")),
            ("bio".to_string(), Value::Null),
            ("id".to_string(), Value::from(7i64)),
        ];
        let stmt = insert("users", &values);

        assert_eq!(
            stmt.sql,
            "INSERT INTO users (name, bio, id) VALUES ($1, NULL, $2) RETURNING id"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_update_excludes_id() {
        let values = vec![
            ("id".to_string(), Value::from(1i64)),
            ("name".to_string(), Value::from("bob")),
        ];
        let stmt = update_by_id("users", &values, Value::from(1i64)).unwrap();

        assert_eq!(stmt.sql, "UPDATE users SET name = $1 WHERE id = $2");
        assert_eq!(stmt.params, vec![Value::from("bob"), Value::from(1i64)]);

        let only_id = vec![("id".to_string(), Value::from(1i64))];
        assert!(update_by_id("users", &only_id, Value::from(1i64)).is_none());
    }

    #[test]
    fn test_bulk_statements() {
        let stmt = update_many(
            "users",
            &Conditions::new().with("status", "pending"),
            &[("status".to_string(), Value::from("active"))],
        );
        assert_eq!(stmt.sql, "UPDATE users SET status = $1 WHERE status = $2");

        let stmt = delete_many("users", &Conditions::new().with("status", "banned"));
        assert_eq!(stmt.sql, "DELETE FROM users WHERE status = $1");

        let stmt = delete_by_id("users", Value::from(3i64));
        assert_eq!(stmt.sql, "DELETE FROM users WHERE id = $1");
    }

    #[test]
    fn test_select_through() {
        let options = QueryOptions::new()
            .order_by("name", Direction::Asc)
            .limit(5);
        let stmt = select_through("roles", JOIN, Value::from(1i64), &options);

        assert_eq!(
            stmt.sql,
            "SELECT r.* FROM roles r INNER JOIN user_roles j ON j.roles_id = r.id \
             WHERE j.users_id = $1 ORDER BY r.name ASC LIMIT 5"
        );
    }

    #[test]
    fn test_link_statements() {
        let stmt = attach(JOIN, Value::from(1i64), Value::from(2i64));
        assert_eq!(
            stmt.sql,
            "INSERT INTO user_roles (users_id, roles_id) VALUES ($1, $2) \
             ON CONFLICT (users_id, roles_id) DO NOTHING"
        );

        let stmt = detach(JOIN, Value::from(1i64), None).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM user_roles WHERE users_id = $1");

        assert!(detach(JOIN, Value::from(1i64), Some(&[][..])).is_none());

        let ids = [Value::from(2i64), Value::from(3i64)];
        let stmt = detach(JOIN, Value::from(1i64), Some(&ids[..])).unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM user_roles WHERE users_id = $1 AND roles_id IN ($2, $3)"
        );

        let stmt = is_attached(JOIN, Value::from(1i64), Value::from(2i64));
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM user_roles WHERE users_id = $1 AND roles_id = $2"
        );
    }
}
