//! Model definitions.

use super::column::ColumnDef;
use super::relation::RelationDef;

/// Implicit columns every primary table carries.
pub const IMPLICIT_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Metadata for a registered model: its table, columns and relations.
///
/// Columns and relations keep declaration order; generated DDL follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    /// Model name.
    pub name: String,
    /// Backing table name.
    pub table_name: String,
    /// Declared columns.
    pub columns: Vec<ColumnDef>,
    /// Declared relations.
    pub relations: Vec<RelationDef>,
}

impl ModelDef {
    /// Create a new model definition with no columns or relations.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.set_column(column);
        self
    }

    /// Add multiple columns.
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        for column in columns {
            self.set_column(column);
        }
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.set_relation(relation);
        self
    }

    /// Insert a column, replacing an existing one with the same name in place.
    pub fn set_column(&mut self, column: ColumnDef) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    /// Insert a relation, replacing an existing one with the same name in place.
    pub fn set_relation(&mut self, relation: RelationDef) {
        match self.relations.iter_mut().find(|r| r.name == relation.name) {
            Some(existing) => *existing = relation,
            None => self.relations.push(relation),
        }
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get a relation by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Check whether a name is addressable in queries: a declared column or
    /// one of the implicit `id`, `created_at`, `updated_at` columns.
    pub fn has_column(&self, name: &str) -> bool {
        IMPLICIT_COLUMNS.contains(&name) || self.get_column(name).is_some()
    }

    /// Declared columns excluding any that shadow the implicit ones.
    pub fn data_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| !IMPLICIT_COLUMNS.contains(&c.name.as_str()))
    }

    /// Names of declared columns flagged unique, in declaration order.
    pub fn unique_columns(&self) -> Vec<&str> {
        self.data_columns()
            .filter(|c| c.unique)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Many-to-many relations declared on this model.
    pub fn many_to_many(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.iter().filter(|r| r.is_many_to_many())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::ColumnType;

    #[test]
    fn test_model_builder() {
        let model = ModelDef::new("User", "users")
            .with_column(ColumnDef::required("name", ColumnType::String))
            .with_column(ColumnDef::new("email", ColumnType::String).unique())
            .with_relation(RelationDef::has_many("posts", "Post"));

        assert_eq!(model.columns.len(), 2);
        assert_eq!(model.columns[0].name, "name");
        assert!(model.get_column("email").is_some());
        assert!(model.get_relation("posts").is_some());
        assert!(model.get_relation("missing").is_none());
    }

    #[test]
    fn test_set_column_replaces_in_place() {
        let mut model = ModelDef::new("User", "users")
            .with_column(ColumnDef::new("a", ColumnType::String))
            .with_column(ColumnDef::new("b", ColumnType::String));
        model.set_column(ColumnDef::new("a", ColumnType::Number));

        assert_eq!(model.columns.len(), 2);
        assert_eq!(model.columns[0].column_type, ColumnType::Number);
    }

    #[test]
    fn test_implicit_columns_addressable() {
        let model = ModelDef::new("User", "users")
            .with_column(ColumnDef::new("id", ColumnType::Uuid))
            .with_column(ColumnDef::new("name", ColumnType::String).unique());

        assert!(model.has_column("id"));
        assert!(model.has_column("created_at"));
        assert!(model.has_column("name"));
        assert!(!model.has_column("nope"));
        assert_eq!(model.data_columns().count(), 1);
        assert_eq!(model.unique_columns(), vec!["name"]);
    }
}
