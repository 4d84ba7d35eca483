//! Column definitions for models.

use super::types::ColumnType;

/// A column definition within a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the column carries a uniqueness constraint.
    pub unique: bool,
    /// Default value if not provided.
    pub default: Option<DefaultValue>,
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value, quoted in DDL.
    Text(String),
    /// JSON document, cast to `jsonb`.
    Json(serde_json::Value),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Raw SQL expression rendered verbatim.
    Expression(String),
}

impl DefaultValue {
    /// Interpret a JSON literal from a model source.
    ///
    /// The string `CURRENT_TIMESTAMP` maps to [`DefaultValue::CurrentTimestamp`].
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => DefaultValue::Null,
            Json::Bool(b) => DefaultValue::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => DefaultValue::Int(i),
                None => DefaultValue::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) if s == "CURRENT_TIMESTAMP" => DefaultValue::CurrentTimestamp,
            Json::String(s) => DefaultValue::Text(s),
            other => DefaultValue::Json(other),
        }
    }

    /// Render as a SQL literal for a `DEFAULT` clause.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(b) => b.to_string(),
            DefaultValue::Int(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::Json(j) => format!("{}::jsonb", quote_literal(&j.to_string())),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::Expression(expr) => expr.clone(),
        }
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl ColumnDef {
    /// Create a new nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
            default: None,
        }
    }

    /// Create a `NOT NULL` column.
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::new(name, column_type).not_null()
    }

    /// Mark as `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Check if this column has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_def_builder() {
        let column = ColumnDef::required("email", ColumnType::String).unique();

        assert_eq!(column.name, "email");
        assert!(!column.nullable);
        assert!(column.unique);
        assert!(!column.has_default());
    }

    #[test]
    fn test_default_rendering() {
        assert_eq!(DefaultValue::Text("it's".into()).to_sql(), "'it''s'");
        assert_eq!(DefaultValue::Int(3).to_sql(), "3");
        assert_eq!(DefaultValue::Bool(false).to_sql(), "false");
        assert_eq!(DefaultValue::CurrentTimestamp.to_sql(), "CURRENT_TIMESTAMP");
        assert_eq!(
            DefaultValue::Json(serde_json::json!({"a": 1})).to_sql(),
            "'{\"a\":1}'::jsonb"
        );
    }

    #[test]
    fn test_default_from_json() {
        assert_eq!(
            DefaultValue::from_json(serde_json::json!("CURRENT_TIMESTAMP")),
            DefaultValue::CurrentTimestamp
        );
        assert_eq!(
            DefaultValue::from_json(serde_json::json!("active")),
            DefaultValue::Text("active".into())
        );
        assert_eq!(DefaultValue::from_json(serde_json::json!(0)), DefaultValue::Int(0));
        assert_eq!(
            DefaultValue::from_json(serde_json::json!(1.5)),
            DefaultValue::Float(1.5)
        );
    }
}
