//! Abstract column types and their PostgreSQL mapping.

use serde::{Deserialize, Serialize};

/// Column data types supported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Short text, `VARCHAR(255)`.
    String,
    /// Arbitrary precision number, `NUMERIC`.
    Number,
    /// Boolean value.
    Boolean,
    /// Timestamp without time zone.
    Date,
    /// JSON document stored as `JSONB`.
    Json,
    /// UUID, used for foreign keys referencing model identities.
    Uuid,
}

impl ColumnType {
    /// Get the SQL type rendered in generated DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Number => "NUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "TIMESTAMP",
            ColumnType::Json => "JSONB",
            ColumnType::Uuid => "UUID",
        }
    }

    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Number)
    }

    /// Check if this type is a string-like type.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ColumnType::String)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
            ColumnType::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_map() {
        assert_eq!(ColumnType::String.sql_type(), "VARCHAR(255)");
        assert_eq!(ColumnType::Number.sql_type(), "NUMERIC");
        assert_eq!(ColumnType::Boolean.sql_type(), "BOOLEAN");
        assert_eq!(ColumnType::Date.sql_type(), "TIMESTAMP");
        assert_eq!(ColumnType::Json.sql_type(), "JSONB");
        assert_eq!(ColumnType::Uuid.sql_type(), "UUID");
    }

    #[test]
    fn test_type_checks() {
        assert!(ColumnType::Number.is_numeric());
        assert!(!ColumnType::String.is_numeric());
        assert!(ColumnType::String.is_string_like());
    }

    #[test]
    fn test_deserialize_lowercase() {
        let ty: ColumnType = serde_json::from_str("\"boolean\"").unwrap();
        assert_eq!(ty, ColumnType::Boolean);
        assert_eq!(ty.to_string(), "boolean");
    }
}
