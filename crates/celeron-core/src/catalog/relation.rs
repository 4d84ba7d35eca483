//! Relation definitions between models.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind of association between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// The target holds a foreign key to this model; at most one row.
    HasOne,
    /// The target holds a foreign key to this model; any number of rows.
    HasMany,
    /// This model holds a foreign key to the target.
    BelongsTo,
    /// Many-to-many through a join table.
    BelongsToMany,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RelationKind::HasOne => "hasOne",
            RelationKind::HasMany => "hasMany",
            RelationKind::BelongsTo => "belongsTo",
            RelationKind::BelongsToMany => "belongsToMany",
        };
        f.write_str(name)
    }
}

/// A relation declared on a model.
///
/// The target is referenced by model name and resolved through the registry at
/// use time, so mutually referencing models can be declared in any order.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    /// Relation name (unique within the model).
    pub name: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Target model name.
    pub target: String,
    /// Explicit foreign key column; defaulted per kind when absent.
    pub foreign_key: Option<String>,
    /// Join table, required for many-to-many relations.
    pub through: Option<String>,
    /// Name under which loaded data is cached on a record.
    pub property_key: String,
}

impl RelationDef {
    fn with_kind(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            property_key: name.clone(),
            name,
            kind,
            target: target.into(),
            foreign_key: None,
            through: None,
        }
    }

    /// Create a has-one relation.
    pub fn has_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, RelationKind::HasOne, target)
    }

    /// Create a has-many relation.
    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, RelationKind::HasMany, target)
    }

    /// Create a belongs-to relation.
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, RelationKind::BelongsTo, target)
    }

    /// Create a many-to-many relation through a join table.
    pub fn belongs_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        through: impl Into<String>,
    ) -> Self {
        let mut relation = Self::with_kind(name, RelationKind::BelongsToMany, target);
        relation.through = Some(through.into());
        relation
    }

    /// Set an explicit foreign key column.
    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self
    }

    /// Set the property key used to cache loaded data.
    pub fn with_property_key(mut self, property_key: impl Into<String>) -> Self {
        self.property_key = property_key.into();
        self
    }

    /// Check if this is a many-to-many relation.
    pub fn is_many_to_many(&self) -> bool {
        self.kind == RelationKind::BelongsToMany
    }

    /// Check the relation is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.is_many_to_many() && self.through.as_deref().map_or(true, str::is_empty) {
            return Err(Error::InvalidDefinition(format!(
                "belongsToMany relation {} requires a through table",
                self.name
            )));
        }
        Ok(())
    }

    /// Join table name, or `InvalidState` for relations without one.
    pub fn through_table(&self) -> Result<&str> {
        match (self.kind, self.through.as_deref()) {
            (RelationKind::BelongsToMany, Some(through)) => Ok(through),
            (RelationKind::BelongsToMany, None) => Err(Error::InvalidState(format!(
                "through table is required for belongsToMany relation {}",
                self.name
            ))),
            (kind, _) => Err(Error::InvalidState(format!(
                "relation {} is {}, not a many-to-many relation",
                self.name, kind
            ))),
        }
    }

    /// Foreign key column for has-one, has-many and belongs-to relations.
    ///
    /// `has*` relations default to `{owner}_id` on the target table;
    /// `belongsTo` defaults to `{target}_id` on the owner table. Model names are
    /// lowercased.
    pub fn resolved_foreign_key(&self, owner_model: &str) -> String {
        if let Some(foreign_key) = &self.foreign_key {
            return foreign_key.clone();
        }
        match self.kind {
            RelationKind::BelongsTo => format!("{}_id", self.target.to_lowercase()),
            _ => format!("{}_id", owner_model.to_lowercase()),
        }
    }

    /// Join table columns `(owner_column, related_column)`.
    ///
    /// Columns are named after the tables they reference. A self-referential
    /// relation names the related side `related_{table}_id`. An explicit
    /// foreign key overrides the owner column.
    pub fn join_columns(&self, owner_table: &str, related_table: &str) -> (String, String) {
        let owner = self
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", owner_table.to_lowercase()));
        let mut related = format!("{}_id", related_table.to_lowercase());
        if related == owner {
            related = format!("related_{}", related);
        }
        (owner, related)
    }
}
