//! Model source discovery.
//!
//! A model source is a `*.model.json` file declaring one model:
//!
//! ```json
//! {
//!   "name": "User",
//!   "table": "users",
//!   "columns": [{ "name": "email", "type": "string", "unique": true }],
//!   "relations": [{ "name": "roles", "type": "belongsToMany", "model": "Role", "through": "user_roles" }]
//! }
//! ```

use crate::catalog::{ColumnDef, ColumnType, DefaultValue, ModelDef, Registry, RelationDef, RelationKind};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File suffix identifying model sources.
pub const MODEL_SOURCE_SUFFIX: &str = ".model.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ModelSource {
    name: String,
    table: String,
    #[serde(default)]
    columns: Vec<ColumnSource>,
    #[serde(default)]
    relations: Vec<RelationSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ColumnSource {
    name: String,
    #[serde(rename = "type")]
    column_type: ColumnType,
    #[serde(default = "nullable_default")]
    nullable: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    default: Option<serde_json::Value>,
}

fn nullable_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RelationSource {
    name: String,
    #[serde(rename = "type")]
    kind: RelationKind,
    model: String,
    foreign_key: Option<String>,
    through: Option<String>,
    property_key: Option<String>,
}

impl From<ColumnSource> for ColumnDef {
    fn from(source: ColumnSource) -> Self {
        ColumnDef {
            name: source.name,
            column_type: source.column_type,
            nullable: source.nullable,
            unique: source.unique,
            default: source.default.map(DefaultValue::from_json),
        }
    }
}

impl From<RelationSource> for RelationDef {
    fn from(source: RelationSource) -> Self {
        let mut relation = match source.kind {
            RelationKind::HasOne => RelationDef::has_one(source.name, source.model),
            RelationKind::HasMany => RelationDef::has_many(source.name, source.model),
            RelationKind::BelongsTo => RelationDef::belongs_to(source.name, source.model),
            // Validated on registration, so a missing `through` is reported there.
            RelationKind::BelongsToMany => RelationDef {
                kind: RelationKind::BelongsToMany,
                through: source.through,
                ..RelationDef::has_many(source.name, source.model)
            },
        };
        if let Some(foreign_key) = source.foreign_key {
            relation = relation.with_foreign_key(foreign_key);
        }
        if let Some(property_key) = source.property_key {
            relation = relation.with_property_key(property_key);
        }
        relation
    }
}

impl From<ModelSource> for ModelDef {
    fn from(source: ModelSource) -> Self {
        let mut def = ModelDef::new(source.name, source.table)
            .with_columns(source.columns.into_iter().map(ColumnDef::from));
        for relation in source.relations {
            def = def.with_relation(relation.into());
        }
        def
    }
}

/// Parse one model source.
pub fn parse_model_source(json: &str) -> Result<ModelDef> {
    let source: ModelSource = serde_json::from_str(json)?;
    Ok(source.into())
}

/// Every model source under `root`, recursively, in path order.
///
/// A missing root yields no sources.
pub fn model_sources(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        tracing::warn!(path = %root.display(), "models path does not exist");
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let is_source = entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(MODEL_SOURCE_SUFFIX));
        if is_source {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Load every model source under `root` into `registry`.
///
/// Returns the names of the models defined, in discovery order. The first
/// unreadable or invalid source aborts discovery.
pub fn discover_models(root: &Path, registry: &Registry) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for path in model_sources(root)? {
        let json = std::fs::read_to_string(&path)?;
        let def = parse_model_source(&json).map_err(|err| {
            Error::MigrationGeneration(format!("{}: {}", path.display(), err))
        })?;
        let def = registry.define(def)?;
        tracing::debug!(model = %def.name, path = %path.display(), "discovered model");
        names.push(def.name);
    }
    tracing::info!(count = names.len(), path = %root.display(), "model discovery complete");
    Ok(names)
}
