//! Process-wide model registry.

use super::column::ColumnDef;
use super::model::ModelDef;
use super::relation::RelationDef;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// The registry maps model names to their definitions.
///
/// Column and relation declarations may arrive before the model itself is
/// registered; they are buffered per model name and merged when
/// [`Registry::register_model`] runs.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    models: BTreeMap<String, ModelDef>,
    pending_columns: HashMap<String, Vec<ColumnDef>>,
    pending_relations: HashMap<String, Vec<RelationDef>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under `name` backed by `table_name`.
    ///
    /// Buffered columns and relations are merged and the buffers cleared.
    /// Re-registering a name overwrites its table name and keeps everything
    /// merged so far.
    pub fn register_model(
        &self,
        name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<ModelDef> {
        let name = name.into();
        let table_name = table_name.into();
        let mut state = self.state.write();

        if let Some(owner) = state
            .models
            .values()
            .find(|m| m.table_name == table_name && m.name != name)
        {
            return Err(Error::InvalidDefinition(format!(
                "table {} is already used by model {}",
                table_name, owner.name
            )));
        }

        let columns = state.pending_columns.remove(&name).unwrap_or_default();
        let relations = state.pending_relations.remove(&name).unwrap_or_default();

        let model = state
            .models
            .entry(name.clone())
            .or_insert_with(|| ModelDef::new(name.clone(), table_name.clone()));
        model.table_name = table_name;
        for column in columns {
            model.set_column(column);
        }
        for relation in relations {
            model.set_relation(relation);
        }

        tracing::debug!(model = %model.name, table = %model.table_name, "registered model");
        Ok(model.clone())
    }

    /// Declare a column on a model, registered or not yet.
    pub fn set_column(&self, model: &str, column: ColumnDef) {
        let mut state = self.state.write();
        match state.models.get_mut(model) {
            Some(def) => def.set_column(column),
            None => upsert_pending(
                state.pending_columns.entry(model.to_string()).or_default(),
                column,
                |c| &c.name,
            ),
        }
    }

    /// Declare a relation on a model, registered or not yet.
    ///
    /// Fails with `InvalidDefinition` for a many-to-many relation without a
    /// join table.
    pub fn set_relation(&self, model: &str, relation: RelationDef) -> Result<()> {
        relation.validate()?;
        let mut state = self.state.write();
        match state.models.get_mut(model) {
            Some(def) => def.set_relation(relation),
            None => upsert_pending(
                state.pending_relations.entry(model.to_string()).or_default(),
                relation,
                |r| &r.name,
            ),
        }
        Ok(())
    }

    /// Register a fully built definition in one step.
    pub fn define(&self, def: ModelDef) -> Result<ModelDef> {
        for relation in &def.relations {
            relation.validate()?;
        }
        let ModelDef {
            name,
            table_name,
            columns,
            relations,
        } = def;

        self.register_model(name.clone(), table_name)?;
        for column in columns {
            self.set_column(&name, column);
        }
        for relation in relations {
            self.set_relation(&name, relation)?;
        }
        self.get_model_definition(&name)
    }

    /// Get a model definition by name.
    pub fn get_model_definition(&self, name: &str) -> Result<ModelDef> {
        self.state
            .read()
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_registered(name))
    }

    /// Snapshot of every registered model keyed by name.
    pub fn get_all_models(&self) -> BTreeMap<String, ModelDef> {
        self.state.read().models.clone()
    }

    /// Find the model backed by a table.
    pub fn model_for_table(&self, table_name: &str) -> Option<ModelDef> {
        self.state
            .read()
            .models
            .values()
            .find(|m| m.table_name == table_name)
            .cloned()
    }

    /// Check if a model is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.state.read().models.contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.state.read().models.keys().cloned().collect()
    }

    /// Model names with declarations still waiting for registration.
    pub fn pending_models(&self) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .pending_columns
            .keys()
            .chain(state.pending_relations.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn upsert_pending<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> &String) {
    match items.iter_mut().find(|existing| key(existing) == key(&item)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}
