//! Record instances: data bag, persistence and relation management.

use super::hooks::HookPoint;
use super::orm::{atomically, Model};
use crate::catalog::{RelationDef, RelationKind};
use crate::connection::count_from;
use crate::error::{Error, Result};
use crate::query::{builder, Conditions, JoinTable, QueryOptions};
use crate::value::{Row, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Data loaded through a relation and cached on a record.
#[derive(Debug, Clone)]
pub enum Related {
    /// `hasOne` or `belongsTo`.
    One(Option<Box<Record>>),
    /// `hasMany` or `belongsToMany`.
    Many(Vec<Record>),
}

impl Related {
    /// The single related record, if this is a to-one relation that found one.
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => record.as_deref(),
            Related::Many(_) => None,
        }
    }

    /// The related records; a to-one relation yields zero or one.
    pub fn records(&self) -> Vec<&Record> {
        match self {
            Related::One(record) => record.as_deref().into_iter().collect(),
            Related::Many(records) => records.iter().collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Related::One(Some(record)) => record.to_json(),
            Related::One(None) => serde_json::Value::Null,
            Related::Many(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
        }
    }
}

/// One row of a model.
///
/// The data bag only holds declared columns plus the implicit `id`,
/// `created_at` and `updated_at`. Timestamps are read-only: they are hydrated
/// from the database but never written.
#[derive(Debug, Clone)]
pub struct Record {
    model: Model,
    data: Row,
    relations: BTreeMap<String, Related>,
    deleted: bool,
}

/// Owned join table columns for one many-to-many relation.
struct JoinSpec {
    table: String,
    owner_column: String,
    related_column: String,
}

impl JoinSpec {
    fn as_join(&self) -> JoinTable<'_> {
        JoinTable {
            table: &self.table,
            owner_column: &self.owner_column,
            related_column: &self.related_column,
        }
    }
}

fn is_timestamp(key: &str) -> bool {
    key == "created_at" || key == "updated_at"
}

impl Record {
    pub(crate) fn empty(model: Model) -> Self {
        Self {
            model,
            data: Row::new(),
            relations: BTreeMap::new(),
            deleted: false,
        }
    }

    pub(crate) fn hydrated(model: Model, row: Row) -> Self {
        let mut record = Self::empty(model);
        for (key, value) in row.iter() {
            if record.model.def.has_column(key) {
                record.data.push(key, value.clone());
            }
        }
        record
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The record's identity, once assigned.
    pub fn id(&self) -> Option<Uuid> {
        self.data.get("id").and_then(Value::as_uuid)
    }

    fn id_value(&self) -> Option<Value> {
        self.data.get("id").filter(|v| !v.is_null()).cloned()
    }

    /// Whether [`Record::delete`] has removed this record's row.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn require_live(&self) -> Result<()> {
        if self.deleted {
            return Err(Error::InvalidState(format!(
                "{} record was deleted",
                self.model.name()
            )));
        }
        Ok(())
    }

    fn require_id(&self) -> Result<Value> {
        self.id_value().ok_or_else(|| {
            Error::InvalidState(format!("{} record has no id", self.model.name()))
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set a declared column or the id.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        if is_timestamp(key) {
            return Err(Error::InvalidState(format!("{} is read-only", key)));
        }
        self.model.check_column(key)?;
        let value = self.model.coerce(key, value.into());
        self.data.push(key, value);
        Ok(())
    }

    /// Set every known key of `data`; unknown and read-only keys are ignored.
    pub fn fill(&mut self, data: Row) -> &mut Self {
        for (key, value) in data.iter() {
            if !is_timestamp(key) && self.model.def.has_column(key) {
                let value = self.model.coerce(key, value.clone());
                self.data.push(key, value);
            }
        }
        self
    }

    /// Set every known key of a JSON object.
    pub fn fill_json(&mut self, data: &serde_json::Value) -> &mut Self {
        if let Some(object) = data.as_object() {
            let row: Row = object
                .iter()
                .map(|(key, value)| (key.clone(), json_scalar(value)))
                .collect();
            self.fill(row);
        }
        self
    }

    /// Column values currently held.
    pub fn data(&self) -> &Row {
        &self.data
    }

    /// Data loaded under a relation's property key.
    pub fn related(&self, property_key: &str) -> Option<&Related> {
        self.relations.get(property_key)
    }

    /// Columns and loaded relations as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (key, value) in self.data.iter() {
            object.insert(key.to_string(), value.to_json());
        }
        for (key, related) in &self.relations {
            object.insert(key.clone(), related.to_json());
        }
        serde_json::Value::Object(object)
    }

    /// Run the model's validation rules against the data bag.
    pub fn validate(&self) -> Result<()> {
        self.model
            .orm
            .validators()
            .validate(self.model.name(), |field| self.data.get(field))
            .map_err(Error::Validation)
    }

    /// Validate, then insert when there is no id or update otherwise.
    pub async fn save(&mut self) -> Result<()> {
        self.require_live()?;
        self.validate()?;
        if self.id_value().is_some() {
            self.update().await
        } else {
            self.insert().await
        }
    }

    /// Insert this record, generating an id when absent.
    ///
    /// Every declared column is written; a column left unset is written as
    /// `NULL` unless it declares a default, in which case it is omitted.
    pub async fn insert(&mut self) -> Result<()> {
        self.require_live()?;
        let orm = self.model.orm.clone();
        let name = self.model.name().to_string();

        orm.hooks().run(&name, HookPoint::BeforeCreate, self).await?;

        let conn = orm.connection()?;
        if self.id_value().is_none() {
            self.data.push("id", Value::Uuid(Uuid::new_v4()));
        }

        let mut values = vec![("id".to_string(), self.require_id()?)];
        for column in self.model.def.data_columns() {
            match self.data.get(&column.name) {
                Some(value) => values.push((column.name.clone(), value.clone())),
                None if column.has_default() => {}
                None => values.push((column.name.clone(), Value::Null)),
            }
        }

        let stmt = builder::insert(self.model.table_name(), &values);
        let rows = conn.fetch_all(&stmt.sql, &stmt.params).await?;
        if let Some(id) = rows.first().and_then(|row| row.get("id")).cloned() {
            self.data.push("id", id);
        }
        tracing::debug!(model = %name, id = ?self.id(), "inserted record");

        orm.hooks().run(&name, HookPoint::AfterCreate, self).await
    }

    /// Write every held column back by id.
    pub async fn update(&mut self) -> Result<()> {
        self.require_live()?;
        let id = self.require_id()?;
        let orm = self.model.orm.clone();
        let name = self.model.name().to_string();

        orm.hooks().run(&name, HookPoint::BeforeUpdate, self).await?;

        let conn = orm.connection()?;
        let values: Vec<(String, Value)> = self
            .model
            .def
            .data_columns()
            .filter_map(|column| {
                self.data
                    .get(&column.name)
                    .map(|value| (column.name.clone(), value.clone()))
            })
            .collect();
        if let Some(stmt) = builder::update_by_id(self.model.table_name(), &values, id) {
            conn.execute(&stmt.sql, &stmt.params).await?;
        }

        orm.hooks().run(&name, HookPoint::AfterUpdate, self).await
    }

    /// Delete this record by id. The record cannot be saved again afterwards.
    pub async fn delete(&mut self) -> Result<()> {
        self.require_live()?;
        let id = self.require_id()?;
        let orm = self.model.orm.clone();
        let name = self.model.name().to_string();

        orm.hooks().run(&name, HookPoint::BeforeDelete, self).await?;

        let stmt = builder::delete_by_id(self.model.table_name(), id);
        orm.connection()?.execute(&stmt.sql, &stmt.params).await?;
        self.deleted = true;

        orm.hooks().run(&name, HookPoint::AfterDelete, self).await
    }

    /// Load a relation and cache it under its property key.
    pub async fn load(&mut self, relation: &str, options: &QueryOptions) -> Result<&Related> {
        let relation = self.model.relation(relation)?.clone();
        let target = self.model.orm.model(&relation.target)?;

        let related = match relation.kind {
            RelationKind::HasOne => {
                let foreign_key = relation.resolved_foreign_key(self.model.name());
                let conditions = Conditions::new().with(foreign_key, self.require_id()?);
                let found = target
                    .fetch_records(&conditions, &options.clone().limit(1))
                    .await?;
                Related::One(found.into_iter().next().map(Box::new))
            }
            RelationKind::HasMany => {
                let foreign_key = relation.resolved_foreign_key(self.model.name());
                let conditions = Conditions::new().with(foreign_key, self.require_id()?);
                Related::Many(target.fetch_records(&conditions, options).await?)
            }
            RelationKind::BelongsTo => {
                let foreign_key = relation.resolved_foreign_key(self.model.name());
                match self.data.get(&foreign_key).filter(|v| !v.is_null()) {
                    Some(id) => {
                        let conditions = Conditions::new().with("id", id.clone());
                        let found = target
                            .fetch_records(&conditions, &options.clone().limit(1))
                            .await?;
                        Related::One(found.into_iter().next().map(Box::new))
                    }
                    None => Related::One(None),
                }
            }
            RelationKind::BelongsToMany => {
                let join = self.join_spec(&relation, target.table_name())?;
                let (_, options) = target.prepare(&Conditions::new(), options)?;
                let stmt = builder::select_through(
                    target.table_name(),
                    join.as_join(),
                    self.require_id()?,
                    &options,
                );
                let rows = self
                    .model
                    .orm
                    .connection()?
                    .fetch_all(&stmt.sql, &stmt.params)
                    .await?;
                Related::Many(rows.into_iter().map(|row| target.hydrate(row)).collect())
            }
        };

        let key = relation.property_key;
        self.relations.insert(key.clone(), related);
        Ok(&self.relations[&key])
    }

    /// Link related ids through the join table; existing links are kept.
    pub async fn attach<I, V>(&self, relation: &str, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let join = self.many_to_many(relation)?;
        let owner_id = self.require_id()?;
        let ids = self.related_ids(ids);
        let conn = self.model.orm.connection()?;

        atomically(conn.as_ref(), async {
            for id in &ids {
                let stmt = builder::attach(join.as_join(), owner_id.clone(), id.clone());
                conn.execute(&stmt.sql, &stmt.params).await?;
            }
            Ok(())
        })
        .await
    }

    /// Unlink the given related ids. An empty list unlinks nothing.
    pub async fn detach<I, V>(&self, relation: &str, ids: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids = self.related_ids(ids);
        self.unlink(relation, Some(ids.as_slice())).await
    }

    /// Unlink every related row of this record.
    pub async fn detach_all(&self, relation: &str) -> Result<u64> {
        self.unlink(relation, None).await
    }

    async fn unlink(&self, relation: &str, ids: Option<&[Value]>) -> Result<u64> {
        let join = self.many_to_many(relation)?;
        let owner_id = self.require_id()?;
        match builder::detach(join.as_join(), owner_id, ids) {
            Some(stmt) => {
                self.model
                    .orm
                    .connection()?
                    .execute(&stmt.sql, &stmt.params)
                    .await
            }
            None => Ok(0),
        }
    }

    /// Replace every link of this record with exactly `ids`.
    pub async fn sync<I, V>(&self, relation: &str, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let join = self.many_to_many(relation)?;
        let owner_id = self.require_id()?;
        let ids = self.related_ids(ids);
        let conn = self.model.orm.connection()?;

        atomically(conn.as_ref(), async {
            if let Some(stmt) = builder::detach(join.as_join(), owner_id.clone(), None) {
                conn.execute(&stmt.sql, &stmt.params).await?;
            }
            for id in &ids {
                let stmt = builder::attach(join.as_join(), owner_id.clone(), id.clone());
                conn.execute(&stmt.sql, &stmt.params).await?;
            }
            Ok(())
        })
        .await
    }

    /// Check whether a link to `id` exists.
    pub async fn is_attached(&self, relation: &str, id: impl Into<Value>) -> Result<bool> {
        let join = self.many_to_many(relation)?;
        let owner_id = self.require_id()?;
        let related_id = self.related_ids([id]).remove(0);
        let stmt = builder::is_attached(join.as_join(), owner_id, related_id);
        let rows = self
            .model
            .orm
            .connection()?
            .fetch_all(&stmt.sql, &stmt.params)
            .await?;
        Ok(count_from(&rows) > 0)
    }

    fn many_to_many(&self, relation: &str) -> Result<JoinSpec> {
        let relation = self.model.relation(relation)?;
        relation.through_table()?;
        let target = self.model.orm.registry().get_model_definition(&relation.target)?;
        self.join_spec(relation, &target.table_name)
    }

    fn join_spec(&self, relation: &RelationDef, related_table: &str) -> Result<JoinSpec> {
        let table = relation.through_table()?.to_string();
        let (owner_column, related_column) =
            relation.join_columns(self.model.table_name(), related_table);
        Ok(JoinSpec {
            table,
            owner_column,
            related_column,
        })
    }

    fn related_ids<I, V>(&self, ids: I) -> Vec<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ids.into_iter()
            .map(|id| self.model.coerce("id", id.into()))
            .collect()
    }
}

fn json_scalar(value: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Json(other.clone()),
    }
}
