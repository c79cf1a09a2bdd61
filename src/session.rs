//! Unit of work: one transaction plus the entities loaded through it.
//!
//! Every public engine operation opens exactly one [`Session`], and finishes
//! it with [`Session::finish`]: commit when the work succeeded, rollback
//! otherwise. Entities are plain owned values; nothing loaded through a
//! session outlives it.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::ast::*;
use crate::error::{QueryError, QueryResult};
use crate::query::Comparison;
use crate::schema::{ID, Model, RelationKind, Registry, Relationship};
use crate::transpiler::{Dialect, Statement, ToSql};

/// Boxed future for recursive async walks over the object graph.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Alias of the primary row in every generated select.
pub const ROOT: &str = "t0";

/// One row of a model.
#[derive(Debug, Clone)]
pub struct Entity {
    model: Arc<Model>,
    values: BTreeMap<String, Value>,
    /// Expression attributes, as loaded.
    computed: BTreeMap<String, Value>,
    persisted: bool,
    dirty: BTreeSet<String>,
}

impl Entity {
    /// A new, unsaved row with a fresh id and column defaults.
    pub fn new(model: Arc<Model>) -> Self {
        let mut values = BTreeMap::new();
        for column in &model.columns {
            let value = match &column.default {
                Some(default) => column.ty.coerce(default).unwrap_or_else(|_| default.clone()),
                None => Value::Null,
            };
            values.insert(column.name.clone(), value);
        }
        values.insert(ID.to_string(), json!(Uuid::new_v4().to_string()));
        Self {
            model,
            values,
            computed: BTreeMap::new(),
            persisted: false,
            dirty: BTreeSet::new(),
        }
    }

    fn from_row(model: Arc<Model>, row: &AnyRow) -> QueryResult<Self> {
        let mut values = BTreeMap::new();
        for (i, column) in model.columns.iter().enumerate() {
            values.insert(column.name.clone(), column.ty.decode(row, i)?);
        }
        let offset = model.columns.len();
        let mut computed = BTreeMap::new();
        for (i, expr) in model.expressions.iter().enumerate() {
            computed.insert(expr.name.clone(), expr.ty.decode(row, offset + i)?);
        }
        Ok(Self {
            model,
            values,
            computed,
            persisted: true,
            dirty: BTreeSet::new(),
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn id(&self) -> &str {
        self.values.get(ID).and_then(Value::as_str).unwrap_or_default()
    }

    /// Stored value of a column, expression or constant.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .get(name)
            .or_else(|| self.computed.get(name))
            .or_else(|| {
                self.model
                    .constants
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| &c.value)
            })
    }

    /// Like [`get`](Self::get), with `null` for anything unknown.
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Assign a column through its validators and type cast.
    pub fn set(&mut self, name: &str, value: &Value) -> QueryResult<()> {
        let column = self
            .model
            .column(name)
            .ok_or_else(|| QueryError::unknown_field(&self.model.name, name))?;
        for validator in self.model.validators_for(name) {
            validator.validate(&self.model.name, value)?;
        }
        let coerced = column
            .ty
            .coerce(value)
            .map_err(|message| QueryError::Validation {
                model: self.model.name.clone(),
                field: name.to_string(),
                value: value.to_string(),
                message,
            })?;
        self.assign(name, coerced);
        Ok(())
    }

    /// Assign an already canonical column value, skipping validators.
    pub(crate) fn assign(&mut self, name: &str, value: Value) {
        if self.values.get(name) != Some(&value) {
            self.values.insert(name.to_string(), value);
            self.dirty.insert(name.to_string());
        }
    }

    /// Whether assigning `value` to `name` would leave it unchanged.
    pub fn holds(&self, name: &str, value: &Value) -> bool {
        let current = self.value(name);
        match self.model.column(name) {
            Some(column) => column.ty.coerce(value).is_ok_and(|v| v == current),
            None => self.model.relationship(name).is_none() && *value == current,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        !self.persisted || !self.dirty.is_empty()
    }
}

fn bind_all<'q>(stmt: &'q Statement) -> sqlx::query::Query<'q, Any, AnyArguments<'q>> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

/// Select every stored column of `model` (then its expressions) from `alias`.
pub fn entity_select(model: &Model, alias: &str) -> Select {
    let mut select = Select::from_table(&model.table, alias);
    for column in &model.columns {
        select = select.column(Expr::column(alias, &column.name));
    }
    for expr in &model.expressions {
        select = select.labeled(Expr::Raw(expr.render(alias)), &expr.name);
    }
    select
}

fn equals(alias: &str, column: &str, value: SqlValue) -> Predicate {
    Predicate::Compare {
        left: Expr::column(alias, column),
        op: Comparison::Eq,
        right: Operand::Value(value),
    }
}

/// A transaction bound to the model registry.
pub struct Session {
    tx: Transaction<'static, Any>,
    registry: Arc<Registry>,
    dialect: Dialect,
}

impl Session {
    pub async fn begin(
        pool: &AnyPool,
        registry: Arc<Registry>,
        dialect: Dialect,
    ) -> QueryResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            tx,
            registry,
            dialect,
        })
    }

    /// Commit on success, roll back on failure, and hand the result back.
    pub async fn finish<T>(self, result: QueryResult<T>) -> QueryResult<T> {
        match result {
            Ok(value) => {
                self.tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.tx.rollback().await {
                    debug!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn resolve(&self, name: &str) -> QueryResult<Arc<Model>> {
        self.registry.resolve(name)
    }

    pub async fn fetch_all(&mut self, query: &impl ToSql) -> QueryResult<Vec<AnyRow>> {
        let stmt = query.to_sql(self.dialect);
        debug!(sql = %stmt.sql, params = stmt.params.len(), "fetch");
        Ok(bind_all(&stmt).fetch_all(&mut *self.tx).await?)
    }

    pub async fn execute(&mut self, query: &impl ToSql) -> QueryResult<u64> {
        let stmt = query.to_sql(self.dialect);
        debug!(sql = %stmt.sql, params = stmt.params.len(), "execute");
        let done = bind_all(&stmt).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    /// Run a select whose first column is a count.
    pub async fn scalar_count(&mut self, select: &Select) -> QueryResult<i64> {
        let rows = self.fetch_all(select).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    /// Number of rows `select` would return.
    pub async fn count(&mut self, select: Select) -> QueryResult<i64> {
        let mut inner = select;
        inner.columns.clear();
        inner = inner.column(Expr::One);
        inner.order_by.clear();
        let outer = Select::from_query(Query::Select(inner), "c").column(Expr::CountAll);
        self.scalar_count(&outer).await
    }

    /// Load the entities matched by `select`; its projection is replaced.
    pub async fn load(&mut self, model: &Arc<Model>, select: Select) -> QueryResult<Vec<Entity>> {
        let mut full = entity_select(model, ROOT);
        full.from = select.from;
        full.filter = select.filter;
        full.order_by = select.order_by;
        full.limit = select.limit;
        full.offset = select.offset;
        let rows = self.fetch_all(&full).await?;
        rows.iter()
            .map(|row| Entity::from_row(model.clone(), row))
            .collect()
    }

    pub async fn get(&mut self, model: &Arc<Model>, id: &str) -> QueryResult<Option<Entity>> {
        let select = Select::from_table(&model.table, ROOT)
            .and_where(Some(equals(ROOT, ID, SqlValue::Text(id.to_string()))));
        Ok(self.load(model, select).await?.into_iter().next())
    }

    pub async fn get_many(&mut self, model: &Arc<Model>, ids: &[String]) -> QueryResult<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let select = Select::from_table(&model.table, ROOT).and_where(Some(Predicate::Compare {
            left: Expr::column(ROOT, ID),
            op: Comparison::In,
            right: Operand::List(ids.iter().map(|id| SqlValue::Text(id.clone())).collect()),
        }));
        self.load(model, select).await
    }

    /// Rows whose columns equal every `(column, value)` pair.
    pub async fn find_by(
        &mut self,
        model: &Arc<Model>,
        key: &[(String, Value)],
    ) -> QueryResult<Vec<Entity>> {
        let mut preds = Vec::with_capacity(key.len());
        for (name, value) in key {
            let column = model
                .column(name)
                .ok_or_else(|| QueryError::unknown_field(&model.name, name))?;
            preds.push(equals(ROOT, name, column.ty.compare_value(value)));
        }
        let select = Select::from_table(&model.table, ROOT).and_where(Some(Predicate::all(preds)));
        self.load(model, select).await
    }

    /// Write pending changes of `entity`.
    pub async fn flush(&mut self, entity: &mut Entity) -> QueryResult<()> {
        let model = entity.model.clone();
        if !entity.persisted {
            let insert = Insert {
                table: model.table.clone(),
                values: model
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.ty.bind(&entity.value(&c.name))))
                    .collect(),
            };
            self.execute(&insert).await?;
            debug!(model = %model.name, id = %entity.id(), "inserted");
        } else if !entity.dirty.is_empty() {
            let update = Update {
                table: model.table.clone(),
                assignments: entity
                    .dirty
                    .iter()
                    .filter_map(|name| model.column(name))
                    .map(|c| (c.name.clone(), c.ty.bind(&entity.value(&c.name))))
                    .collect(),
                key: vec![(ID.to_string(), SqlValue::Text(entity.id().to_string()))],
            };
            self.execute(&update).await?;
            debug!(model = %model.name, id = %entity.id(), "updated");
        }
        entity.persisted = true;
        entity.dirty.clear();
        Ok(())
    }

    /// Delete `entity`, applying relationship rules first: cascading
    /// children are deleted, other children are detached, association rows
    /// are dropped.
    pub fn delete<'a>(&'a mut self, entity: &'a Entity) -> BoxFuture<'a, QueryResult<()>> {
        Box::pin(async move {
            let model = entity.model.clone();
            for rel in &model.relationships {
                match &rel.kind {
                    RelationKind::OneToMany { remote_fk } | RelationKind::OneToOne { remote_fk } => {
                        let children = self.related(entity, rel).await?;
                        for mut child in children {
                            if rel.cascade {
                                self.delete(&child).await?;
                            } else {
                                child.assign(remote_fk, Value::Null);
                                self.flush(&mut child).await?;
                            }
                        }
                    }
                    RelationKind::ManyToMany {
                        table, local_key, ..
                    } => {
                        let unlink = Delete {
                            table: table.clone(),
                            key: vec![(local_key.clone(), SqlValue::Text(entity.id().to_string()))],
                        };
                        self.execute(&unlink).await?;
                    }
                    RelationKind::ManyToOne { .. } => {}
                }
            }
            if entity.persisted {
                let delete = Delete {
                    table: model.table.clone(),
                    key: vec![(ID.to_string(), SqlValue::Text(entity.id().to_string()))],
                };
                self.execute(&delete).await?;
            }
            debug!(model = %model.name, id = %entity.id(), "deleted");
            Ok(())
        })
    }

    /// Entities currently reachable from `entity` through `rel`.
    pub async fn related(&mut self, entity: &Entity, rel: &Relationship) -> QueryResult<Vec<Entity>> {
        let target = self.resolve(&rel.target)?;
        let owner = SqlValue::Text(entity.id().to_string());
        let filter = match &rel.kind {
            RelationKind::ManyToOne { local_fk } => match entity.value(local_fk) {
                Value::String(id) => equals(ROOT, ID, SqlValue::Text(id)),
                _ => return Ok(Vec::new()),
            },
            RelationKind::OneToMany { remote_fk } | RelationKind::OneToOne { remote_fk } => {
                equals(ROOT, remote_fk, owner)
            }
            RelationKind::ManyToMany {
                table,
                local_key,
                remote_key,
            } => {
                let links = Select::from_table(table, "a0")
                    .column(Expr::column("a0", remote_key))
                    .and_where(Some(equals("a0", local_key, owner)));
                Predicate::Compare {
                    left: Expr::column(ROOT, ID),
                    op: Comparison::In,
                    right: Operand::Select(Box::new(links)),
                }
            }
        };
        let select = Select::from_table(&target.table, ROOT).and_where(Some(filter));
        self.load(&target, select).await
    }

    /// Add an association row for a many-to-many relationship.
    pub async fn link(&mut self, rel: &Relationship, owner: &str, member: &str) -> QueryResult<()> {
        if let RelationKind::ManyToMany {
            table,
            local_key,
            remote_key,
        } = &rel.kind
        {
            let insert = Insert {
                table: table.clone(),
                values: vec![
                    (local_key.clone(), SqlValue::Text(owner.to_string())),
                    (remote_key.clone(), SqlValue::Text(member.to_string())),
                ],
            };
            self.execute(&insert).await?;
        }
        Ok(())
    }

    /// Remove the association row between `owner` and `member`.
    pub async fn unlink(&mut self, rel: &Relationship, owner: &str, member: &str) -> QueryResult<()> {
        if let RelationKind::ManyToMany {
            table,
            local_key,
            remote_key,
        } = &rel.kind
        {
            let delete = Delete {
                table: table.clone(),
                key: vec![
                    (local_key.clone(), SqlValue::Text(owner.to_string())),
                    (remote_key.clone(), SqlValue::Text(member.to_string())),
                ],
            };
            self.execute(&delete).await?;
        }
        Ok(())
    }
}
