//! Object graph serializer: entities to and from nested JSON.
//!
//! Reading follows a data spec through relationships. Writing applies a data
//! mapping field by field behind a [`WriteCheck`], then merges relationship
//! values: nested mappings are created or fetched and written recursively,
//! stale collection members are detached or deleted.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::{QueryError, QueryResult};
use crate::query::{DataSpec, mappify, truthy};
use crate::schema::{
    Attribute, FieldType, ID, Model, RelationKind, Relationship, WriteCheck, read_allowed,
};
use crate::session::{BoxFuture, Entity, Session};

/// Serialize `entity` according to `spec`.
///
/// Without a spec every readable column, expression and constant is emitted.
/// With one, `_model` and `id` are emitted unless the data spec sets them falsy,
/// followed by the model's extra defaults and every spec key that is
/// readable and not set falsy.
pub fn read<'a>(
    session: &'a mut Session,
    entity: &'a Entity,
    spec: Option<&'a DataSpec>,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(async move {
        let model = entity.model().clone();
        let mut out = Map::new();

        let Some(spec) = spec else {
            out.insert("_model".into(), json!(model.name));
            out.insert(ID.into(), json!(entity.id()));
            for name in model.default_read_names() {
                if read_allowed(&model, name)? {
                    out.insert(name.to_string(), entity.value(name));
                }
            }
            return Ok(Value::Object(out));
        };

        if spec.get("_model").is_none_or(truthy) {
            out.insert("_model".into(), json!(model.name));
        }
        if spec.get(ID).is_none_or(truthy) {
            out.insert(ID.into(), json!(entity.id()));
        }

        let names: Vec<&String> = model.extra_defaults.iter().chain(spec.keys()).collect();
        for name in names {
            if !read_allowed(&model, name)? || spec.get(name).is_some_and(|v| !truthy(v)) {
                continue;
            }
            let value = match model.attribute(name) {
                Some(Attribute::Relation(rel)) => {
                    let sub = match spec.get(name) {
                        None | Some(Value::Bool(_)) => None,
                        Some(v) => mappify(v)?,
                    };
                    let related = session.related(entity, rel).await?;
                    let mut items = Vec::with_capacity(related.len());
                    for member in &related {
                        items.push(read(session, member, sub.as_ref()).await?);
                    }
                    if rel.is_collection() {
                        Value::Array(items)
                    } else {
                        items.into_iter().next().unwrap_or(Value::Null)
                    }
                }
                Some(Attribute::Computed(computed)) => computed.call(entity),
                _ => entity.value(name),
            };
            out.insert(name.clone(), value);
        }
        Ok(Value::Object(out))
    })
}

/// Required many-to-one relationships merge before everything else.
fn merges_late(model: &Model, rel: &Relationship) -> bool {
    match rel.local_fk().and_then(|fk| model.column(fk)) {
        Some(column) => column.nullable,
        None => true,
    }
}

/// Apply `attrs` to `entity`. Keys starting with `_` are ignored; every
/// other key must pass `check`.
pub fn write<'a>(
    session: &'a mut Session,
    entity: &'a mut Entity,
    attrs: DataSpec,
    check: WriteCheck,
) -> BoxFuture<'a, QueryResult<()>> {
    Box::pin(async move {
        let model = entity.model().clone();
        let mut relations: Vec<(&Relationship, Value)> = Vec::new();
        for (name, value) in attrs {
            if name.starts_with('_') || !check.allows(entity, &name, &value)? {
                continue;
            }
            match model.attribute(&name) {
                Some(Attribute::Column(_)) => entity.set(&name, &value)?,
                Some(Attribute::Relation(rel)) => relations.push((rel, value)),
                Some(_) => debug!(model = %model.name, field = %name, "skipping read-only attribute"),
                None => return Err(QueryError::unknown_field(&model.name, name)),
            }
        }

        relations.sort_by_key(|(rel, _)| merges_late(&model, rel));
        for (rel, value) in relations {
            merge_relation(session, entity, rel, value, check).await?;
        }
        Ok(())
    })
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn unsupported(rel: &Relationship, value: &Value) -> QueryError {
    QueryError::UnsupportedRelationValue {
        relation: rel.name.clone(),
        kind: kind_name(value),
        value: value.to_string(),
    }
}

/// Put the owner's id under `fk` unless the mapping already holds one.
fn inject_backref(value: &mut Value, fk: Option<&str>, owner: &str) {
    if let (Value::Object(map), Some(fk)) = (value, fk) {
        if !map.get(fk).is_some_and(truthy) {
            map.insert(fk.to_string(), json!(owner));
        }
    }
}

fn merge_relation<'a>(
    session: &'a mut Session,
    owner: &'a mut Entity,
    rel: &'a Relationship,
    value: Value,
    check: WriteCheck,
) -> BoxFuture<'a, QueryResult<()>> {
    Box::pin(async move {
        if rel.is_collection() {
            merge_collection(session, owner, rel, value).await
        } else {
            merge_scalar(session, owner, rel, value, check).await
        }
    })
}

async fn merge_collection(
    session: &mut Session,
    owner: &mut Entity,
    rel: &Relationship,
    value: Value,
) -> QueryResult<()> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::String(_) | Value::Object(_) => vec![value],
        Value::Array(items) => items,
        other => return Err(unsupported(rel, &other)),
    };
    let target = session.resolve(&rel.target)?;
    let owner_id = owner.id().to_string();
    let fk = rel.backref_fk();

    let mut members: Vec<String> = Vec::with_capacity(items.len());
    for mut item in items {
        inject_backref(&mut item, fk, &owner_id);
        let mut member =
            create_or_fetch(session, &target, &item, fk.map(|fk| (fk, owner_id.as_str()))).await?;
        if let Value::Object(attrs) = item {
            let check = WriteCheck::for_entity(&member);
            write(session, &mut member, attrs, check).await?;
        }
        if let Some(fk) = fk {
            member.assign(fk, json!(owner_id));
        }
        session.flush(&mut member).await?;
        if !members.iter().any(|id| id == member.id()) {
            members.push(member.id().to_string());
        }
    }

    let current = if owner.is_persisted() {
        session.related(owner, rel).await?
    } else {
        Vec::new()
    };
    for mut stale in current.iter().filter(|e| !members.iter().any(|id| id == e.id())).cloned() {
        debug!(relation = %rel.name, id = %stale.id(), "removing stale member");
        match &rel.kind {
            RelationKind::ManyToMany { .. } => {
                session.unlink(rel, &owner_id, stale.id()).await?;
                if rel.cascade {
                    session.delete(&stale).await?;
                }
            }
            _ if rel.cascade => session.delete(&stale).await?,
            _ => {
                if let Some(fk) = fk {
                    stale.assign(fk, Value::Null);
                    session.flush(&mut stale).await?;
                }
            }
        }
    }

    if matches!(rel.kind, RelationKind::ManyToMany { .. }) {
        let linked: BTreeSet<&str> = current.iter().map(Entity::id).collect();
        for id in members.iter().filter(|id| !linked.contains(id.as_str())) {
            session.link(rel, &owner_id, id).await?;
        }
    }
    Ok(())
}

async fn merge_scalar(
    session: &mut Session,
    owner: &mut Entity,
    rel: &Relationship,
    value: Value,
    check: WriteCheck,
) -> QueryResult<()> {
    let target = session.resolve(&rel.target)?;
    let owner_id = owner.id().to_string();
    let stale = if owner.is_persisted() || rel.local_fk().is_some() {
        session.related(owner, rel).await?.into_iter().next()
    } else {
        None
    };

    if value.is_null() {
        if let Some(fk) = rel.local_fk() {
            owner.assign(fk, Value::Null);
        }
        if let Some(mut stale) = stale {
            detach(session, rel, &mut stale).await?;
        }
        return Ok(());
    }
    if !(value.is_object() || value.is_string()) {
        return Err(unsupported(rel, &value));
    }

    let mut value = value;
    let fk = rel.backref_fk();
    inject_backref(&mut value, fk, &owner_id);
    let mut member =
        create_or_fetch(session, &target, &value, fk.map(|fk| (fk, owner_id.as_str()))).await?;
    if let Some(mut stale) = stale.filter(|s| s.id() != member.id()) {
        detach(session, rel, &mut stale).await?;
    }
    if let Value::Object(attrs) = value {
        write(session, &mut member, attrs, check).await?;
    }
    match &rel.kind {
        RelationKind::ManyToOne { local_fk } => {
            session.flush(&mut member).await?;
            owner.assign(local_fk, json!(member.id()));
        }
        RelationKind::OneToOne { remote_fk } => {
            member.assign(remote_fk, json!(owner_id));
            session.flush(&mut member).await?;
        }
        _ => session.flush(&mut member).await?,
    }
    Ok(())
}

/// Release a previous scalar target: delete it under cascade, otherwise
/// clear its back reference.
async fn detach(session: &mut Session, rel: &Relationship, stale: &mut Entity) -> QueryResult<()> {
    if rel.cascade {
        return session.delete(stale).await;
    }
    if let RelationKind::OneToOne { remote_fk } = &rel.kind {
        stale.assign(remote_fk, Value::Null);
        session.flush(stale).await?;
    }
    Ok(())
}

/// Fetch the row `value` names, by id or by a unique constraint, or make a
/// new one.
///
/// `backref` is the `(column, parent id)` the row is expected to hold; a
/// unique-constraint match owned by another parent is not adopted.
pub async fn create_or_fetch(
    session: &mut Session,
    model: &Arc<Model>,
    value: &Value,
    backref: Option<(&str, &str)>,
) -> QueryResult<Entity> {
    let id = match value {
        Value::Object(map) => map.get(ID).filter(|v| !v.is_null()),
        Value::String(_) => Some(value),
        _ => None,
    };

    if let Some(id) = id {
        let invalid = || QueryError::InvalidReferenceId {
            model: model.name.clone(),
            value: value.to_string(),
        };
        let id = FieldType::Uuid.coerce(id).map_err(|_| invalid())?;
        let id = id.as_str().ok_or_else(invalid)?;
        return session.get(model, id).await?.ok_or_else(invalid);
    }

    let mut found = None;
    if let Value::Object(map) = value {
        for columns in model.unique_constraints() {
            if !columns.iter().all(|c| map.get(c).is_some_and(truthy)) {
                debug!(model = %model.name, ?columns, "unique constraint not fully given");
                continue;
            }
            let key: Vec<(String, Value)> =
                columns.iter().map(|c| (c.clone(), map[c].clone())).collect();
            let mut matches = session.find_by(model, &key).await?;
            match matches.len() {
                0 => continue,
                1 => {
                    found = matches.pop();
                    break;
                }
                _ => {
                    return Err(QueryError::AmbiguousUniqueMatch {
                        model: model.name.clone(),
                        columns,
                    });
                }
            }
        }
    }

    if let (Some(entity), Some((column, parent))) = (&found, backref) {
        if entity.value(column) != json!(parent) {
            warn!(
                model = %model.name,
                id = %entity.id(),
                "changing the owner without an explicit id; a new instance will be used instead"
            );
            found = None;
        }
    }

    match found {
        Some(entity) => Ok(entity),
        None => {
            let entity = Entity::new(model.clone());
            debug!(model = %model.name, id = %entity.id(), "creating new instance");
            Ok(entity)
        }
    }
}
