//! Crud permission policies.
//!
//! A model opts into the crud surface with a [`Crudable`] policy. The policy
//! is expanded once, when the model is registered, into a [`CrudPerms`] set
//! and a per-attribute [`Descriptor`] table; request-time checks only look
//! names up in those.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::{Attribute, ID, Model};
use crate::error::{QueryError, QueryResult};
use crate::session::Entity;

const NEVER_READ: &[&str] = &["metadata"];
const NEVER_UPDATE: &[&str] = &[ID];
const ALWAYS_CREATE: &[&str] = &[ID];

/// Declarative crud policy of a model.
///
/// `read`/`update`/`create` widen the defaults; the `no_*` lists take
/// precedence over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Crudable {
    pub can_create: bool,
    pub create: Option<Vec<String>>,
    pub no_create: Option<Vec<String>>,
    pub read: Option<Vec<String>>,
    pub no_read: Option<Vec<String>>,
    pub update: Option<Vec<String>>,
    pub no_update: Option<Vec<String>>,
    pub can_delete: bool,
    /// Manual field descriptors merged into the crud spec.
    pub data_spec: Map<String, Value>,
}

impl Default for Crudable {
    fn default() -> Self {
        Self {
            can_create: true,
            create: None,
            no_create: None,
            read: None,
            no_read: None,
            update: None,
            no_update: None,
            can_delete: true,
            data_spec: Map::new(),
        }
    }
}

fn names<I, S>(items: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Some(items.into_iter().map(Into::into).collect())
}

fn non_empty(list: &Option<Vec<String>>) -> Option<&Vec<String>> {
    list.as_ref().filter(|l| !l.is_empty())
}

impl Crudable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_create(mut self, allowed: bool) -> Self {
        self.can_create = allowed;
        self
    }

    pub fn can_delete(mut self, allowed: bool) -> Self {
        self.can_delete = allowed;
        self
    }

    pub fn create<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.create = names(items);
        self
    }

    pub fn no_create<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.no_create = names(items);
        self
    }

    pub fn read<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.read = names(items);
        self
    }

    pub fn no_read<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.no_read = names(items);
        self
    }

    pub fn update<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.update = names(items);
        self
    }

    pub fn no_update<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.no_update = names(items);
        self
    }

    pub fn data_spec(mut self, spec: Map<String, Value>) -> Self {
        self.data_spec = spec;
        self
    }

    /// Expand the policy against the model's declared attributes.
    pub fn derive(&self, model: &Model) -> CrudPerms {
        // Naming no_update without create makes those names create-only.
        let create_given = match (&self.no_update, &self.create) {
            (Some(no_update), None) => Some(no_update.clone()),
            (_, create) => create.clone(),
        };

        let read: Vec<String> = self.read.clone().unwrap_or_default();
        let mut no_read: Vec<String> = self.no_read.clone().unwrap_or_default();
        let update: Vec<String> = self.update.clone().unwrap_or_default();
        let create: Vec<String> = create_given.filter(|c| !c.is_empty()).unwrap_or_default();

        let mut no_update: Vec<String> = match non_empty(&self.no_update) {
            Some(list) => list.clone(),
            None => no_read.iter().filter(|n| !update.contains(n)).cloned().collect(),
        };
        let mut no_create: Vec<String> = match non_empty(&self.no_create) {
            Some(list) => list.clone(),
            None => no_update.iter().filter(|n| !create.contains(n)).cloned().collect(),
        };

        no_read.extend(NEVER_READ.iter().map(|s| s.to_string()));
        no_update.extend(NEVER_UPDATE.iter().map(|s| s.to_string()));

        let public = model
            .attribute_names()
            .into_iter()
            .filter(|n| !n.starts_with('_'))
            .map(str::to_string);
        let read_set: BTreeSet<String> = read
            .into_iter()
            .chain(public)
            .filter(|n| !no_read.contains(n))
            .collect();

        let update_set: BTreeSet<String> = update
            .into_iter()
            .chain(read_set.iter().cloned())
            .filter(|n| !no_update.contains(n))
            .filter(|n| match model.attribute(n) {
                Some(Attribute::Column(_)) => true,
                Some(Attribute::Relation(rel)) => !rel.viewonly,
                _ => false,
            })
            .collect();

        no_create.retain(|n| !ALWAYS_CREATE.contains(&n.as_str()));
        let create_set: BTreeSet<String> = create
            .into_iter()
            .chain(update_set.iter().cloned())
            .chain(ALWAYS_CREATE.iter().map(|s| s.to_string()))
            .filter(|n| !no_create.contains(n))
            .collect();

        CrudPerms {
            can_create: self.can_create,
            can_delete: self.can_delete,
            read: read_set,
            update: update_set,
            create: create_set,
        }
    }
}

/// Expanded permission sets of a model.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CrudPerms {
    pub can_create: bool,
    pub can_delete: bool,
    pub read: BTreeSet<String>,
    pub update: BTreeSet<String>,
    pub create: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Column,
    Relation,
    Expression,
    Computed,
    Constant,
}

/// One row of the per-model descriptor table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub kind: AttributeKind,
    pub readable: bool,
    pub updatable: bool,
    pub creatable: bool,
    pub type_tag: &'static str,
    /// Related model name, for relationships.
    pub target: Option<String>,
}

impl Descriptor {
    pub(crate) fn build(model: &Model, name: &str, attr: Attribute<'_>) -> Self {
        let perms = model.perms();
        let readable = match perms {
            Some(p) => p.read.contains(name) || model.extra_defaults.iter().any(|e| e == name),
            None => !name.starts_with('_'),
        };
        let type_tag = match attr {
            Attribute::Column(c) => c.ty.spec_tag(),
            Attribute::Expression(e) => e.ty.spec_tag(),
            Attribute::Constant(c) => c.type_tag(),
            Attribute::Relation(_) | Attribute::Computed(_) => "auto",
        };
        Self {
            kind: attr.kind(),
            readable,
            updatable: perms.is_some_and(|p| p.update.contains(name)),
            creatable: perms.is_some_and(|p| p.can_create && p.create.contains(name)),
            type_tag,
            target: match attr {
                Attribute::Relation(r) => Some(r.target.clone()),
                _ => None,
            },
        }
    }
}

/// Field-level check applied while writing an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCheck {
    Create,
    Update,
}

/// Whether `name` may be read from `model`.
///
/// Fails outright for a policy that grants nothing to read.
pub fn read_allowed(model: &Model, name: &str) -> QueryResult<bool> {
    match model.perms() {
        Some(p) if p.read.is_empty() => Err(QueryError::denied(format!(
            "Attempt to read non-readable model {}",
            model.name
        ))),
        _ if model.extra_defaults.iter().any(|e| e == name) => Ok(true),
        None => Ok(!name.starts_with('_')),
        Some(p) => Ok(p.read.contains(name)),
    }
}

impl WriteCheck {
    /// Whether `name = value` may be applied to `entity`.
    ///
    /// Create silently skips names outside the create set; update fails for
    /// them unless the value is unchanged.
    pub fn allows(&self, entity: &Entity, name: &str, value: &Value) -> QueryResult<bool> {
        let model = entity.model();
        match self {
            WriteCheck::Create => match model.perms() {
                Some(p) if p.can_create => Ok(p.create.contains(name)),
                _ => Err(QueryError::denied(format!(
                    "Attempt to create non-createable model {}",
                    model.name
                ))),
            },
            WriteCheck::Update => {
                if entity.holds(name, value) {
                    return Ok(true);
                }
                match model.perms() {
                    Some(p) if !p.update.is_empty() => {
                        if p.update.contains(name) {
                            Ok(true)
                        } else {
                            Err(QueryError::denied(format!(
                                "Attempt to update non-updateable attribute {}.{}",
                                model.name, name
                            )))
                        }
                    }
                    _ => Err(QueryError::denied(format!(
                        "Attempt to update non-updateable model {}",
                        model.name
                    ))),
                }
            }
        }
    }

    /// The check for a nested row: update if it already exists, create otherwise.
    pub fn for_entity(entity: &Entity) -> Self {
        if entity.is_persisted() {
            WriteCheck::Update
        } else {
            WriteCheck::Create
        }
    }
}
