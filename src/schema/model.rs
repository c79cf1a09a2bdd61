//! Declared models: columns, relationships and derived attributes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::perms::{CrudPerms, Crudable, Descriptor, AttributeKind};
use super::types::FieldType;
use super::validation::FieldValidator;
use crate::error::{QueryError, QueryResult};
use crate::session::Entity;

/// Primary key column shared by every model.
pub const ID: &str = "id";

/// A persisted column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub desc: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            unique: false,
            default: None,
            desc: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Uuid)
    }

    /// NOT NULL.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }
}

/// Shape of a relationship and the columns that implement it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// `self.local_fk` references `target.id`.
    ManyToOne { local_fk: String },
    /// `target.remote_fk` references `self.id`.
    OneToMany { remote_fk: String },
    /// Like one-to-many but holding at most one row.
    OneToOne { remote_fk: String },
    /// Association `table` with `local_key -> self.id` and `remote_key -> target.id`.
    ManyToMany {
        table: String,
        local_key: String,
        remote_key: String,
    },
}

/// A navigable relationship to another model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub kind: RelationKind,
    /// Delete related rows with their owner, and orphans when unlinked.
    #[serde(default)]
    pub cascade: bool,
    #[serde(default)]
    pub viewonly: bool,
    /// Name of the inverse relationship to declare on the target.
    #[serde(default)]
    pub backref: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
}

impl Relationship {
    fn new(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind,
            cascade: false,
            viewonly: false,
            backref: None,
            desc: None,
        }
    }

    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_fk: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ManyToOne {
                local_fk: local_fk.into(),
            },
        )
    }

    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        remote_fk: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::OneToMany {
                remote_fk: remote_fk.into(),
            },
        )
    }

    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        remote_fk: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::OneToOne {
                remote_fk: remote_fk.into(),
            },
        )
    }

    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ManyToMany {
                table: table.into(),
                local_key: local_key.into(),
                remote_key: remote_key.into(),
            },
        )
    }

    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    pub fn viewonly(mut self) -> Self {
        self.viewonly = true;
        self
    }

    pub fn backref(mut self, name: impl Into<String>) -> Self {
        self.backref = Some(name.into());
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// One-to-many and many-to-many hold lists.
    pub fn is_collection(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::OneToMany { .. } | RelationKind::ManyToMany { .. }
        )
    }

    /// Foreign key on the related rows pointing back at the owner.
    pub fn backref_fk(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::OneToMany { remote_fk } | RelationKind::OneToOne { remote_fk } => {
                Some(remote_fk)
            }
            _ => None,
        }
    }

    /// Foreign key held by the owner itself.
    pub fn local_fk(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::ManyToOne { local_fk } => Some(local_fk),
            _ => None,
        }
    }

    /// The relationship as seen from the target, named `name`.
    pub fn inverse(&self, owner: &str, name: &str) -> Relationship {
        let kind = match &self.kind {
            RelationKind::ManyToOne { local_fk } => RelationKind::OneToMany {
                remote_fk: local_fk.clone(),
            },
            RelationKind::OneToMany { remote_fk } | RelationKind::OneToOne { remote_fk } => {
                RelationKind::ManyToOne {
                    local_fk: remote_fk.clone(),
                }
            }
            RelationKind::ManyToMany {
                table,
                local_key,
                remote_key,
            } => RelationKind::ManyToMany {
                table: table.clone(),
                local_key: remote_key.clone(),
                remote_key: local_key.clone(),
            },
        };
        Relationship::new(name, owner, kind)
    }
}

/// Read-only attribute computed by the database.
///
/// `sql` is an expression template where `{t}` stands for the row alias,
/// e.g. `{t}."first" || ' ' || {t}."last"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub name: String,
    pub sql: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default)]
    pub desc: Option<String>,
}

impl Expression {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            ty,
            desc: None,
        }
    }

    pub fn render(&self, alias: &str) -> String {
        self.sql.replace("{t}", alias)
    }
}

pub type ComputeFn = Arc<dyn Fn(&Entity) -> Value + Send + Sync>;

/// Read-only attribute computed in process from a loaded entity.
#[derive(Clone)]
pub struct Computed {
    pub name: String,
    pub desc: Option<String>,
    compute: ComputeFn,
}

impl Computed {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Entity) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            desc: None,
            compute: Arc::new(compute),
        }
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn call(&self, entity: &Entity) -> Value {
        (self.compute)(entity)
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed").field("name", &self.name).finish()
    }
}

/// Plain class-level value, identical for every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub desc: Option<String>,
}

impl Constant {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            desc: None,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match &self.value {
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "int",
            Value::Number(_) => "float",
            _ => "auto",
        }
    }
}

/// Any named attribute of a model.
#[derive(Debug, Clone, Copy)]
pub enum Attribute<'a> {
    Column(&'a Column),
    Relation(&'a Relationship),
    Expression(&'a Expression),
    Computed(&'a Computed),
    Constant(&'a Constant),
}

impl Attribute<'_> {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::Column(_) => AttributeKind::Column,
            Attribute::Relation(_) => AttributeKind::Relation,
            Attribute::Expression(_) => AttributeKind::Expression,
            Attribute::Computed(_) => AttributeKind::Computed,
            Attribute::Constant(_) => AttributeKind::Constant,
        }
    }

    pub fn desc(&self) -> Option<&str> {
        match self {
            Attribute::Column(c) => c.desc.as_deref(),
            Attribute::Relation(r) => r.desc.as_deref(),
            Attribute::Expression(e) => e.desc.as_deref(),
            Attribute::Computed(c) => c.desc.as_deref(),
            Attribute::Constant(c) => c.desc.as_deref(),
        }
    }
}

/// A declared model.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub table: String,
    pub columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
    /// Composite unique constraints.
    pub unique_together: Vec<Vec<String>>,
    pub expressions: Vec<Expression>,
    pub computed: Vec<Computed>,
    pub constants: Vec<Constant>,
    pub validators: Vec<FieldValidator>,
    /// Names always emitted and always readable.
    pub extra_defaults: Vec<String>,
    pub policy: Option<Crudable>,
    perms: Option<CrudPerms>,
    descriptors: BTreeMap<String, Descriptor>,
}

/// `CrudableClass` -> `crudable_class`
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        let name = name.into();
        ModelBuilder {
            model: Model {
                table: snake_case(&name),
                name,
                columns: vec![Column::uuid(ID).required()],
                relationships: Vec::new(),
                unique_together: Vec::new(),
                expressions: Vec::new(),
                computed: Vec::new(),
                constants: Vec::new(),
                validators: Vec::new(),
                extra_defaults: Vec::new(),
                policy: None,
                perms: None,
                descriptors: BTreeMap::new(),
            },
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn expression(&self, name: &str) -> Option<&Expression> {
        self.expressions.iter().find(|e| e.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<Attribute<'_>> {
        if let Some(c) = self.column(name) {
            return Some(Attribute::Column(c));
        }
        if let Some(r) = self.relationship(name) {
            return Some(Attribute::Relation(r));
        }
        if let Some(e) = self.expression(name) {
            return Some(Attribute::Expression(e));
        }
        if let Some(c) = self.computed.iter().find(|c| c.name == name) {
            return Some(Attribute::Computed(c));
        }
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(Attribute::Constant)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Columns and expression attributes can be ordered by.
    pub fn is_sortable(&self, name: &str) -> bool {
        self.column(name).is_some() || self.expression(name).is_some()
    }

    /// Value type of a column or expression attribute.
    pub fn scalar_type(&self, name: &str) -> Option<FieldType> {
        self.column(name)
            .map(|c| c.ty)
            .or_else(|| self.expression(name).map(|e| e.ty))
    }

    /// All attribute names in declaration order.
    pub fn attribute_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.relationships.iter().map(|r| r.name.as_str()))
            .chain(self.expressions.iter().map(|e| e.name.as_str()))
            .chain(self.computed.iter().map(|c| c.name.as_str()))
            .chain(self.constants.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Names emitted when no data spec is given: columns, expressions and
    /// constants.
    pub fn default_read_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.expressions.iter().map(|e| e.name.as_str()))
            .chain(self.constants.iter().map(|c| c.name.as_str()))
            .filter(|n| !n.starts_with('_') || self.extra_defaults.iter().any(|e| e == n))
            .collect()
    }

    pub fn primary_key(&self) -> Vec<&str> {
        vec![ID]
    }

    /// Unique column sets: single unique columns first, then composites.
    pub fn unique_constraints(&self) -> Vec<Vec<String>> {
        self.columns
            .iter()
            .filter(|c| c.unique)
            .map(|c| vec![c.name.clone()])
            .chain(self.unique_together.iter().cloned())
            .collect()
    }

    pub fn validators_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValidator> {
        self.validators.iter().filter(move |v| v.field() == name)
    }

    /// Derived permissions, present when the model declares a policy.
    pub fn perms(&self) -> Option<&CrudPerms> {
        self.perms.as_ref()
    }

    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.descriptors.get(name)
    }

    pub fn descriptors(&self) -> &BTreeMap<String, Descriptor> {
        &self.descriptors
    }

    /// Readable unless a policy grants nothing to read.
    pub fn is_readable(&self) -> bool {
        self.perms.as_ref().is_none_or(|p| !p.read.is_empty())
    }

    /// Deletable only under a policy that allows it.
    pub fn is_deletable(&self) -> bool {
        self.perms.as_ref().is_some_and(|p| p.can_delete)
    }

    /// Compute permissions and the descriptor table.
    pub(crate) fn finalize(&mut self) {
        self.perms = self.policy.as_ref().map(|policy| policy.derive(self));
        let mut descriptors = BTreeMap::new();
        for name in self.attribute_names() {
            if let Some(attr) = self.attribute(name) {
                descriptors.insert(name.to_string(), Descriptor::build(self, name, attr));
            }
        }
        self.descriptors = descriptors;
    }

    pub(crate) fn check(&self) -> QueryResult<()> {
        let names = self.attribute_names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(QueryError::Schema(format!(
                    "{} declares attribute '{}' twice",
                    self.name, name
                )));
            }
        }
        for rel in &self.relationships {
            if let Some(fk) = rel.local_fk() {
                if self.column(fk).is_none() {
                    return Err(QueryError::Schema(format!(
                        "{}.{} uses unknown foreign key column '{}'",
                        self.name, rel.name, fk
                    )));
                }
            }
        }
        for cols in &self.unique_together {
            if let Some(missing) = cols.iter().find(|c| self.column(c).is_none()) {
                return Err(QueryError::Schema(format!(
                    "{} unique constraint names unknown column '{}'",
                    self.name, missing
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.model.table = table.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        // `id` is always the UUID primary key
        if column.name == ID {
            if let Some(desc) = column.desc {
                self.model.columns[0].desc = Some(desc);
            }
            return self;
        }
        self.model.columns.push(column);
        self
    }

    pub fn relationship(mut self, rel: Relationship) -> Self {
        self.model.relationships.push(rel);
        self
    }

    pub fn unique_together<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model
            .unique_together
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn expression(mut self, expr: Expression) -> Self {
        self.model.expressions.push(expr);
        self
    }

    pub fn computed(mut self, computed: Computed) -> Self {
        self.model.computed.push(computed);
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.model.constants.push(Constant::new(name, value));
        self
    }

    pub fn validator(mut self, validator: FieldValidator) -> Self {
        self.model.validators.push(validator);
        self
    }

    pub fn extra_default(mut self, name: impl Into<String>) -> Self {
        self.model.extra_defaults.push(name.into());
        self
    }

    pub fn crudable(mut self, policy: Crudable) -> Self {
        self.model.policy = Some(policy);
        self
    }

    pub fn build(mut self) -> QueryResult<Model> {
        self.model.check()?;
        self.model.finalize();
        Ok(self.model)
    }
}
