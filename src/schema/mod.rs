//! Declared models and everything derived from them once at registration:
//! permission sets, the per-attribute descriptor table and crud specs.

mod file;
mod model;
mod perms;
mod registry;
mod spec;
mod types;
mod validation;

pub use file::{ModelDecl, SchemaFile, ValidatorDecl};
pub use model::{
    Attribute, Column, ComputeFn, Computed, Constant, Expression, ID, Model, ModelBuilder,
    RelationKind, Relationship, snake_case,
};
pub use perms::{AttributeKind, CrudPerms, Crudable, Descriptor, WriteCheck, read_allowed};
pub use registry::{AssociationTable, Registry};
pub use types::{FieldType, format_datetime, parse_datetime, raw_value};
pub use validation::{CheckFn, FieldValidator};
