//! # crudite: JSON-described CRUD over relational models
//!
//! crudite runs count, read, create, update and delete operations described by
//! loosely shaped JSON against a registry of declared models, enforcing
//! per-field permissions and following relationships in both directions.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use crudite::prelude::*;
//! use serde_json::json;
//!
//! let user = Model::builder("User")
//!     .column(Column::text("name").required())
//!     .crudable(Crudable::new())
//!     .build()?;
//! let crud = Crud::connect("sqlite::memory:", Registry::new(vec![user])?).await?;
//! crud.initialize_db(false).await?;
//!
//! crud.create(&json!({"_model": "User", "name": "Turner"})).await?;
//! let page = crud
//!     .read(&json!({"_model": "User", "field": "name", "comparison": "istartswith", "value": "tur"}),
//!           &json!(["name"]), &json!("name"), None, None)
//!     .await?;
//! // => {"total": 1, "results": [{"_model": "User", "id": "...", "name": "Turner"}]}
//! ```
//!
//! ## Comparisons
//!
//! | Comparison                      | SQL                                   |
//! |---------------------------------|---------------------------------------|
//! | `eq` `ne` `lt` `le` `gt` `ge`   | `=` `<>` `<` `<=` `>` `>=`            |
//! | `in` `notin`                    | `IN (...)` `NOT IN (...)`             |
//! | `isnull` `isnotnull`            | `IS NULL` `IS NOT NULL`               |
//! | `contains` `startswith` ...     | escaped `GLOB` or `LIKE` pattern      |
//! | `icontains` `istartswith` ...   | `LOWER(col) LIKE LOWER(pattern)`      |
//!
//! A comparison value that is itself a query (`{"_model": ..., "select":
//! ...}`) becomes a sub-select.

pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod graph;
pub mod query;
pub mod schema;
pub mod session;
pub mod transpiler;

pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig};
    pub use crate::engine::Crud;
    pub use crate::error::{CrudError, ErrorKind, QueryError};
    pub use crate::query::{DateRange, Interval, IntervalUnit};
    pub use crate::schema::{
        Column, Computed, Crudable, Expression, FieldType, FieldValidator, Model, Registry,
        Relationship, SchemaFile,
    };
    pub use crate::transpiler::{Dialect, ToSql};
}
