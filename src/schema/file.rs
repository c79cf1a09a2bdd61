//! Schema documents (TOML or JSON) for declaring models without code.
//!
//! ```toml
//! [[models]]
//! name = "User"
//! columns = [{ name = "name", type = "text", nullable = false, unique = true }]
//! relationships = [
//!     { name = "tags", target = "Tag", kind = "one_to_many", remote_fk = "user_id", cascade = true, backref = "user" },
//! ]
//! validators = [{ field = "name", kind = "length", min = 1, max = 100 }]
//! crudable = { update = ["tags"] }
//! ```

use std::path::Path;

use serde::Deserialize;

use super::model::{Column, Constant, Expression, Model, Relationship};
use super::perms::Crudable;
use super::registry::Registry;
use super::validation::FieldValidator;
use crate::error::{QueryError, QueryResult};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub models: Vec<ModelDecl>,
}

/// One `[[models]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDecl {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,
    #[serde(default)]
    pub expressions: Vec<Expression>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub validators: Vec<ValidatorDecl>,
    #[serde(default)]
    pub extra_defaults: Vec<String>,
    #[serde(default)]
    pub crudable: Option<Crudable>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorDecl {
    Length {
        field: String,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    Regex {
        field: String,
        pattern: String,
        message: String,
    },
}

impl ValidatorDecl {
    fn build(self) -> QueryResult<FieldValidator> {
        match self {
            ValidatorDecl::Length { field, min, max } => {
                Ok(FieldValidator::text_length(field, min, max))
            }
            ValidatorDecl::Regex {
                field,
                pattern,
                message,
            } => FieldValidator::regex(field, &pattern, message),
        }
    }
}

impl ModelDecl {
    pub fn build(self) -> QueryResult<Model> {
        let mut builder = Model::builder(self.name);
        if let Some(table) = self.table {
            builder = builder.table(table);
        }
        for column in self.columns {
            builder = builder.column(column);
        }
        for rel in self.relationships {
            builder = builder.relationship(rel);
        }
        for cols in self.unique_together {
            builder = builder.unique_together(cols);
        }
        for expr in self.expressions {
            builder = builder.expression(expr);
        }
        for constant in self.constants {
            builder = builder.constant(constant.name, constant.value);
        }
        for validator in self.validators {
            builder = builder.validator(validator.build()?);
        }
        for name in self.extra_defaults {
            builder = builder.extra_default(name);
        }
        if let Some(policy) = self.crudable {
            builder = builder.crudable(policy);
        }
        builder.build()
    }
}

impl SchemaFile {
    /// Load a schema document; `.json` files are read as JSON, anything
    /// else as TOML.
    pub fn load(path: &Path) -> QueryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&text)
                .map_err(|e| QueryError::Config(format!("{}: {}", path.display(), e)))
        } else {
            Self::from_toml(&text)
                .map_err(|e| QueryError::Config(format!("{}: {}", path.display(), e)))
        }
    }

    pub fn from_toml(text: &str) -> QueryResult<Self> {
        toml::from_str(text).map_err(|e| QueryError::Config(e.to_string()))
    }

    pub fn into_registry(self) -> QueryResult<Registry> {
        let models = self
            .models
            .into_iter()
            .map(ModelDecl::build)
            .collect::<QueryResult<Vec<_>>>()?;
        Registry::new(models)
    }
}
