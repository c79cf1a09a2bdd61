//! Error types for crudite.
//!
//! [`QueryError`] is the internal taxonomy raised while normalizing,
//! compiling and executing. Public [`Crud`](crate::engine::Crud) operations
//! never hand it out directly: every failure is logged and wrapped into a
//! [`CrudError`].

use std::fmt;

use thiserror::Error;

/// Internal error raised anywhere below the public engine surface.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed query or data input (wrong JSON type at some position).
    #[error("Invalid query shape: {0}")]
    InvalidQueryShape(String),

    /// A query or data node lacks a model and none could be inherited.
    #[error("Missing model: {0}")]
    MissingModel(String),

    /// A model name matched no registered model or table.
    #[error("Unknown model: '{0}'")]
    UnknownModel(String),

    /// A field name matched no attribute of the model.
    #[error("Unknown field: {model}.{field}")]
    UnknownField { model: String, field: String },

    /// Sorting was requested on something that is not a column or expression.
    #[error(
        "Models may only be sorted by columns that exist in the database. Provided: {model}.{field}"
    )]
    UnsortableField { model: String, field: String },

    /// A read, write, create or delete lacked the required grant.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A relation reference named an id that is malformed or does not exist.
    #[error("Invalid instance ID for relation {model} (value: {value})")]
    InvalidReferenceId { model: String, value: String },

    /// A unique constraint lookup matched more than one stored row.
    #[error("Multiple results found for {model} unique constraint: {columns:?}")]
    AmbiguousUniqueMatch { model: String, columns: Vec<String> },

    /// Relation merging received a value it cannot interpret.
    #[error("Merging relations on {relation} not supported for values of type {kind} (value: {value})")]
    UnsupportedRelationValue {
        relation: String,
        kind: &'static str,
        value: String,
    },

    /// A field validator rejected an assignment.
    #[error("validation failed for {model}.{field} with value {value}: {message}")]
    Validation {
        model: String,
        field: String,
        value: String,
        message: String,
    },

    /// The caller broke an operation contract (e.g. a delete matching many rows).
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Schema declaration problem detected at registration time.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryError {
    /// Create an invalid shape error.
    pub fn shape(message: impl Into<String>) -> Self {
        Self::InvalidQueryShape(message.into())
    }

    /// Create a permission error.
    pub fn denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    /// Create an unknown field error.
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    /// The outward discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQueryShape(_) => ErrorKind::InvalidQueryShape,
            Self::MissingModel(_) => ErrorKind::MissingModel,
            Self::UnknownModel(_) => ErrorKind::UnknownModel,
            Self::UnknownField { .. } => ErrorKind::UnknownField,
            Self::UnsortableField { .. } => ErrorKind::UnsortableField,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::InvalidReferenceId { .. } | Self::AmbiguousUniqueMatch { .. } => {
                ErrorKind::InvalidReference
            }
            Self::UnsupportedRelationValue { .. } => ErrorKind::UnsupportedRelationValue,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ContractViolation(_) => ErrorKind::ContractViolation,
            Self::Schema(_) | Self::Config(_) => ErrorKind::Config,
            Self::Database(_) | Self::Io(_) => ErrorKind::Database,
        }
    }
}

/// Result type alias for internal operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Coarse classification carried by [`CrudError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidQueryShape,
    MissingModel,
    UnknownModel,
    UnknownField,
    UnsortableField,
    PermissionDenied,
    InvalidReference,
    UnsupportedRelationValue,
    Validation,
    ContractViolation,
    Config,
    Database,
}

/// The single error kind returned by public CRUD operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudError {
    operation: &'static str,
    kind: ErrorKind,
    message: String,
}

impl CrudError {
    /// Wrap an internal error raised while running `operation`.
    pub fn wrap(operation: &'static str, err: QueryError) -> Self {
        Self {
            operation,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Name of the failed operation (`count`, `read`, ...).
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message of the original error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CrudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crud.{} failed: {}", self.operation, self.message)
    }
}

impl std::error::Error for CrudError {}
