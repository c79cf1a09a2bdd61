//! Query nodes and the normalizer that produces them.
//!
//! Callers send loosely shaped JSON: a model name, a mapping, or a list of
//! either. [`normalize_query`] turns that into a flat list of [`QueryNode`]s,
//! each carrying its resolved model name, so later stages never have to sniff
//! dictionary shapes again.

mod collect;
mod comparison;
pub mod dates;
mod normalize;

pub use comparison::Comparison;
pub use dates::{DateRange, Interval, IntervalUnit};
pub use collect::referenced_models;
pub use normalize::{SortSpec, normalize_data, normalize_query, normalize_sort};
pub(crate) use normalize::{mappify, truthy};

use serde_json::{Map, Value, json};

use crate::ast::SortDir;

/// Per-query data specification: field name to `true`, a literal or a
/// nested specification.
pub type DataSpec = Map<String, Value>;

/// Requested row distinctness.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Distinct {
    #[default]
    None,
    /// Plain row distinctness.
    Rows,
    /// One representative row per distinct column tuple.
    Columns(Vec<String>),
}

/// A canonical query node.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryNode {
    pub model: String,
    pub label: String,
    pub data: Option<Value>,
    pub groupby: Vec<String>,
    pub distinct: Distinct,
    pub clause: Clause,
}

/// Filter content of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Bare model selection.
    All,
    Compare {
        field: String,
        op: Comparison,
        value: CompareValue,
    },
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
}

/// Right hand side of a leaf comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareValue {
    Literal(Value),
    /// Sub-select projecting `select` from the rows matched by `query`.
    Subquery { query: Box<QueryNode>, select: String },
}

impl QueryNode {
    /// A node selecting every row of `model`.
    pub fn all(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            label: model.clone(),
            model,
            data: None,
            groupby: Vec::new(),
            distinct: Distinct::None,
            clause: Clause::All,
        }
    }

    /// Render back to the canonical JSON form accepted by [`normalize_query`].
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("_model".into(), json!(self.model));
        obj.insert("_label".into(), json!(self.label));
        if let Some(data) = &self.data {
            obj.insert("_data".into(), data.clone());
        }
        if !self.groupby.is_empty() {
            obj.insert("groupby".into(), json!(self.groupby));
        }
        match &self.distinct {
            Distinct::None => {}
            Distinct::Rows => {
                obj.insert("distinct".into(), json!(true));
            }
            Distinct::Columns(cols) => {
                obj.insert("distinct".into(), json!(cols));
            }
        }
        self.clause.write_json(&mut obj);
        Value::Object(obj)
    }

    /// Every field path this node (and its children) filters on.
    pub fn fields(&self) -> Vec<String> {
        match &self.clause {
            Clause::All => Vec::new(),
            Clause::Compare { field, .. } => vec![field.clone()],
            Clause::And(nodes) | Clause::Or(nodes) => {
                nodes.iter().flat_map(QueryNode::fields).collect()
            }
        }
    }
}

impl Clause {
    fn write_json(&self, obj: &mut Map<String, Value>) {
        match self {
            Clause::All => {}
            Clause::Compare { field, op, value } => {
                obj.insert("field".into(), json!(field));
                obj.insert("comparison".into(), json!(op.as_str()));
                let value = match value {
                    CompareValue::Literal(v) => v.clone(),
                    CompareValue::Subquery { query, select } => {
                        let mut sub = match query.to_json() {
                            Value::Object(m) => m,
                            _ => Map::new(),
                        };
                        sub.insert("select".into(), json!(select));
                        Value::Object(sub)
                    }
                };
                obj.insert("value".into(), value);
            }
            Clause::And(nodes) => {
                obj.insert(
                    "and".into(),
                    Value::Array(nodes.iter().map(QueryNode::to_json).collect()),
                );
            }
            Clause::Or(nodes) => {
                obj.insert(
                    "or".into(),
                    Value::Array(nodes.iter().map(QueryNode::to_json).collect()),
                );
            }
        }
    }
}

impl SortSpec {
    pub fn new(field: impl Into<String>, dir: SortDir) -> Self {
        Self {
            field: field.into(),
            dir,
        }
    }
}
