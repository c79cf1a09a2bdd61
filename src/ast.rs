//! SQL statement tree.
//!
//! The filter compiler and the engine build these nodes; the
//! [`transpiler`](crate::transpiler) renders them into parameterised SQL.
//! Every table in a statement carries an explicit alias so that correlated
//! sub-selects can refer to their enclosing rows.

use serde_json::Value;

use crate::query::{Comparison, Interval};

/// Dynamic value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// JSON rendering of a bound value.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Textual form used when a value feeds a pattern match.
    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }
}

/// `alias."column"`
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

/// Scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    /// Pre-rendered SQL, used for expression attributes.
    Raw(String),
    Lower(Box<Expr>),
    Cast(Box<Expr>, &'static str),
    Param(SqlValue),
    Min(Box<Expr>),
    /// `COUNT(expr)`: rows where `expr` is not NULL.
    Count(Box<Expr>),
    /// A stored date or timestamp moved by an interval, rendered back in
    /// the stored text form.
    DateShift {
        base: SqlValue,
        interval: Interval,
        backwards: bool,
        date_only: bool,
    },
    CountAll,
    Star,
    One,
}

impl Expr {
    pub fn column(alias: &str, column: &str) -> Self {
        Expr::Column(ColumnRef::new(alias, column))
    }

    pub fn lower(self) -> Self {
        Expr::Lower(Box::new(self))
    }
}

/// Right hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Value(SqlValue),
    List(Vec<SqlValue>),
    Select(Box<Select>),
    Expr(Box<Expr>),
}

/// Boolean condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: Comparison,
        right: Operand,
    },
    /// Join condition between two aliased columns.
    ColumnsEqual(ColumnRef, ColumnRef),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Exists(Box<Select>),
    Constant(bool),
}

impl Predicate {
    /// Conjunction that collapses trivial cases.
    pub fn all(mut preds: Vec<Predicate>) -> Predicate {
        match preds.len() {
            0 => Predicate::Constant(true),
            1 => preds.remove(0),
            _ => Predicate::And(preds),
        }
    }

    /// Disjunction that collapses trivial cases.
    pub fn any(mut preds: Vec<Predicate>) -> Predicate {
        match preds.len() {
            0 => Predicate::Constant(false),
            1 => preds.remove(0),
            _ => Predicate::Or(preds),
        }
    }
}

/// `"table" AS alias`
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table(TableRef),
    Subquery { query: Box<Query>, alias: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expr: Expr,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expr: Expr,
    pub dir: SortDir,
}

/// SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<Projection>,
    pub from: Vec<FromItem>,
    pub filter: Option<Predicate>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<Ordering>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    /// Start a select over one aliased table.
    pub fn from_table(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            from: vec![FromItem::Table(TableRef {
                table: table.into(),
                alias: alias.into(),
            })],
            ..Default::default()
        }
    }

    /// Start a select over a derived table.
    pub fn from_query(query: Query, alias: impl Into<String>) -> Self {
        Self {
            from: vec![FromItem::Subquery {
                query: Box::new(query),
                alias: alias.into(),
            }],
            ..Default::default()
        }
    }

    pub fn join_table(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.from.push(FromItem::Table(TableRef {
            table: table.into(),
            alias: alias.into(),
        }));
        self
    }

    pub fn column(mut self, expr: Expr) -> Self {
        self.columns.push(Projection { expr, label: None });
        self
    }

    pub fn labeled(mut self, expr: Expr, label: impl Into<String>) -> Self {
        self.columns.push(Projection {
            expr,
            label: Some(label.into()),
        });
        self
    }

    /// AND a predicate into the WHERE clause.
    pub fn and_where(mut self, pred: Option<Predicate>) -> Self {
        self.filter = match (self.filter.take(), pred) {
            (None, p) => p,
            (Some(f), None) => Some(f),
            (Some(Predicate::And(mut v)), Some(p)) => {
                v.push(p);
                Some(Predicate::And(v))
            }
            (Some(f), Some(p)) => Some(Predicate::And(vec![f, p])),
        };
        self
    }

    pub fn order(mut self, expr: Expr, dir: SortDir) -> Self {
        self.order_by.push(Ordering { expr, dir });
        self
    }

    pub fn group(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Apply limit and offset; a limit of 0 means unlimited.
    pub fn window(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
        self.limit = limit.filter(|l| *l != 0);
        self.offset = offset.filter(|o| *o != 0);
        self
    }
}

/// A SELECT or a compound UNION of selects.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Select),
    Union { branches: Vec<Select>, all: bool },
}

/// INSERT INTO table (...) VALUES (...)
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<(String, SqlValue)>,
}

/// UPDATE table SET ... WHERE key columns match.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, SqlValue)>,
    pub key: Vec<(String, SqlValue)>,
}

/// DELETE FROM table WHERE key columns match.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub key: Vec<(String, SqlValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDdl {
    pub name: String,
    pub sql_type: &'static str,
    pub nullable: bool,
    pub unique: bool,
}

/// CREATE TABLE IF NOT EXISTS
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<ColumnDdl>,
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
}

/// DROP TABLE IF EXISTS
#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub table: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sql_value_from() {
        assert_eq!(SqlValue::from(true), SqlValue::Bool(true));
        assert_eq!(SqlValue::from(42i32), SqlValue::Int(42));
        assert_eq!(SqlValue::from("hello"), SqlValue::Text("hello".into()));
        assert_eq!(SqlValue::Float(1.5).to_json(), serde_json::json!(1.5));
    }

    #[test]
    fn test_and_where_flattens() {
        let select = Select::from_table("user", "t0")
            .and_where(Some(Predicate::Constant(true)))
            .and_where(None)
            .and_where(Some(Predicate::Constant(false)));
        assert_eq!(
            select.filter,
            Some(Predicate::And(vec![
                Predicate::Constant(true),
                Predicate::Constant(false)
            ]))
        );
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let select = Select::from_table("user", "t0").window(Some(0), Some(0));
        assert_eq!(select.limit, None);
        assert_eq!(select.offset, None);
    }
}
