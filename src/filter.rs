//! Filter compiler: query nodes to SQL predicates.
//!
//! Field paths of up to three segments are supported. Every relationship
//! hop becomes a table in a correlated `EXISTS` sub-select whose join
//! conditions are ANDed with the final comparison, so rows whose relation is
//! null never match.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::ast::*;
use crate::error::{QueryError, QueryResult};
use crate::query::{Clause, CompareValue, Comparison, DateRange, Distinct, QueryNode, SortSpec};
use crate::schema::{FieldType, ID, Model, RelationKind, Registry, raw_value};
use crate::session::ROOT;

/// Longest supported dotted field path.
pub const MAX_PATH_SEGMENTS: usize = 3;

/// Compiles query nodes against the registry, handing out fresh table
/// aliases for every sub-select it builds.
pub struct FilterCompiler<'r> {
    registry: &'r Registry,
    next_alias: usize,
}

impl<'r> FilterCompiler<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            next_alias: 0,
        }
    }

    fn alias(&mut self, prefix: &str) -> String {
        self.next_alias += 1;
        format!("{}{}", prefix, self.next_alias)
    }

    /// Predicate selecting the rows of `model` (aliased `alias`) that match
    /// `node`, or `None` for a bare model selection.
    pub fn compile(
        &mut self,
        node: &QueryNode,
        model: &Arc<Model>,
        alias: &str,
    ) -> QueryResult<Option<Predicate>> {
        match &node.clause {
            Clause::All => Ok(None),
            Clause::Compare { field, op, value } => {
                self.compile_leaf(model, alias, field, *op, value).map(Some)
            }
            Clause::And(children) | Clause::Or(children) if children.is_empty() => Ok(None),
            Clause::And(children) | Clause::Or(children) => {
                let mut preds = Vec::with_capacity(children.len());
                for child in children {
                    preds.push(self.compile_child(child, model, alias)?);
                }
                Ok(Some(match node.clause {
                    Clause::And(_) => Predicate::all(preds),
                    _ => Predicate::any(preds),
                }))
            }
        }
    }

    /// A child on the same model filters the same row; a child on another
    /// model only requires that some row of that model matches.
    fn compile_child(
        &mut self,
        child: &QueryNode,
        model: &Arc<Model>,
        alias: &str,
    ) -> QueryResult<Predicate> {
        let child_model = self.registry.resolve(&child.model)?;
        if child_model.name == model.name {
            return Ok(self
                .compile(child, model, alias)?
                .unwrap_or(Predicate::Constant(true)));
        }
        let sub = self.alias("s");
        let pred = self.compile(child, &child_model, &sub)?;
        let select = Select::from_table(&child_model.table, &sub)
            .column(Expr::One)
            .and_where(pred);
        Ok(Predicate::Exists(Box::new(select)))
    }

    fn compile_leaf(
        &mut self,
        model: &Arc<Model>,
        alias: &str,
        field: &str,
        op: Comparison,
        value: &CompareValue,
    ) -> QueryResult<Predicate> {
        let parts: Vec<&str> = field.split('.').collect();
        if parts.len() > MAX_PATH_SEGMENTS {
            return Err(QueryError::shape(format!(
                "Field paths may have at most {} segments, given {}",
                MAX_PATH_SEGMENTS, field
            )));
        }
        let (hops, last) = parts.split_at(parts.len() - 1);
        if hops.is_empty() {
            return self.comparison(model, alias, last[0], op, value);
        }

        let mut tables: Vec<(String, String)> = Vec::new();
        let mut joins = Vec::new();
        let mut current = model.clone();
        let mut current_alias = alias.to_string();
        for hop in hops {
            let rel = match current.relationship(hop) {
                Some(rel) => rel.clone(),
                None if current.has_attribute(hop) => {
                    return Err(QueryError::shape(format!(
                        "{}.{} is not a relationship (in path {})",
                        current.name, hop, field
                    )));
                }
                None => return Err(QueryError::unknown_field(&current.name, *hop)),
            };
            let target = self.registry.resolve(&rel.target)?;
            let target_alias = self.alias("h");
            match &rel.kind {
                RelationKind::ManyToOne { local_fk } => joins.push(Predicate::ColumnsEqual(
                    ColumnRef::new(&current_alias, local_fk),
                    ColumnRef::new(&target_alias, ID),
                )),
                RelationKind::OneToMany { remote_fk } | RelationKind::OneToOne { remote_fk } => {
                    joins.push(Predicate::ColumnsEqual(
                        ColumnRef::new(&target_alias, remote_fk),
                        ColumnRef::new(&current_alias, ID),
                    ))
                }
                RelationKind::ManyToMany {
                    table,
                    local_key,
                    remote_key,
                } => {
                    let assoc = self.alias("a");
                    joins.push(Predicate::ColumnsEqual(
                        ColumnRef::new(&assoc, local_key),
                        ColumnRef::new(&current_alias, ID),
                    ));
                    joins.push(Predicate::ColumnsEqual(
                        ColumnRef::new(&assoc, remote_key),
                        ColumnRef::new(&target_alias, ID),
                    ));
                    tables.push((table.clone(), assoc));
                }
            }
            tables.push((target.table.clone(), target_alias.clone()));
            current = target;
            current_alias = target_alias;
        }

        let cmp = self.comparison(&current, &current_alias, last[0], op, value)?;
        joins.push(cmp);

        let mut tables = tables.into_iter();
        let Some((table, first)) = tables.next() else {
            return Err(QueryError::shape(format!("Empty field path {}", field)));
        };
        let mut select = Select::from_table(table, first).column(Expr::One);
        for (table, alias) in tables {
            select = select.join_table(table, alias);
        }
        debug!(path = field, hops = hops.len(), "compiled relationship path");
        Ok(Predicate::Exists(Box::new(
            select.and_where(Some(Predicate::all(joins))),
        )))
    }

    /// Expression and value type of a filterable attribute.
    pub(crate) fn target(&self, model: &Model, alias: &str, name: &str) -> QueryResult<(Expr, FieldType)> {
        if let Some(column) = model.column(name) {
            return Ok((Expr::column(alias, name), column.ty));
        }
        if let Some(expr) = model.expression(name) {
            return Ok((Expr::Raw(expr.render(alias)), expr.ty));
        }
        if model.has_attribute(name) {
            return Err(QueryError::shape(format!(
                "{}.{} cannot be filtered on",
                model.name, name
            )));
        }
        Err(QueryError::unknown_field(&model.name, name))
    }

    fn comparison(
        &mut self,
        model: &Model,
        alias: &str,
        name: &str,
        op: Comparison,
        value: &CompareValue,
    ) -> QueryResult<Predicate> {
        let (left, ty) = self.target(model, alias, name)?;
        let right = self.operand(ty, op, value)?;
        Ok(Predicate::Compare { left, op, right })
    }

    fn operand(&mut self, ty: FieldType, op: Comparison, value: &CompareValue) -> QueryResult<Operand> {
        let literal = match value {
            CompareValue::Subquery { query, select } => {
                if op.is_pattern() {
                    return Err(QueryError::shape(format!(
                        "Comparison {} does not accept a subquery",
                        op
                    )));
                }
                return Ok(Operand::Select(Box::new(self.subquery(query, select)?)));
            }
            CompareValue::Literal(v) => v,
        };

        if op.is_unary() {
            return Ok(Operand::None);
        }
        if op.is_membership() {
            return Ok(match literal {
                Value::Array(items) => {
                    Operand::List(items.iter().map(|v| ty.compare_value(v)).collect())
                }
                Value::Null => Operand::List(Vec::new()),
                other => Operand::Value(ty.compare_value(other)),
            });
        }
        if op.is_pattern() {
            return match literal {
                Value::Null | Value::Array(_) | Value::Object(_) => Err(QueryError::shape(
                    format!("Comparison {} requires a scalar value, given {}", op, literal),
                )),
                other => Ok(Operand::Value(SqlValue::Text(raw_value(other).as_text()))),
            };
        }
        match literal {
            Value::Array(_) | Value::Object(_) => Err(QueryError::shape(format!(
                "Comparison {} requires a scalar value, given {}",
                op, literal
            ))),
            other => Ok(Operand::Value(ty.compare_value(other))),
        }
    }

    /// Sub-select projecting `select` from the rows matched by `node`.
    pub fn subquery(&mut self, node: &QueryNode, select: &str) -> QueryResult<Select> {
        let model = self.registry.resolve(&node.model)?;
        let alias = self.alias("s");
        let (expr, _) = self.target(&model, &alias, select)?;
        let base = Select::from_table(&model.table, &alias).column(expr);
        self.restrict(node, &model, base, &alias)
    }

    /// Apply `node`'s filter and column distinctness to `select`.
    pub fn restrict(
        &mut self,
        node: &QueryNode,
        model: &Arc<Model>,
        select: Select,
        alias: &str,
    ) -> QueryResult<Select> {
        let pred = self.compile(node, model, alias)?;
        let mut select = select.and_where(pred);
        if let Distinct::Columns(columns) = &node.distinct {
            // one representative row (lowest id) per distinct tuple
            let d = self.alias("d");
            let mut inner = Select::from_table(&model.table, &d)
                .column(Expr::Min(Box::new(Expr::column(&d, ID))))
                .and_where(self.compile(node, model, &d)?);
            for column in columns {
                let (expr, _) = self.target(model, &d, column)?;
                inner = inner.group(expr);
            }
            select = select.and_where(Some(Predicate::Compare {
                left: Expr::column(alias, ID),
                op: Comparison::In,
                right: Operand::Select(Box::new(inner)),
            }));
        }
        Ok(select)
    }

    /// Rows of `node` restricted by its filter, aliased [`ROOT`].
    pub fn select(&mut self, node: &QueryNode, model: &Arc<Model>) -> QueryResult<Select> {
        self.restrict(node, model, Select::from_table(&model.table, ROOT), ROOT)
    }

    /// `SELECT group columns..., COUNT(first column) AS "count"` over
    /// `node`, one row per distinct group tuple. A NULL first group key
    /// counts 0.
    pub fn group_count(&mut self, node: &QueryNode, model: &Arc<Model>) -> QueryResult<Select> {
        let mut select = Select::from_table(&model.table, ROOT);
        let mut counted = None;
        for name in &node.groupby {
            let (expr, _) = self.target(model, ROOT, name)?;
            counted.get_or_insert_with(|| expr.clone());
            select = select
                .labeled(expr.clone(), name)
                .group(expr.clone())
                .order(expr, SortDir::Asc);
        }
        let count = match counted {
            Some(expr) => Expr::Count(Box::new(expr)),
            None => Expr::CountAll,
        };
        select = select.labeled(count, "count");
        self.restrict(node, model, select, ROOT)
    }

    /// Predicate keeping rows whose date column `field` lies within `range`,
    /// bounds included. `None` when the range is open on both sides.
    pub fn date_window(
        &self,
        model: &Model,
        alias: &str,
        field: &str,
        range: &DateRange,
        now: DateTime<Utc>,
    ) -> QueryResult<Option<Predicate>> {
        let (column, ty) = self.target(model, alias, field)?;
        if !matches!(ty, FieldType::Date | FieldType::DateTime) {
            return Err(QueryError::shape(format!(
                "{}.{} is not a date column",
                model.name, field
            )));
        }
        let (lower, upper) = range.bounds(ty, now)?;
        let mut preds = Vec::with_capacity(2);
        for (bound, op) in [(lower, Comparison::Ge), (upper, Comparison::Le)] {
            if let Some(bound) = bound {
                preds.push(Predicate::Compare {
                    left: column.clone(),
                    op,
                    right: bound.operand(ty),
                });
            }
        }
        debug!(model = %model.name, field, bounds = preds.len(), "date window");
        Ok((!preds.is_empty()).then(|| Predicate::all(preds)))
    }

    /// Ordering expression for a sort key; text sorts case-insensitively.
    pub fn sort_expr(&self, model: &Model, alias: &str, sort: &SortSpec) -> QueryResult<Expr> {
        let (expr, ty) = self.target(model, alias, &sort.field)?;
        Ok(if ty.is_string() { expr.lower() } else { expr })
    }
}
