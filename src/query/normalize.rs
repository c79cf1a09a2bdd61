use serde_json::{Map, Value};
use tracing::debug;

use super::{Clause, CompareValue, Comparison, DataSpec, Distinct, QueryNode};
use crate::ast::SortDir;
use crate::error::{QueryError, QueryResult};
use crate::schema::Model;

/// One resolved sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub dir: SortDir,
}

/// Normalize a query argument into a flat list of canonical nodes.
///
/// Accepts a model name, a mapping, or a list of either.
pub fn normalize_query(query: &Value) -> QueryResult<Vec<QueryNode>> {
    if query.is_null() {
        return Err(QueryError::shape("None passed for query parameter"));
    }
    let nodes = normalize_list(query, None)?;
    debug!(count = nodes.len(), "normalized query");
    Ok(nodes)
}

fn normalize_list(query: &Value, supermodel: Option<&str>) -> QueryResult<Vec<QueryNode>> {
    match query {
        Value::Array(items) => items
            .iter()
            .map(|item| normalize_one(item, supermodel))
            .collect(),
        other => Ok(vec![normalize_one(other, supermodel)?]),
    }
}

fn normalize_one(query: &Value, supermodel: Option<&str>) -> QueryResult<QueryNode> {
    match query {
        Value::String(name) => Ok(QueryNode::all(name.as_str())),
        Value::Object(map) => normalize_mapping(map, supermodel),
        other => Err(QueryError::shape(format!(
            "Query objects must be either a dict or string, given {}",
            other
        ))),
    }
}

fn string_list(value: &Value, key: &str) -> QueryResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| QueryError::shape(format!("{} entries must be strings", key)))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(QueryError::shape(format!(
            "{} must be a string or a list of strings, given {}",
            key, other
        ))),
    }
}

fn model_name(map: &Map<String, Value>) -> QueryResult<Option<String>> {
    match map.get("_model") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(QueryError::shape(format!(
            "_model must be a string, given {}",
            other
        ))),
    }
}

fn normalize_mapping(map: &Map<String, Value>, supermodel: Option<&str>) -> QueryResult<QueryNode> {
    let own_model = model_name(map)?;
    let label = match map.get("_label") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let data = map.get("_data").filter(|d| !d.is_null()).cloned();
    let groupby = match map.get("groupby") {
        Some(v) => string_list(v, "groupby")?,
        None => Vec::new(),
    };
    let distinct = match map.get("distinct") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Distinct::None,
        Some(Value::Bool(true)) => Distinct::Rows,
        Some(v) => {
            let cols = string_list(v, "distinct")?;
            if cols.is_empty() {
                Distinct::None
            } else {
                Distinct::Columns(cols)
            }
        }
    };

    let logical = ["and", "or"]
        .into_iter()
        .find(|op| map.contains_key(*op));

    if let Some(op) = logical {
        let clauses = match &map[op] {
            Value::Array(items) => items,
            other => {
                return Err(QueryError::shape(format!(
                    "Clause must be of type list, set, or tuple, given {}",
                    other
                )));
            }
        };
        let inherited = own_model.as_deref().or(supermodel);
        let mut children = clauses
            .iter()
            .map(|c| normalize_one(c, inherited))
            .collect::<QueryResult<Vec<_>>>()?;

        if children.len() == 1 {
            // A single sub-clause replaces its parent and keeps what the
            // parent declared beside the operator.
            let mut child = children.remove(0);
            if map.contains_key("_label") && child.label == child.model {
                if let Some(label) = label {
                    child.label = label;
                }
            }
            if child.data.is_none() {
                child.data = data;
            }
            if child.groupby.is_empty() {
                child.groupby = groupby;
            }
            if child.distinct == Distinct::None {
                child.distinct = distinct;
            }
            return Ok(child);
        }

        let model = match own_model {
            Some(m) => m,
            None => match children.first() {
                Some(first) => first.model.clone(),
                None => supermodel.map(str::to_string).ok_or_else(|| {
                    QueryError::MissingModel(format!(
                        "Clause objects must have a \"_model\" attribute, given: {}",
                        Value::Object(map.clone())
                    ))
                })?,
            },
        };
        let clause = if op == "and" {
            Clause::And(children)
        } else {
            Clause::Or(children)
        };
        return Ok(QueryNode {
            label: label.unwrap_or_else(|| model.clone()),
            model,
            data,
            groupby,
            distinct,
            clause,
        });
    }

    let model = own_model
        .or_else(|| supermodel.map(str::to_string))
        .ok_or_else(|| {
            QueryError::MissingModel(format!(
                "Query objects must have a \"_model\" attribute, given: {}",
                Value::Object(map.clone())
            ))
        })?;

    let clause = if ["field", "value", "comparison"]
        .iter()
        .any(|k| map.contains_key(*k))
    {
        let field = match map.get("field") {
            None | Some(Value::Null) => "id".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(QueryError::shape(format!("field must be a string, given {}", other)));
            }
        };
        let op = match map.get("comparison") {
            None | Some(Value::Null) => Comparison::Eq,
            Some(Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(QueryError::shape(format!(
                    "comparison must be a string, given {}",
                    other
                )));
            }
        };
        let value = normalize_value(map.get("value").unwrap_or(&Value::Null))?;
        Clause::Compare { field, op, value }
    } else {
        Clause::All
    };

    Ok(QueryNode {
        label: label.unwrap_or_else(|| model.clone()),
        model,
        data,
        groupby,
        distinct,
        clause,
    })
}

fn normalize_value(value: &Value) -> QueryResult<CompareValue> {
    match value {
        Value::Object(map) if map.contains_key("_model") => {
            let select = match map.get("select") {
                None | Some(Value::Null) => "id".to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => {
                    return Err(QueryError::shape(format!(
                        "select must be a string, given {}",
                        other
                    )));
                }
            };
            let mut inner = map.clone();
            inner.remove("select");
            let query = normalize_mapping(&inner, None)?;
            Ok(CompareValue::Subquery {
                query: Box::new(query),
                select,
            })
        }
        Value::Object(_) => Err(QueryError::shape(format!(
            "Comparison values that are mappings must declare a _model, given {}",
            value
        ))),
        other => Ok(CompareValue::Literal(other.clone())),
    }
}

/// Truthiness of a JSON value: null, false, zero and empty values are falsy.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A data spec as a field mapping: strings and string lists map to `true`.
pub(crate) fn mappify(value: &Value) -> QueryResult<Option<DataSpec>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map.clone())),
        Value::String(s) => Ok(Some(Map::from_iter([(s.clone(), Value::Bool(true))]))),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok((s.clone(), Value::Bool(true))),
                other => Err(QueryError::shape(format!(
                    "Data field lists may only contain strings, given {}",
                    other
                ))),
            })
            .collect::<QueryResult<Map<_, _>>>()
            .map(Some),
        other => Err(QueryError::shape(format!("Unknown datatype: {}", other))),
    }
}

/// Expand a data specification into `count` entries.
///
/// A singular spec (string, list of strings, mapping) is replicated; a plural
/// spec (list of mappings or of lists) is padded with `None`.
pub fn normalize_data(data: &Value, count: usize) -> QueryResult<Vec<Option<DataSpec>>> {
    if !truthy(data) {
        return Ok(vec![None; count]);
    }

    let mut specs = match data {
        Value::String(_) | Value::Object(_) => vec![mappify(data)?],
        Value::Array(items) if items.iter().any(Value::is_string) => vec![mappify(data)?],
        Value::Array(items) => items.iter().map(mappify).collect::<QueryResult<Vec<_>>>()?,
        other => return Err(QueryError::shape(format!("Unknown datatype: {}", other))),
    };

    if specs.len() < count {
        if specs.len() == 1 {
            let first = specs[0].clone();
            specs.resize(count, first);
        } else {
            specs.resize(count, None);
        }
    }
    Ok(specs)
}

fn extract_sort_field(model: Option<&Model>, value: &Value) -> QueryResult<String> {
    let candidates: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut field: Option<String> = None;
    for candidate in candidates {
        let Some(name) = candidate.as_str() else {
            continue;
        };
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 1 && field.is_none() {
            if model.is_none_or(|m| m.has_attribute(parts[0])) {
                field = Some(parts[0].to_string());
            }
        } else if parts.len() > 1 {
            if let Some(m) = model {
                if parts[0] == m.name {
                    field = Some(parts[1].to_string());
                }
            }
        }
    }

    match (field, model) {
        (Some(field), Some(model)) if !field.is_empty() => {
            if !model.has_attribute(&field) {
                return Err(QueryError::unknown_field(&model.name, field));
            }
            if !model.is_sortable(&field) {
                return Err(QueryError::UnsortableField {
                    model: model.name.clone(),
                    field,
                });
            }
            Ok(field)
        }
        (Some(field), None) if !field.is_empty() => Ok(field),
        _ => Ok("id".to_string()),
    }
}

fn parse_dir(value: Option<&Value>) -> QueryResult<SortDir> {
    match value {
        None | Some(Value::Null) => Ok(SortDir::Asc),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(QueryError::shape(format!("Unknown sort direction '{}'", other))),
        },
        Some(other) => Err(QueryError::shape(format!(
            "Sort direction must be a string, given {}",
            other
        ))),
    }
}

/// Normalize a sort argument into ordered `{field, dir}` keys.
///
/// With no model, names are taken as given and checked later per branch.
pub fn normalize_sort(model: Option<&Model>, sort: &Value) -> QueryResult<Vec<SortSpec>> {
    if let Value::String(s) = sort {
        let trimmed = s.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            let parsed: Value = serde_json::from_str(s)
                .map_err(|e| QueryError::shape(format!("Invalid sort JSON: {}", e)))?;
            return normalize_sort(model, &parsed);
        }
    }

    match sort {
        Value::String(_) => Ok(vec![SortSpec {
            field: extract_sort_field(model, sort)?,
            dir: SortDir::Asc,
        }]),
        Value::Array(items) => {
            let mut sorters = Vec::new();
            for item in items {
                sorters.extend(normalize_sort(model, item)?);
            }
            Ok(sorters)
        }
        Value::Object(map) => {
            let field = map
                .get("property")
                .or_else(|| map.get("fields"))
                .or_else(|| map.get("field"))
                .cloned()
                .unwrap_or(Value::Array(Vec::new()));
            let dir = parse_dir(map.get("direction").or_else(|| map.get("dir")))?;
            Ok(vec![SortSpec {
                field: extract_sort_field(model, &field)?,
                dir,
            }])
        }
        _ => Ok(vec![SortSpec {
            field: "id".to_string(),
            dir: SortDir::Asc,
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, FieldType, Model};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user_model() -> Model {
        Model::builder("User")
            .column(Column::new("name", FieldType::Text))
            .build()
            .unwrap()
    }

    #[test]
    fn test_bare_string() {
        let nodes = normalize_query(&json!("User")).unwrap();
        assert_eq!(nodes, vec![QueryNode::all("User")]);
    }

    #[test]
    fn test_groupby_and_distinct_strings_are_listified() {
        let nodes = normalize_query(&json!({"_model": "Tag", "groupby": "name", "distinct": "name"}))
            .unwrap();
        assert_eq!(nodes[0].groupby, vec!["name".to_string()]);
        assert_eq!(nodes[0].distinct, Distinct::Columns(vec!["name".into()]));
    }

    #[test]
    fn test_leaf_defaults() {
        let nodes = normalize_query(&json!({"_model": "User", "value": "abc"})).unwrap();
        assert_eq!(
            nodes[0].clause,
            Clause::Compare {
                field: "id".into(),
                op: Comparison::Eq,
                value: CompareValue::Literal(json!("abc")),
            }
        );
    }

    #[test]
    fn test_children_inherit_model() {
        let nodes = normalize_query(&json!({
            "_model": "User",
            "or": [{"field": "name", "value": "Hooch"}, {"field": "name", "value": "Turner"}]
        }))
        .unwrap();
        let Clause::Or(children) = &nodes[0].clause else {
            panic!("expected or clause");
        };
        assert!(children.iter().all(|c| c.model == "User"));
    }

    #[test]
    fn test_model_pulled_from_first_clause() {
        let nodes = normalize_query(&json!({
            "and": [{"_model": "Tag", "field": "name", "value": "Male"}, {"_model": "Tag"}]
        }))
        .unwrap();
        assert_eq!(nodes[0].model, "Tag");
    }

    #[test]
    fn test_single_clause_collapses() {
        let nodes = normalize_query(&json!({
            "_model": "User",
            "_label": "Hooch",
            "and": [{"field": "name", "value": "Hooch"}]
        }))
        .unwrap();
        assert_eq!(nodes[0].label, "Hooch");
        assert!(matches!(nodes[0].clause, Clause::Compare { .. }));
    }

    #[test]
    fn test_shape_errors() {
        assert!(matches!(
            normalize_query(&json!({"_model": "User", "and": {"field": "x"}})),
            Err(QueryError::InvalidQueryShape(_))
        ));
        assert!(matches!(
            normalize_query(&json!([1])),
            Err(QueryError::InvalidQueryShape(_))
        ));
        assert!(matches!(
            normalize_query(&json!({"field": "name"})),
            Err(QueryError::MissingModel(_))
        ));
        assert!(matches!(
            normalize_query(&Value::Null),
            Err(QueryError::InvalidQueryShape(_))
        ));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let query = json!([
            "User",
            {"_model": "Tag", "groupby": "name", "field": "user_id", "comparison": "in",
             "value": {"_model": "User", "select": "id", "field": "name", "value": "Turner"}},
            {"_model": "User", "or": [{"field": "name", "value": "a"}, {"field": "name", "value": "b"}]}
        ]);
        let once = normalize_query(&query).unwrap();
        let rendered = Value::Array(once.iter().map(QueryNode::to_json).collect());
        let twice = normalize_query(&rendered).unwrap();
        assert_eq!(once, twice);
        assert!(twice.iter().all(|n| !n.model.is_empty()));
    }

    #[test]
    fn test_normalize_data_singular_replicates() {
        let specs = normalize_data(&json!(["name", "id"]), 3).unwrap();
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().all(|s| s == &specs[0]));
        assert_eq!(
            specs[0],
            Some(Map::from_iter([
                ("name".to_string(), json!(true)),
                ("id".to_string(), json!(true))
            ]))
        );
    }

    #[test]
    fn test_normalize_data_plural_pads_with_none() {
        let specs = normalize_data(&json!([{"name": true}, ["id"]]), 4).unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[2], None);
        assert_eq!(specs[3], None);
    }

    #[test]
    fn test_normalize_data_empty() {
        assert_eq!(normalize_data(&Value::Null, 2).unwrap(), vec![None, None]);
        assert_eq!(normalize_data(&json!("name"), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_sort_forms() {
        let user = user_model();
        assert_eq!(
            normalize_sort(Some(&user), &json!("name")).unwrap(),
            vec![SortSpec::new("name", SortDir::Asc)]
        );
        assert_eq!(
            normalize_sort(Some(&user), &json!(r#"[{"property": "User.name", "direction": "DESC"}]"#))
                .unwrap(),
            vec![SortSpec::new("name", SortDir::Desc)]
        );
        assert_eq!(
            normalize_sort(Some(&user), &json!("Tag.name")).unwrap(),
            vec![SortSpec::new("id", SortDir::Asc)]
        );
        assert_eq!(
            normalize_sort(Some(&user), &Value::Null).unwrap(),
            vec![SortSpec::new("id", SortDir::Asc)]
        );
        assert_eq!(
            normalize_sort(None, &json!({"field": "name", "dir": "desc"})).unwrap(),
            vec![SortSpec::new("name", SortDir::Desc)]
        );
    }
}
