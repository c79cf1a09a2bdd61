use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::schema::Registry;

/// Names of every model an operation's arguments touch.
///
/// Gathers each mapping that declares a string `_model`, then follows the
/// dotted paths it filters or reads on through relationships. Names that do
/// not resolve are skipped.
pub fn referenced_models(registry: &Registry, args: &Value) -> BTreeSet<String> {
    let mut queries = Vec::new();
    gather(args, &mut queries);
    let mut models = BTreeSet::new();
    for query in queries {
        collect(registry, query, &mut models);
    }
    models
}

fn gather<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| gather(item, out)),
        Value::Object(map) => {
            if map.get("_model").is_some_and(Value::is_string) {
                out.push(map);
            }
            map.values().for_each(|v| gather(v, out));
        }
        _ => {}
    }
}

/// Attribute paths a mapping refers to.
fn fields(map: &Map<String, Value>) -> BTreeSet<String> {
    if let Some(field) = map.get("field") {
        return field.as_str().map(str::to_string).into_iter().collect();
    }
    if map.contains_key("and") || map.contains_key("or") {
        let mut out = BTreeSet::new();
        for op in ["and", "or"] {
            if let Some(Value::Array(items)) = map.get(op) {
                for item in items {
                    if let Value::Object(sub) = item {
                        out.extend(fields(sub));
                    }
                }
            }
        }
        return out;
    }
    if map.contains_key("comparison") || map.contains_key("value") {
        return BTreeSet::from(["id".to_string()]);
    }
    map.keys().cloned().collect()
}

fn collect(registry: &Registry, map: &Map<String, Value>, models: &mut BTreeSet<String>) {
    let Some(name) = map.get("_model").and_then(Value::as_str) else {
        return;
    };
    let model = match registry.resolve(name) {
        Ok(model) => model,
        Err(_) => {
            debug!(model = name, "unable to resolve model");
            return;
        }
    };
    models.insert(model.name.clone());

    for path in fields(map) {
        let mut current = model.clone();
        for part in path.split('.') {
            if !current.has_attribute(part) {
                break;
            }
            let Some(rel) = current.relationship(part) else {
                continue;
            };
            let Ok(target) = registry.resolve(&rel.target) else {
                break;
            };
            models.insert(target.name.clone());
            if let Some(nested) = map.get(part) {
                let mut sub = match nested {
                    Value::Object(sub) => sub.clone(),
                    Value::String(s) => Map::from_iter([(s.clone(), Value::Bool(true))]),
                    Value::Array(items) if !items.iter().any(Value::is_object) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| (s.to_string(), Value::Bool(true)))
                        .collect(),
                    _ => Map::new(),
                };
                if !sub.is_empty() {
                    sub.insert("_model".into(), Value::String(target.name.clone()));
                    collect(registry, &sub, models);
                }
            }
            current = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Model, Relationship};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new(vec![
            Model::builder("User")
                .column(Column::text("name"))
                .relationship(Relationship::one_to_many("tags", "Tag", "user_id"))
                .build()
                .unwrap(),
            Model::builder("Account")
                .column(Column::uuid("user_id"))
                .relationship(Relationship::many_to_one("user", "User", "user_id"))
                .build()
                .unwrap(),
            Model::builder("Tag")
                .column(Column::uuid("user_id"))
                .build()
                .unwrap(),
        ])
        .unwrap()
    }

    fn names(args: Value) -> Vec<String> {
        referenced_models(&registry(), &args).into_iter().collect()
    }

    #[test]
    fn test_empty_inputs() {
        for args in [json!(0), json!({}), json!([]), json!(""), Value::Null, json!({"_model": 1})] {
            assert!(names(args).is_empty());
        }
    }

    #[test]
    fn test_single_and_multiple() {
        assert_eq!(names(json!({"_model": "User"})), vec!["User"]);
        assert_eq!(
            names(json!([{"_model": "User"}, {"_model": "Account"}])),
            vec!["Account", "User"]
        );
    }

    #[test]
    fn test_foreign_key_paths() {
        assert_eq!(
            names(json!({"_model": "Account", "field": "user.name"})),
            vec!["Account", "User"]
        );
        assert_eq!(
            names(json!({"_model": "Account", "field": "user.name.tags"})),
            vec!["Account", "Tag", "User"]
        );
    }

    #[test]
    fn test_nested_data_specs() {
        assert_eq!(
            names(json!([{"_model": "Account"}, {"user": {"tags": true}, "_model": "Account"}])),
            vec!["Account", "Tag", "User"]
        );
        assert_eq!(names(json!({"_model": "Nope", "field": "x"})), Vec::<String>::new());
    }
}
