//! Client-facing crud spec of a model.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use super::model::{Attribute, Model};

impl Model {
    /// Describe every readable, updatable or creatable field, plus any field
    /// declared only in the policy's `data_spec`.
    ///
    /// Returns `None` for models without a crud policy.
    pub fn crud_spec(&self) -> Option<Value> {
        let policy = self.policy.as_ref()?;
        let perms = self.perms()?;

        let names: BTreeSet<&str> = perms
            .read
            .iter()
            .chain(&perms.update)
            .chain(&perms.create)
            .map(String::as_str)
            .chain(policy.data_spec.keys().map(String::as_str))
            .collect();

        let mut fields = Map::new();
        for name in names {
            let mut field = match policy.data_spec.get(name) {
                Some(Value::Object(manual)) => manual.clone(),
                _ => Map::new(),
            };

            let validators = self.validator_spec(name, &field);
            if !validators.is_empty() {
                field.insert("validators".into(), Value::Object(validators));
            }
            field.insert("name".into(), json!(name));

            let Some(attr) = self.attribute(name) else {
                // declared only in data_spec
                fields.insert(name.to_string(), Value::Object(field));
                continue;
            };

            let read = perms.read.contains(name);
            let update = perms.update.contains(name);
            let create = perms.create.contains(name);
            if !(read || update || create) {
                continue;
            }
            field.insert("read".into(), json!(read));
            field.insert("update".into(), json!(update));
            field.insert("create".into(), json!(create));

            if !field.contains_key("desc") {
                if let Some(desc) = attr.desc() {
                    field.insert("desc".into(), json!(desc));
                }
            }

            if !field.contains_key("type") {
                let tag = self
                    .descriptor(name)
                    .map(|d| d.type_tag)
                    .unwrap_or("auto");
                field.insert("type".into(), json!(tag));
                let default = match attr {
                    Attribute::Column(c) => c.default.clone(),
                    Attribute::Constant(c) => Some(c.value.clone()),
                    _ => None,
                };
                if let Some(default) = default.filter(|_| tag != "auto") {
                    field.insert("defaultValue".into(), default);
                }
            }

            if let Attribute::Relation(rel) = attr {
                field.insert("_model".into(), json!(rel.target));
            }
            fields.insert(name.to_string(), Value::Object(field));
        }

        Some(json!({ "fields": fields }))
    }

    /// Validator hints for `name`; keys given manually in the field's
    /// `validators` entry win.
    fn validator_spec(&self, name: &str, field: &Map<String, Value>) -> Map<String, Value> {
        let mut merged: Map<String, Value> = self
            .validators_for(name)
            .flat_map(|v| v.spec().iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect();
        if let Some(Value::Object(manual)) = field.get("validators") {
            for (k, v) in manual {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}
