//! Model registry: name resolution and schema-wide checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::model::{Model, RelationKind, Relationship, snake_case};
use crate::error::{QueryError, QueryResult};

/// Every declared model, finalized and shareable.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: Vec<Arc<Model>>,
    by_name: BTreeMap<String, usize>,
}

/// An association table backing one or more many-to-many relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTable {
    pub table: String,
    pub keys: [String; 2],
}

impl Registry {
    /// Register `models`, declaring inverse relationships for every
    /// `backref` and checking that relationship targets exist.
    pub fn new(models: Vec<Model>) -> QueryResult<Self> {
        let mut models = models;

        let mut by_name = BTreeMap::new();
        for (i, model) in models.iter().enumerate() {
            if by_name.insert(model.name.clone(), i).is_some() {
                return Err(QueryError::Schema(format!(
                    "model {} registered twice",
                    model.name
                )));
            }
        }

        let mut inverses: Vec<(usize, Relationship)> = Vec::new();
        for model in &models {
            for rel in &model.relationships {
                let Some(&target) = by_name.get(&rel.target) else {
                    return Err(QueryError::Schema(format!(
                        "{}.{} targets unknown model {}",
                        model.name, rel.name, rel.target
                    )));
                };
                if let Some(backref) = &rel.backref {
                    if models[target].has_attribute(backref) {
                        continue;
                    }
                    inverses.push((target, rel.inverse(&model.name, backref)));
                }
            }
        }
        for (target, rel) in inverses {
            debug!(model = %models[target].name, relation = %rel.name, "declared backref");
            models[target].relationships.push(rel);
        }

        for model in &models {
            for rel in &model.relationships {
                let target = &models[by_name[&rel.target]];
                if let Some(fk) = rel.backref_fk() {
                    if target.column(fk).is_none() {
                        return Err(QueryError::Schema(format!(
                            "{}.{} expects column {}.{}",
                            model.name, rel.name, target.name, fk
                        )));
                    }
                }
            }
        }

        let mut registered = Vec::with_capacity(models.len());
        for mut model in models {
            model.check()?;
            model.finalize();
            registered.push(Arc::new(model));
        }
        Ok(Self {
            models: registered,
            by_name,
        })
    }

    /// Resolve a model by name, table name, or a naming variant of either.
    pub fn resolve(&self, name: &str) -> QueryResult<Arc<Model>> {
        if let Some(&i) = self.by_name.get(name) {
            return Ok(self.models[i].clone());
        }
        if let Some(model) = self.models.iter().find(|m| m.table == name) {
            return Ok(model.clone());
        }
        for variant in name_variants(name) {
            let found = self.models.iter().find(|m| {
                m.name.eq_ignore_ascii_case(&variant)
                    || m.table.eq_ignore_ascii_case(&variant)
                    || snake_case(&m.name) == variant
            });
            if let Some(model) = found {
                return Ok(model.clone());
            }
        }
        Err(QueryError::UnknownModel(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Model>> {
        self.by_name.get(name).map(|&i| &self.models[i])
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Association tables of every many-to-many relationship, once each.
    pub fn association_tables(&self) -> Vec<AssociationTable> {
        let mut tables: Vec<AssociationTable> = Vec::new();
        for model in &self.models {
            for rel in &model.relationships {
                if let RelationKind::ManyToMany {
                    table,
                    local_key,
                    remote_key,
                } = &rel.kind
                {
                    if tables.iter().all(|t| &t.table != table) {
                        tables.push(AssociationTable {
                            table: table.clone(),
                            keys: [local_key.clone(), remote_key.clone()],
                        });
                    }
                }
            }
        }
        tables
    }
}

/// Lowercased snake_case forms of `name`, then its singular forms.
fn name_variants(name: &str) -> Vec<String> {
    let base = snake_case(name).to_lowercase();
    let mut variants = vec![base.clone()];
    if let Some(stem) = base.strip_suffix("ies") {
        variants.push(format!("{}y", stem));
    }
    if let Some(stem) = base.strip_suffix("es") {
        variants.push(stem.to_string());
    }
    if let Some(stem) = base.strip_suffix('s') {
        variants.push(stem.to_string());
    }
    variants
}
