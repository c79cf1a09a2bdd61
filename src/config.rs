//! Configuration from `crudite.toml`.
//!
//! ```toml
//! [database]
//! url = "sqlite://crudite.db?mode=rwc"
//! max_connections = 5
//!
//! [schema]
//! path = "schema.toml"
//!
//! [log]
//! filter = "crudite=info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{QueryError, QueryResult};

pub const CONFIG_FILE: &str = "crudite.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub schema: SchemaConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Each connection to an in-memory SQLite database sees its own
    /// database, so those are limited to one.
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite")
            && (self.url.contains(":memory:") || self.url.contains("mode=memory"))
    }

    pub fn pool_size(&self) -> u32 {
        if self.is_in_memory() {
            1
        } else {
            self.max_connections.max(1)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "crudite=info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> QueryResult<Self> {
        toml::from_str(text).map_err(|e| QueryError::Config(e.to_string()))
    }

    pub fn load_from(path: &Path) -> QueryResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| QueryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text).map_err(|e| QueryError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `explicit` if given, else the first of `./crudite.toml` and
    /// `<config dir>/crudite/crudite.toml` that exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> QueryResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        for path in Self::search_paths() {
            if path.is_file() {
                debug!(path = %path.display(), "loading config");
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("crudite").join(CONFIG_FILE));
        }
        paths
    }
}
