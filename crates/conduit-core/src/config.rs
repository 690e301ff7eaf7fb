//! Data source configuration
//!
//! A [`DataSourceConfig`] names the driver, the database, free-form driver
//! parameters and batch options. It can be built in code or loaded from TOML:
//!
//! ```toml
//! driver = "sqlite"
//! database = "~/data/app.db"
//!
//! [params]
//! foreign_keys = true
//! busy_timeout_ms = 5000
//!
//! [batch]
//! policy = "continue_on_error"
//! max_batch_size = 500
//! ```

use crate::{BatchOptions, ConduitError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Database name that selects a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Connection factory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Driver ID (e.g., "sqlite")
    pub driver: String,
    /// Database name or file path
    #[serde(default)]
    pub database: Option<String>,
    /// Additional driver parameters
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub batch: BatchOptions,
}

impl DataSourceConfig {
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            database: None,
            params: HashMap::new(),
            batch: BatchOptions::default(),
        }
    }

    /// Create a SQLite configuration
    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new("sqlite");
        config.database = Some(database_path.to_string());
        config
    }

    /// SQLite configuration for a private in-memory database
    pub fn sqlite_in_memory() -> Self {
        Self::new_sqlite(IN_MEMORY)
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), driver = %config.driver, "loaded data source config");
        Ok(config)
    }

    /// Set a driver parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_batch_options(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(ConduitError::Configuration("driver must not be empty".into()));
        }
        if self.batch.max_batch_size == Some(0) {
            return Err(ConduitError::Configuration(
                "batch.max_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get a parameter rendered as a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(match val {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        match key {
            "database" | "path" => self.database.clone(),
            _ => None,
        }
    }

    /// Get a boolean parameter. Accepts booleans, 0/1 and "true"/"false".
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        let Some(val) = self.params.get(key) else {
            return Ok(None);
        };
        let parsed = match val {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| invalid_param(key, val, "a boolean"))
    }

    /// Get a non-negative integer parameter
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        let Some(val) = self.params.get(key) else {
            return Ok(None);
        };
        let parsed = match val {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| invalid_param(key, val, "a non-negative integer"))
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.database.as_deref(), None | Some("") | Some(IN_MEMORY))
    }

    /// Database file path with a leading `~/` expanded to the home directory.
    ///
    /// `None` for in-memory databases.
    pub fn database_path(&self) -> Result<Option<PathBuf>> {
        if self.is_in_memory() {
            return Ok(None);
        }
        let raw = self.database.as_deref().unwrap_or_default();
        match raw.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    ConduitError::Configuration("cannot expand '~': no home directory".into())
                })?;
                Ok(Some(home.join(rest)))
            }
            None => Ok(Some(PathBuf::from(raw))),
        }
    }
}

fn invalid_param(key: &str, value: &serde_json::Value, expected: &str) -> ConduitError {
    ConduitError::Configuration(format!(
        "parameter '{}' must be {}, got {}",
        key, expected, value
    ))
}
