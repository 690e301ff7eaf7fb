//! Connection factory built from configuration

use conduit_core::{
    ConduitError, Connection, DataSourceConfig, DatabaseDriver, Result, SqlTemplate,
};
use std::sync::Arc;

use crate::DriverRegistry;

/// Hands out connections for one configured database.
///
/// Built once and passed explicitly to whatever needs connections. Each
/// call to [`connection`](Self::connection) opens a fresh connection; an
/// in-memory SQLite database is private to the connection that opened it.
#[derive(Clone)]
pub struct DataSource {
    driver: Arc<dyn DatabaseDriver>,
    config: DataSourceConfig,
}

impl DataSource {
    /// Resolve the configured driver from the built-in drivers
    pub fn new(config: DataSourceConfig) -> Result<Self> {
        Self::from_registry(&DriverRegistry::with_defaults(), config)
    }

    #[tracing::instrument(skip(registry, config), fields(driver = %config.driver))]
    pub fn from_registry(registry: &DriverRegistry, config: DataSourceConfig) -> Result<Self> {
        config.validate()?;
        let driver = registry.get(&config.driver).ok_or_else(|| {
            ConduitError::Configuration(format!(
                "unknown driver '{}' (available: {})",
                config.driver,
                registry.list().join(", ")
            ))
        })?;
        tracing::debug!(driver = driver.name(), "data source created");
        Ok(Self { driver, config })
    }

    /// Load a TOML configuration file and resolve its driver
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(DataSourceConfig::load(path)?)
    }

    /// Open a new connection
    pub fn connection(&self) -> Result<Box<dyn Connection>> {
        self.driver.connect(&self.config)
    }

    /// Open a connection and run `f` with a template over it.
    ///
    /// The connection is closed afterwards whether or not `f` succeeded.
    pub fn with_template<T>(&self, f: impl FnOnce(&SqlTemplate<'_>) -> Result<T>) -> Result<T> {
        let conn = self.connection()?;
        let template = SqlTemplate::with_batch_options(conn.as_ref(), self.config.batch.clone());
        let result = f(&template);
        drop(template);
        if let Err(e) = conn.close() {
            tracing::warn!(error = %e, "failed to close connection");
        }
        result
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn driver(&self) -> &dyn DatabaseDriver {
        self.driver.as_ref()
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("driver", &self.driver.id())
            .field("config", &self.config)
            .finish()
    }
}
