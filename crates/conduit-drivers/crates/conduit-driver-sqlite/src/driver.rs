//! SQLite driver implementation

use conduit_core::{Connection, DataSourceConfig, DatabaseDriver, DriverCapabilities, Result};

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseDriver for SqliteDriver {
    fn id(&self) -> &'static str {
        "sqlite"
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_transactions: true,
            supports_savepoints: true,
            supports_batch_updates: true,
            supports_stored_procedures: false,
            supports_hosted_routines: true,
            max_parameters: Some(999),
        }
    }

    #[tracing::instrument(skip(self, config), fields(database = config.database.as_deref()))]
    fn connect(&self, config: &DataSourceConfig) -> Result<Box<dyn Connection>> {
        let conn = SqliteConnection::from_config(config).inspect_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
        })?;
        Ok(Box::new(conn))
    }
}
