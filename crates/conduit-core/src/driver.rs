//! Database driver trait definition

use crate::{Connection, DataSourceConfig, Result};

/// Capabilities that a driver may support
#[derive(Debug, Clone, Default)]
pub struct DriverCapabilities {
    /// Supports transactions
    pub supports_transactions: bool,
    /// Supports savepoints
    pub supports_savepoints: bool,
    /// Executes queued batch members in one flush
    pub supports_batch_updates: bool,
    /// Supports stored procedures natively
    pub supports_stored_procedures: bool,
    /// Hosts functions and procedures through a routine registry
    pub supports_hosted_routines: bool,
    /// Maximum parameters per statement (None = no limit)
    pub max_parameters: Option<usize>,
}

/// Core driver trait that every engine adapter implements
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "sqlite")
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Human-readable name (e.g., "SQLite")
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        "0.1.0"
    }

    fn capabilities(&self) -> DriverCapabilities;

    /// Open a new connection
    fn connect(&self, config: &DataSourceConfig) -> Result<Box<dyn Connection>>;

    /// Open a connection and close it again
    fn test_connection(&self, config: &DataSourceConfig) -> Result<()> {
        self.connect(config)?.close()
    }
}
