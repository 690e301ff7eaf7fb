//! Conduit Drivers - Database driver implementations
//!
//! This crate provides the driver registry, the `DataSource` connection
//! factory, and the engine crates enabled through cargo features.

#[cfg(feature = "sqlite")]
pub use conduit_driver_sqlite as sqlite;

mod data_source;
mod registry;

pub use data_source::DataSource;
pub use registry::DriverRegistry;

/// Re-export commonly used types from conduit-core
pub use conduit_core::{
    ConduitError, Connection, DataSourceConfig, DatabaseDriver, DriverCapabilities, Result,
    SqlTemplate, Value,
};
