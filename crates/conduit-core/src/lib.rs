//! Conduit Core - data access over parameterized SQL
//!
//! This crate provides the traits and types that engine drivers implement
//! and that callers program against:
//!
//! - `StatementSpec` / `ParameterSpec` / `BatchSpec` - immutable statement descriptions
//! - `ParameterBinder` - attaches typed values to placeholders
//! - `StatementExecutor` / `BatchExecutor` - run statements and batches
//! - `RowMapper`, `ResultSetExtractor`, `OutParameters` - result mapping
//! - `SqlTemplate` - the facade bundling all of the above
//! - `Connection`, `Statement`, `DatabaseDriver`, `RoutineRegistry` - engine seams
//! - `TransactionScope` - scoped transactions with rollback on drop

mod batch;
mod binder;
mod config;
mod connection;
mod driver;
mod error;
mod executor;
mod mapper;
mod params;
mod routine;
pub mod sql;
mod sql_type;
mod template;
pub mod transaction;
mod types;

#[cfg(test)]
mod test_support;

pub use batch::*;
pub use binder::*;
pub use config::*;
pub use connection::*;
pub use driver::*;
pub use error::*;
pub use executor::*;
pub use mapper::*;
pub use params::*;
pub use routine::*;
pub use sql::StatementKind;
pub use sql_type::*;
pub use template::*;
pub use transaction::{Savepoint, TransactionScope, in_transaction};
pub use types::*;
