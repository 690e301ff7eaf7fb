//! Conduit scenario suite
//!
//! Schema bootstrap for the scenario tests plus the tests themselves. Each
//! test gets a fresh in-memory SQLite connection from a data source built
//! once per run and passed to the test through an rstest fixture.
//!
//! # Test Categories
//!
//! - Callable statements (functions, procedures with INOUT and OUT parameters)
//! - Batches (literal SQL, parameterized, named, partial failure)
//! - Single statements (updates, queries, result mapping, error mapping)
//! - Transactions (scopes, savepoints, rollback on drop)
//! - Configuration (TOML files, file-backed databases, driver parameters)
//!
//! # Usage
//!
//! ```bash
//! cargo test -p conduit-fixtures
//!
//! # With engine logging
//! RUST_LOG=conduit_core=debug cargo test -p conduit-fixtures -- --nocapture
//! ```

#![warn(clippy::all)]

pub mod fixtures;

#[cfg(test)]
mod batch_tests;

#[cfg(test)]
mod callable_tests;

#[cfg(test)]
mod config_tests;

#[cfg(test)]
mod statement_tests;

#[cfg(test)]
mod transaction_tests;
