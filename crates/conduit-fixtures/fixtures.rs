//! Schema bootstrap and shared fixtures for the scenario tests.
//!
//! The scenario schema is one table plus two routines:
//!
//! - `test(id, name)` with a generated identity
//! - `FUNCTION_TEST(str CHAR(100)) -> INTEGER`, the length of `str`
//!   ignoring its CHAR padding
//! - `PROCEDURE_TEST(INOUT inOutName VARCHAR(100), OUT outId INTEGER)`,
//!   which inserts `inOutName` into `test`, returns the new row's identity
//!   in `outId` and prefixes `inOutName` with `Hello,`
//!
//! [`create_fixture`] and [`drop_fixture`] are idempotent. Their failures
//! abort the test, so they report through `anyhow` rather than
//! `ConduitError`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use conduit_fixtures::fixtures::{data_source, fixture_conn, FixtureConnection};
//! use rstest::rstest;
//!
//! #[rstest]
//! fn test_count(fixture_conn: FixtureConnection) {
//!     let template = fixture_conn.template();
//!     let rows = template.query_for_list("SELECT * FROM test").unwrap();
//!     assert!(rows.is_empty());
//! }
//! ```

use anyhow::{Context, Result};
use conduit_core::{
    Connection, FunctionDef, ProcedureDef, RoutineParameter, SqlTemplate, SqlType, Value,
};
use conduit_drivers::{DataSource, DataSourceConfig};
use indoc::indoc;
use rstest::fixture;
use std::ops::Deref;

pub const TABLE_NAME: &str = "test";
pub const FUNCTION_NAME: &str = "FUNCTION_TEST";
pub const PROCEDURE_NAME: &str = "PROCEDURE_TEST";

const CREATE_TABLE_SQL: &str = indoc! {"
    CREATE TABLE IF NOT EXISTS test (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name VARCHAR(100)
    )
"};

/// `FUNCTION_TEST(str CHAR(100))`
pub fn function_test() -> FunctionDef {
    FunctionDef::new(
        FUNCTION_NAME,
        vec![RoutineParameter::input("str", SqlType::Char(100))],
        SqlType::Integer,
        |args| {
            let length = args[0]
                .as_str()
                .map_or(0, |s| s.trim_end_matches(' ').chars().count());
            Ok(Value::Int64(length as i64))
        },
    )
}

/// `PROCEDURE_TEST(INOUT inOutName VARCHAR(100), OUT outId INTEGER)`
pub fn procedure_test() -> ProcedureDef {
    ProcedureDef::new(
        PROCEDURE_NAME,
        vec![
            RoutineParameter::in_out("inOutName", SqlType::Varchar(100)),
            RoutineParameter::output("outId", SqlType::Integer),
        ],
        |ctx| {
            let name = ctx.arg("inOutName")?.clone();
            ctx.execute("INSERT INTO test(name) VALUES (?)", std::slice::from_ref(&name))?;
            let id = ctx.last_insert_id()?;
            ctx.set("outId", Value::Int64(id))?;
            let greeting = format!("Hello,{}", name.as_str().unwrap_or_default());
            ctx.set("inOutName", Value::String(greeting))
        },
    )
}

/// Create the scenario table and routines
#[tracing::instrument(skip(conn), fields(driver = conn.driver_name()))]
pub fn create_fixture(conn: &dyn Connection) -> Result<()> {
    conn.execute_sql(CREATE_TABLE_SQL)
        .context("failed to create table test")?;

    let routines = conn
        .routines()
        .context("driver cannot host the scenario routines")?;
    routines
        .create_function(function_test())
        .context("failed to create FUNCTION_TEST")?;
    routines
        .create_procedure(procedure_test())
        .context("failed to create PROCEDURE_TEST")?;

    tracing::debug!("fixture created");
    Ok(())
}

/// Drop the scenario table and routines; succeeds when they are already gone
#[tracing::instrument(skip(conn), fields(driver = conn.driver_name()))]
pub fn drop_fixture(conn: &dyn Connection) -> Result<()> {
    if let Some(routines) = conn.routines() {
        routines
            .drop_function(FUNCTION_NAME)
            .context("failed to drop FUNCTION_TEST")?;
        routines
            .drop_procedure(PROCEDURE_NAME)
            .context("failed to drop PROCEDURE_TEST")?;
    }
    conn.execute_sql("DROP TABLE IF EXISTS test")
        .context("failed to drop table test")?;

    tracing::debug!("fixture dropped");
    Ok(())
}

/// A connection with the scenario fixture in place.
///
/// The fixture is dropped again when this goes out of scope.
pub struct FixtureConnection {
    conn: Box<dyn Connection>,
}

impl FixtureConnection {
    pub fn open(source: &DataSource) -> Result<Self> {
        let conn = source.connection().context("failed to open connection")?;
        create_fixture(conn.as_ref())?;
        Ok(Self { conn })
    }

    pub fn template(&self) -> SqlTemplate<'_> {
        SqlTemplate::new(self.conn.as_ref())
    }

    /// Number of rows currently in `test`
    pub fn row_count(&self) -> Result<usize> {
        let rows = self
            .template()
            .query_for_list("SELECT * FROM test")
            .context("failed to count rows")?;
        Ok(rows.len())
    }
}

impl Deref for FixtureConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for FixtureConnection {
    fn drop(&mut self) {
        if let Err(e) = drop_fixture(self.conn.as_ref()) {
            tracing::warn!(error = %e, "failed to drop fixture");
        }
    }
}

/// Initialize logging for tests if not already initialized
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("conduit_core=debug,conduit_fixtures=debug"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Data source shared by every test of the run.
///
/// Each connection it opens is a private in-memory database.
#[fixture]
#[once]
pub fn data_source() -> DataSource {
    init_test_logging();
    DataSource::new(DataSourceConfig::sqlite_in_memory())
        .expect("in-memory SQLite data source should be available")
}

/// A fresh connection with the fixture created
#[fixture]
pub fn fixture_conn(data_source: &DataSource) -> FixtureConnection {
    FixtureConnection::open(data_source).expect("fixture should be created")
}
