//! SQLite connection implementation

use conduit_core::sql::{CallEscape, reports_row_count};
use conduit_core::{
    BatchOutcome, BatchPolicy, ConduitError, Connection, DataSourceConfig, FunctionDef,
    ProcedureDef, Result, RoutineRegistry, Statement, StatementKind,
};
use parking_lot::RwLock;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use crate::error::map_error;
use crate::routines::{RoutineCatalog, register_function, unregister_function};
use crate::statement::{SqliteStatement, Target};

const DEFAULT_STATEMENT_CACHE: usize = 32;

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: RusqliteConnection,
    routines: RwLock<RoutineCatalog>,
}

impl SqliteConnection {
    /// Open a private in-memory database with default settings
    pub fn open_in_memory() -> Result<Self> {
        Self::from_config(&DataSourceConfig::sqlite_in_memory())
    }

    /// Open the database described by `config`
    #[tracing::instrument(skip(config), fields(database = config.database.as_deref()))]
    pub fn from_config(config: &DataSourceConfig) -> Result<Self> {
        let conn = match config.database_path()? {
            None => RusqliteConnection::open_in_memory().map_err(|e| {
                ConduitError::Connection(format!("Failed to open in-memory database: {}", e))
            })?,
            Some(path) => Self::open_file(&path)?,
        };

        let foreign_keys = config.get_bool("foreign_keys")?.unwrap_or(true);
        conn.pragma_update(None, "foreign_keys", if foreign_keys { "ON" } else { "OFF" })
            .map_err(|e| ConduitError::Connection(format!("Failed to set foreign keys: {}", e)))?;

        if let Some(ms) = config.get_u64("busy_timeout_ms")? {
            conn.busy_timeout(Duration::from_millis(ms)).map_err(|e| {
                ConduitError::Connection(format!("Failed to set busy timeout: {}", e))
            })?;
        }

        let cache = config
            .get_u64("statement_cache_capacity")?
            .map_or(DEFAULT_STATEMENT_CACHE, |n| n as usize);
        conn.set_prepared_statement_cache_capacity(cache);

        tracing::info!(foreign_keys, "SQLite connection established");
        Ok(Self {
            conn,
            routines: RwLock::new(RoutineCatalog::default()),
        })
    }

    fn open_file(path: &Path) -> Result<RusqliteConnection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConduitError::Connection(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
            ConduitError::Connection(format!(
                "Failed to open SQLite database at '{}': {}",
                path.display(),
                e
            ))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ConduitError::Connection(format!("Failed to set journal mode: {}", e)))?;
        Ok(conn)
    }

    /// Identity generated by the most recent insert
    pub fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn prepare_call(&self, sql: &str) -> Result<Target<'_>> {
        let trimmed = sql.trim();
        let escape = if trimmed.starts_with('{') {
            CallEscape::parse(trimmed)?
        } else {
            CallEscape::parse(&format!("{{{}}}", trimmed))?
        };

        if let Some(def) = self.routines.read().procedure(&escape.routine) {
            if escape.has_return {
                return Err(ConduitError::execution(
                    "42000",
                    format!("procedure {} does not return a value", def.name),
                ));
            }
            if escape.arguments.len() != def.params.len()
                || escape.arguments.iter().any(|a| a != "?")
            {
                return Err(ConduitError::execution(
                    "42000",
                    format!(
                        "procedure {} takes {} parameters, each passed as '?'",
                        def.name,
                        def.params.len()
                    ),
                ));
            }
            return Ok(Target::Procedure(def));
        }

        let select = format!("SELECT {}({})", escape.routine, escape.arguments.join(", "));
        tracing::trace!(rewritten = %select, "function call rewritten");
        let stmt = self.conn.prepare_cached(&select).map_err(map_error)?;
        Ok(Target::Function {
            stmt,
            has_return: escape.has_return,
        })
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("in_transaction", &!self.conn.is_autocommit())
            .field("routines", &*self.routines.read())
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn prepare(&self, sql: &str, kind: StatementKind) -> Result<Box<dyn Statement + '_>> {
        let target = match kind {
            StatementKind::Callable => self.prepare_call(sql)?,
            StatementKind::Update | StatementKind::Query => {
                Target::Sql(self.conn.prepare_cached(sql).map_err(map_error)?)
            }
        };
        Ok(Box::new(SqliteStatement::new(&self.conn, target)))
    }

    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn execute_sql(&self, sql: &str) -> Result<u64> {
        if reports_row_count(sql) {
            let changed = self.conn.execute(sql, []).map_err(map_error)?;
            tracing::debug!(affected_rows = changed, "statement executed");
            Ok(changed as u64)
        } else {
            self.conn.execute_batch(sql).map_err(map_error)?;
            Ok(0)
        }
    }

    fn execute_sql_batch(
        &self,
        statements: &[String],
        policy: BatchPolicy,
    ) -> Result<Vec<BatchOutcome>> {
        let mut outcomes = Vec::with_capacity(statements.len());
        let mut stopped = false;
        for (member, sql) in statements.iter().enumerate() {
            if stopped {
                outcomes.push(BatchOutcome::NotExecuted);
                continue;
            }
            match self.execute_sql(sql) {
                Ok(changed) => outcomes.push(BatchOutcome::Succeeded(changed)),
                Err(e) => {
                    tracing::debug!(member, error = %e, "batch statement failed");
                    outcomes.push(BatchOutcome::failed(&e));
                    stopped = policy == BatchPolicy::StopOnFirstError;
                }
            }
        }
        Ok(outcomes)
    }

    fn is_in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn routines(&self) -> Option<&dyn RoutineRegistry> {
        Some(self)
    }

    fn close(self: Box<Self>) -> Result<()> {
        tracing::debug!("closing SQLite connection");
        self.conn.close().map_err(|(_, e)| map_error(e))
    }
}

impl RoutineRegistry for SqliteConnection {
    fn create_function(&self, def: FunctionDef) -> Result<()> {
        let mut routines = self.routines.write();
        if let Some(previous) = routines.remove_function(&def.name) {
            unregister_function(&self.conn, &previous)?;
        }
        register_function(&self.conn, &def)?;
        tracing::debug!(function = %def.name, "function created");
        routines.insert_function(def);
        Ok(())
    }

    fn drop_function(&self, name: &str) -> Result<bool> {
        let mut routines = self.routines.write();
        match routines.remove_function(name) {
            Some(def) => {
                unregister_function(&self.conn, &def)?;
                tracing::debug!(function = %def.name, "function dropped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn create_procedure(&self, def: ProcedureDef) -> Result<()> {
        tracing::debug!(procedure = %def.name, "procedure created");
        self.routines.write().insert_procedure(def);
        Ok(())
    }

    fn drop_procedure(&self, name: &str) -> Result<bool> {
        Ok(self.routines.write().remove_procedure(name).is_some())
    }

    fn has_routine(&self, name: &str) -> bool {
        self.routines.read().contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{RoutineParameter, SqlType, Value};
    use pretty_assertions::assert_eq;

    fn open() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_sql("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT UNIQUE)")
            .unwrap();
        conn
    }

    #[test]
    fn test_prepared_statement_parameter_count() {
        let conn = open();
        let stmt = conn
            .prepare("INSERT INTO t(name) VALUES (?)", StatementKind::Update)
            .unwrap();
        assert_eq!(stmt.parameter_count(), 1);
    }

    #[test]
    fn test_ddl_reports_zero_after_insert() {
        let conn = open();
        assert_eq!(conn.execute_sql("INSERT INTO t(name) VALUES ('a')").unwrap(), 1);
        assert_eq!(conn.execute_sql("CREATE TABLE u(x INT)").unwrap(), 0);
    }

    #[test]
    fn test_literal_batch_continues_after_failure() {
        let conn = open();
        let outcomes = conn
            .execute_sql_batch(
                &[
                    "INSERT INTO t(name) VALUES ('a')".to_string(),
                    "INSERT INTO t(name) VALUES ('a')".to_string(),
                    "INSERT INTO t(name) VALUES ('b')".to_string(),
                ],
                BatchPolicy::ContinueOnError,
            )
            .unwrap();
        assert_eq!(outcomes[0], BatchOutcome::Succeeded(1));
        assert!(matches!(&outcomes[1], BatchOutcome::Failed { sql_state, .. } if sql_state == "23000"));
        assert_eq!(outcomes[2], BatchOutcome::Succeeded(1));
    }

    #[test]
    fn test_transaction_state_follows_engine() {
        let conn = open();
        assert!(!conn.is_in_transaction());
        conn.begin().unwrap();
        assert!(conn.is_in_transaction());
        conn.rollback().unwrap();
        assert!(!conn.is_in_transaction());
    }

    #[test]
    fn test_unknown_routine_is_rejected_at_prepare() {
        let conn = open();
        let err = conn
            .prepare("{call NO_SUCH_ROUTINE(?)}", StatementKind::Callable)
            .err()
            .unwrap();
        assert_eq!(err.sql_state(), Some("42000"));
    }

    #[test]
    fn test_recreating_a_function_replaces_it() {
        let conn = open();
        let make = |result: i64| {
            FunctionDef::new(
                "answer",
                vec![RoutineParameter::input("x", SqlType::Integer)],
                SqlType::BigInt,
                move |_| Ok(Value::Int64(result)),
            )
        };
        conn.create_function(make(1)).unwrap();
        conn.create_function(make(2)).unwrap();
        let rows = conn
            .prepare("SELECT answer(0)", StatementKind::Query)
            .unwrap()
            .execute_query()
            .unwrap();
        let row = rows.into_cursor().next().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int64(2)));

        assert!(conn.drop_function("ANSWER").unwrap());
        assert!(!conn.drop_function("answer").unwrap());
        assert!(!conn.has_routine("answer"));
    }

    #[test]
    fn test_procedure_argument_count_checked() {
        let conn = open();
        conn.create_procedure(ProcedureDef::new(
            "p",
            vec![RoutineParameter::input("a", SqlType::Integer)],
            |_| Ok(()),
        ))
        .unwrap();
        let err = conn
            .prepare("{call p(?, ?)}", StatementKind::Callable)
            .err()
            .unwrap();
        assert_eq!(err.sql_state(), Some("42000"));
        assert!(conn.prepare("{call p(?)}", StatementKind::Callable).is_ok());
        assert!(conn.prepare("CALL p(?)", StatementKind::Callable).is_ok());
    }

    #[test]
    fn test_file_database_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataSourceConfig::new_sqlite(
            dir.path().join("missing/app.db").to_str().unwrap(),
        );
        assert!(matches!(
            SqliteConnection::from_config(&config),
            Err(ConduitError::Connection(_))
        ));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let config = DataSourceConfig::new_sqlite(path.to_str().unwrap());
        {
            let conn = SqliteConnection::from_config(&config).unwrap();
            conn.execute_sql("CREATE TABLE t(x INT)").unwrap();
            conn.execute_sql("INSERT INTO t VALUES (1)").unwrap();
        }
        let conn = SqliteConnection::from_config(&config).unwrap();
        let rows = conn
            .prepare("SELECT x FROM t", StatementKind::Query)
            .unwrap()
            .execute_query()
            .unwrap();
        assert_eq!(rows.row_count(), 1);
    }
}
