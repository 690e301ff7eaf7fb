//! Hosted functions and procedures
//!
//! SQLite has no stored routines. Functions are registered with the engine
//! as scalar functions, so they work anywhere an expression does.
//! Procedures live in a per-connection catalog and run as host code
//! against the calling connection, inside a savepoint.

use conduit_core::{
    ConduitError, FunctionDef, ParameterId, ProcedureContext, ProcedureDef, Result, RowSet,
    Value,
};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection as RusqliteConnection, params_from_iter};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use crate::error::map_error;
use crate::values::{collect_rows, value_from_ref, value_to_rusqlite, values_to_rusqlite};

/// Routines known to one connection, keyed by upper-cased name
#[derive(Debug, Default)]
pub(crate) struct RoutineCatalog {
    functions: HashMap<String, FunctionDef>,
    procedures: HashMap<String, ProcedureDef>,
}

impl RoutineCatalog {
    pub(crate) fn procedure(&self, name: &str) -> Option<ProcedureDef> {
        self.procedures.get(&name.to_ascii_uppercase()).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        let key = name.to_ascii_uppercase();
        self.functions.contains_key(&key) || self.procedures.contains_key(&key)
    }

    pub(crate) fn insert_function(&mut self, def: FunctionDef) -> Option<FunctionDef> {
        self.functions.insert(def.name.to_ascii_uppercase(), def)
    }

    pub(crate) fn remove_function(&mut self, name: &str) -> Option<FunctionDef> {
        self.functions.remove(&name.to_ascii_uppercase())
    }

    pub(crate) fn insert_procedure(&mut self, def: ProcedureDef) -> Option<ProcedureDef> {
        self.procedures.insert(def.name.to_ascii_uppercase(), def)
    }

    pub(crate) fn remove_procedure(&mut self, name: &str) -> Option<ProcedureDef> {
        self.procedures.remove(&name.to_ascii_uppercase())
    }
}

fn arity(def: &FunctionDef) -> Result<i32> {
    i32::try_from(def.params.len())
        .map_err(|_| ConduitError::NotSupported(format!("too many parameters for {}", def.name)))
}

/// Register `def` as a scalar function on `conn`.
///
/// Arguments are coerced to their declared types before the body runs and
/// the result is coerced to the declared return type.
pub(crate) fn register_function(conn: &RusqliteConnection, def: &FunctionDef) -> Result<()> {
    let body = AssertUnwindSafe(def.body.clone());
    let params = def.params.clone();
    let returns = def.returns;

    conn.create_scalar_function(def.name.as_str(), arity(def)?, FunctionFlags::SQLITE_UTF8, move |ctx| {
        let body = &body;
        let args = params
            .iter()
            .enumerate()
            .map(|(idx, param)| param.sql_type.coerce(value_from_ref(ctx.get_raw(idx))))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        let result = (body.0)(&args)
            .and_then(|value| returns.coerce(value))
            .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        Ok(value_to_rusqlite(&result))
    })
    .map_err(map_error)
}

pub(crate) fn unregister_function(conn: &RusqliteConnection, def: &FunctionDef) -> Result<()> {
    conn.remove_function(def.name.as_str(), arity(def)?).map_err(map_error)
}

/// Execution state handed to a procedure body
struct SqliteProcedureContext<'a> {
    conn: &'a RusqliteConnection,
    def: &'a ProcedureDef,
    args: Vec<Value>,
}

impl SqliteProcedureContext<'_> {
    fn index_of(&self, name: &str) -> Result<usize> {
        self.def.param_index(name).ok_or_else(|| {
            ConduitError::binding(
                name,
                format!("procedure {} has no such parameter", self.def.name),
            )
        })
    }
}

impl ProcedureContext for SqliteProcedureContext<'_> {
    fn arg(&self, name: &str) -> Result<&Value> {
        let idx = self.index_of(name)?;
        Ok(&self.args[idx])
    }

    fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let idx = self.index_of(name)?;
        let param = &self.def.params[idx];
        if !param.direction.is_output() {
            return Err(ConduitError::binding(
                name,
                "IN parameters cannot be assigned by the procedure",
            ));
        }
        self.args[idx] = value;
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_error)?;
        let changed = stmt
            .execute(params_from_iter(values_to_rusqlite(params).iter()))
            .map_err(map_error)?;
        Ok(changed as u64)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_error)?;
        collect_rows(&mut stmt, &values_to_rusqlite(params))
    }

    fn last_insert_id(&self) -> Result<i64> {
        Ok(self.conn.last_insert_rowid())
    }
}

const PROCEDURE_SAVEPOINT: &str = "conduit_procedure";

/// Run a procedure with arguments in declared order.
///
/// IN and INOUT arguments are coerced to their declared types first. The
/// returned vector holds every argument after the body ran, so OUT and
/// INOUT positions carry their assigned values.
pub(crate) fn run_procedure(
    conn: &RusqliteConnection,
    def: &ProcedureDef,
    args: Vec<Value>,
) -> Result<Vec<Value>> {
    let args = def
        .params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(idx, (param, value))| {
            if param.direction.is_input() {
                param
                    .sql_type
                    .coerce(value)
                    .map_err(|e| ConduitError::binding(ParameterId::Position(idx + 1), e.to_string()))
            } else {
                Ok(Value::Null)
            }
        })
        .collect::<Result<Vec<_>>>()?;

    conn.execute_batch(&format!("SAVEPOINT {}", PROCEDURE_SAVEPOINT))
        .map_err(map_error)?;

    let mut ctx = SqliteProcedureContext { conn, def, args };
    match (def.body)(&mut ctx) {
        Ok(()) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {}", PROCEDURE_SAVEPOINT))
                .map_err(map_error)?;
            Ok(ctx.args)
        }
        Err(e) => {
            tracing::debug!(procedure = %def.name, error = %e, "procedure failed, rolling back its work");
            let undo = format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
                PROCEDURE_SAVEPOINT
            );
            if let Err(rollback_error) = conn.execute_batch(&undo) {
                tracing::error!(error = %rollback_error, "failed to undo procedure work");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{RoutineParameter, SqlType};
    use pretty_assertions::assert_eq;

    fn conn() -> RusqliteConnection {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE test(id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(100))")
            .unwrap();
        conn
    }

    #[test]
    fn test_function_sees_padded_char_argument() {
        let conn = conn();
        let def = FunctionDef::new(
            "raw_length",
            vec![RoutineParameter::input("s", SqlType::Char(8))],
            SqlType::Integer,
            |args| Ok(Value::Int64(args[0].as_str().map_or(0, |s| s.chars().count() as i64))),
        );
        register_function(&conn, &def).unwrap();
        let len: i64 = conn
            .query_row("SELECT raw_length('abc')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(len, 8);

        unregister_function(&conn, &def).unwrap();
        assert!(conn.prepare("SELECT raw_length('abc')").is_err());
    }

    #[test]
    fn test_function_error_fails_the_statement() {
        let conn = conn();
        let def = FunctionDef::new(
            "always_fails",
            vec![],
            SqlType::Integer,
            |_| Err(ConduitError::Mapping("nope".into())),
        );
        register_function(&conn, &def).unwrap();
        let err = conn
            .query_row("SELECT always_fails()", [], |row| row.get::<_, i64>(0))
            .unwrap_err();
        assert!(err.to_string().contains("nope"), "{}", err);
    }

    #[test]
    fn test_failed_procedure_is_undone() {
        let conn = conn();
        let def = ProcedureDef::new("P", vec![], |ctx| {
            ctx.execute("INSERT INTO test(name) VALUES ('x')", &[])?;
            Err(ConduitError::Mapping("abort".into()))
        });
        assert!(run_procedure(&conn, &def, vec![]).is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM test", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_procedure_cannot_assign_in_parameter() {
        let conn = conn();
        let def = ProcedureDef::new(
            "P",
            vec![RoutineParameter::input("a", SqlType::Integer)],
            |ctx| ctx.set("a", Value::Int32(1)),
        );
        let err = run_procedure(&conn, &def, vec![Value::Int32(0)]).unwrap_err();
        assert!(err.is_binding_error());
    }

    #[test]
    fn test_catalog_is_case_insensitive() {
        let mut catalog = RoutineCatalog::default();
        catalog.insert_procedure(ProcedureDef::new("Procedure_Test", vec![], |_| Ok(())));
        assert!(catalog.contains("PROCEDURE_TEST"));
        assert!(catalog.procedure("procedure_test").is_some());
        assert!(catalog.remove_procedure("PROCEDURE_test").is_some());
        assert!(!catalog.contains("procedure_test"));
    }
}
