//! Stored function and procedure definitions
//!
//! Engines without native stored routines host them through a
//! [`RoutineRegistry`]; routine bodies are plain closures.

use crate::{ParameterDirection, Result, RowSet, SqlType, Value};
use std::sync::Arc;

/// One declared routine parameter
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineParameter {
    pub name: String,
    pub direction: ParameterDirection,
    pub sql_type: SqlType,
}

impl RoutineParameter {
    pub fn input(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            direction: ParameterDirection::In,
            sql_type,
        }
    }

    pub fn output(name: &str, sql_type: SqlType) -> Self {
        Self {
            direction: ParameterDirection::Out,
            ..Self::input(name, sql_type)
        }
    }

    pub fn in_out(name: &str, sql_type: SqlType) -> Self {
        Self {
            direction: ParameterDirection::InOut,
            ..Self::input(name, sql_type)
        }
    }
}

pub type FunctionBody = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

pub type ProcedureBody = Arc<dyn Fn(&mut dyn ProcedureContext) -> Result<()> + Send + Sync>;

/// A scalar function
#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<RoutineParameter>,
    pub returns: SqlType,
    pub body: FunctionBody,
}

impl FunctionDef {
    pub fn new<F>(name: &str, params: Vec<RoutineParameter>, returns: SqlType, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params,
            returns,
            body: Arc::new(body),
        }
    }
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// A procedure with IN, OUT and INOUT parameters
#[derive(Clone)]
pub struct ProcedureDef {
    pub name: String,
    pub params: Vec<RoutineParameter>,
    pub body: ProcedureBody,
}

impl ProcedureDef {
    pub fn new<F>(name: &str, params: Vec<RoutineParameter>, body: F) -> Self
    where
        F: Fn(&mut dyn ProcedureContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params,
            body: Arc::new(body),
        }
    }

    /// Index of a parameter, exact name first then case-insensitive
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .or_else(|| {
                self.params
                    .iter()
                    .position(|p| p.name.eq_ignore_ascii_case(name))
            })
    }
}

impl std::fmt::Debug for ProcedureDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// What a running procedure body can see and do
pub trait ProcedureContext {
    /// Current value of an IN or INOUT argument
    fn arg(&self, name: &str) -> Result<&Value>;

    /// Set an OUT or INOUT argument
    fn set(&mut self, name: &str, value: Value) -> Result<()>;

    /// Execute a statement on the calling connection
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query on the calling connection
    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet>;

    /// Identity generated by the most recent insert on the calling connection
    fn last_insert_id(&self) -> Result<i64>;
}

/// Engine-side catalog of hosted routines.
///
/// Creating a routine replaces one of the same name; dropping reports
/// whether anything was removed, so both are safe to repeat.
pub trait RoutineRegistry {
    fn create_function(&self, def: FunctionDef) -> Result<()>;

    fn drop_function(&self, name: &str) -> Result<bool>;

    fn create_procedure(&self, def: ProcedureDef) -> Result<()>;

    fn drop_procedure(&self, name: &str) -> Result<bool>;

    fn has_routine(&self, name: &str) -> bool;
}
