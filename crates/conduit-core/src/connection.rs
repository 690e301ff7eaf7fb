//! Connection and statement traits implemented by engine drivers

use crate::{ConduitError, Result, RoutineRegistry, RowSet, SqlType, StatementKind, Value};
use serde::{Deserialize, Serialize};

/// How a batch reacts when one of its members fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Stop at the first failing member; later members are not executed
    #[default]
    StopOnFirstError,
    /// Execute every member regardless of earlier failures
    ContinueOnError,
}

/// Batch execution options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub policy: BatchPolicy,
    /// Flush every `max_batch_size` members instead of once at the end
    pub max_batch_size: Option<usize>,
}

/// Outcome of one batch member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Succeeded(u64),
    Failed { sql_state: String, message: String },
    NotExecuted,
}

impl BatchOutcome {
    pub fn failed(error: &ConduitError) -> Self {
        BatchOutcome::Failed {
            sql_state: error
                .sql_state()
                .unwrap_or(crate::SQL_STATE_GENERAL)
                .to_string(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Succeeded(_))
    }
}

/// Raw output of a callable statement, before type coercion
#[derive(Debug, Default)]
pub struct CallOutput {
    /// Values of registered OUT/INOUT positions
    pub out_values: Vec<(usize, Value)>,
    /// Result sets returned by the routine, in order
    pub result_sets: Vec<RowSet>,
}

impl CallOutput {
    pub fn value_at(&self, position: usize) -> Option<&Value> {
        self.out_values
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, v)| v)
    }
}

/// A database connection
pub trait Connection: Send {
    /// Get the driver name (e.g., "sqlite")
    fn driver_name(&self) -> &str;

    /// Prepare a statement. The statement is released when dropped.
    fn prepare(&self, sql: &str, kind: StatementKind) -> Result<Box<dyn Statement + '_>>;

    /// Execute an unparameterized statement and return its update count
    fn execute_sql(&self, sql: &str) -> Result<u64>;

    /// Execute distinct literal SQL statements as one batch
    fn execute_sql_batch(&self, statements: &[String], policy: BatchPolicy)
    -> Result<Vec<BatchOutcome>>;

    /// Begin a transaction
    fn begin(&self) -> Result<()> {
        self.execute_sql("BEGIN").map(|_| ())
    }

    /// Commit the current transaction
    fn commit(&self) -> Result<()> {
        self.execute_sql("COMMIT").map(|_| ())
    }

    /// Roll back the current transaction
    fn rollback(&self) -> Result<()> {
        self.execute_sql("ROLLBACK").map(|_| ())
    }

    /// Whether a transaction is currently open
    fn is_in_transaction(&self) -> bool;

    fn savepoint(&self, name: &str) -> Result<()> {
        self.execute_sql(&format!("SAVEPOINT {}", name)).map(|_| ())
    }

    fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.execute_sql(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .map(|_| ())
    }

    fn release_savepoint(&self, name: &str) -> Result<()> {
        self.execute_sql(&format!("RELEASE SAVEPOINT {}", name))
            .map(|_| ())
    }

    /// Get the routine registry if the engine can host functions and procedures
    fn routines(&self) -> Option<&dyn RoutineRegistry> {
        None
    }

    /// Close the connection
    fn close(self: Box<Self>) -> Result<()>;
}

/// A prepared statement on a live connection
pub trait Statement {
    /// Number of bind positions the engine sees
    fn parameter_count(&self) -> usize;

    /// Bind a value to a 1-based position
    fn bind(&mut self, position: usize, value: &Value) -> Result<()>;

    /// Register a 1-based position as OUT with the given type
    fn register_out(&mut self, position: usize, sql_type: SqlType) -> Result<()>;

    fn execute_update(&mut self) -> Result<u64>;

    fn execute_query(&mut self) -> Result<RowSet>;

    fn execute_call(&mut self) -> Result<CallOutput>;

    /// Queue the current bindings as one batch member and clear them
    fn add_batch(&mut self) -> Result<()>;

    /// Execute every queued member and clear the queue
    fn execute_batch(&mut self, policy: BatchPolicy) -> Result<Vec<BatchOutcome>>;
}
