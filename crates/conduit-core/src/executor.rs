//! Statement execution
//!
//! Executes one bound statement and classifies what came back. The bound
//! statement is consumed, so the engine statement is released on every exit
//! path whether execution succeeds or not.

use crate::binder::{BoundStatement, ParameterBinder, sql_preview};
use crate::mapper::{OutParameters, map_out_parameters};
use crate::sql::reports_row_count;
use crate::{ConduitError, Connection, Result, RowSet, StatementKind, StatementSpec};

/// What a single statement produced
#[derive(Debug)]
pub enum ExecutionResult {
    RowSet(RowSet),
    UpdateCount(u64),
    OutParameters(OutParameters),
}

impl ExecutionResult {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExecutionResult::RowSet(_) => "row set",
            ExecutionResult::UpdateCount(_) => "update count",
            ExecutionResult::OutParameters(_) => "out parameters",
        }
    }

    pub fn update_count(&self) -> Option<u64> {
        match self {
            ExecutionResult::UpdateCount(count) => Some(*count),
            _ => None,
        }
    }

    pub fn into_row_set(self) -> Result<RowSet> {
        match self {
            ExecutionResult::RowSet(rows) => Ok(rows),
            other => Err(other.unexpected("row set")),
        }
    }

    pub fn into_update_count(self) -> Result<u64> {
        match self {
            ExecutionResult::UpdateCount(count) => Ok(count),
            other => Err(other.unexpected("update count")),
        }
    }

    pub fn into_out_parameters(self) -> Result<OutParameters> {
        match self {
            ExecutionResult::OutParameters(out) => Ok(out),
            other => Err(other.unexpected("out parameters")),
        }
    }

    fn unexpected(&self, wanted: &str) -> ConduitError {
        ConduitError::Mapping(format!(
            "statement produced {} where {} was expected",
            self.kind_name(),
            wanted
        ))
    }
}

/// Executes single statements against a connection
#[derive(Debug, Default, Clone, Copy)]
pub struct StatementExecutor {
    binder: ParameterBinder,
}

impl StatementExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `spec` on `conn` and execute it
    pub fn run(&self, spec: &StatementSpec, conn: &dyn Connection) -> Result<ExecutionResult> {
        let bound = self.binder.bind(spec, conn)?;
        self.execute(bound)
    }

    /// Execute a bound statement.
    ///
    /// Updates yield an update count, queries a row set, and callable
    /// statements their OUT values together with any returned result sets.
    #[tracing::instrument(
        skip(self, bound),
        fields(sql_preview = %sql_preview(bound.spec().sql()), kind = ?bound.spec().kind())
    )]
    pub fn execute(&self, mut bound: BoundStatement<'_>) -> Result<ExecutionResult> {
        let spec = bound.spec().clone();
        let statement = bound.statement_mut();

        let result = match spec.kind() {
            StatementKind::Update => {
                let count = statement.execute_update()?;
                let count = if reports_row_count(spec.sql()) { count } else { 0 };
                tracing::debug!(count, "update executed");
                ExecutionResult::UpdateCount(count)
            }
            StatementKind::Query => {
                let rows = statement.execute_query()?;
                tracing::debug!(rows = rows.row_count(), "query executed");
                ExecutionResult::RowSet(rows)
            }
            StatementKind::Callable => {
                let output = statement.execute_call()?;
                tracing::debug!(
                    out_values = output.out_values.len(),
                    result_sets = output.result_sets.len(),
                    "call executed"
                );
                ExecutionResult::OutParameters(map_out_parameters(output, &spec)?)
            }
        };
        Ok(result)
    }
}
