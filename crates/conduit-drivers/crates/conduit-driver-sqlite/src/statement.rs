//! Prepared statements on a SQLite connection

use conduit_core::{
    BatchOutcome, BatchPolicy, CallOutput, ConduitError, ParameterId, ProcedureDef, Result,
    RowSet, SqlType, Statement, Value,
};
use rusqlite::{CachedStatement, Connection as RusqliteConnection, params_from_iter};

use crate::error::map_error;
use crate::routines::run_procedure;
use crate::values::{collect_rows, value_to_rusqlite, values_to_rusqlite};

/// What the statement runs when executed
pub(crate) enum Target<'c> {
    /// Plain SQL prepared by the engine
    Sql(CachedStatement<'c>),
    /// A `{call F(...)}` escape rewritten to `SELECT F(...)`.
    /// With `has_return`, bind position 1 is the return value.
    Function {
        stmt: CachedStatement<'c>,
        has_return: bool,
    },
    /// A hosted procedure; bind positions are its parameters in order
    Procedure(ProcedureDef),
}

pub struct SqliteStatement<'c> {
    conn: &'c RusqliteConnection,
    target: Target<'c>,
    values: Vec<Value>,
    outs: Vec<(usize, SqlType)>,
    queued: Vec<Vec<Value>>,
}

impl<'c> SqliteStatement<'c> {
    pub(crate) fn new(conn: &'c RusqliteConnection, target: Target<'c>) -> Self {
        let mut statement = Self {
            conn,
            target,
            values: Vec::new(),
            outs: Vec::new(),
            queued: Vec::new(),
        };
        statement.values = vec![Value::Null; statement.parameter_count()];
        statement
    }

    fn check_position(&self, position: usize) -> Result<()> {
        if position == 0 || position > self.values.len() {
            return Err(ConduitError::binding(
                ParameterId::Position(position),
                format!(
                    "bind position out of range (statement has {} positions)",
                    self.values.len()
                ),
            ));
        }
        Ok(())
    }

    /// Values for the engine statement, skipping the return placeholder
    fn engine_values(&self) -> Vec<rusqlite::types::Value> {
        match &self.target {
            Target::Function {
                has_return: true, ..
            } => values_to_rusqlite(&self.values[1..]),
            _ => values_to_rusqlite(&self.values),
        }
    }

    fn reset_bindings(&mut self) {
        self.values.iter_mut().for_each(|v| *v = Value::Null);
    }
}

impl Statement for SqliteStatement<'_> {
    fn parameter_count(&self) -> usize {
        match &self.target {
            Target::Sql(stmt) => stmt.parameter_count(),
            Target::Function { stmt, has_return } => {
                stmt.parameter_count() + usize::from(*has_return)
            }
            Target::Procedure(def) => def.params.len(),
        }
    }

    fn bind(&mut self, position: usize, value: &Value) -> Result<()> {
        self.check_position(position)?;
        match &self.target {
            Target::Function {
                has_return: true, ..
            } if position == 1 => {
                return Err(ConduitError::binding(
                    ParameterId::Position(1),
                    "the function return placeholder cannot take a value",
                ));
            }
            Target::Procedure(def) if !def.params[position - 1].direction.is_input() => {
                return Err(ConduitError::binding(
                    def.params[position - 1].name.as_str(),
                    format!("parameter of {} is OUT only", def.name),
                ));
            }
            _ => {}
        }
        self.values[position - 1] = value.clone();
        Ok(())
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> Result<()> {
        self.check_position(position)?;
        let accepted = match &self.target {
            Target::Function { has_return, .. } => *has_return && position == 1,
            Target::Procedure(def) => def.params[position - 1].direction.is_output(),
            Target::Sql(_) => false,
        };
        if !accepted {
            return Err(ConduitError::binding(
                ParameterId::Position(position),
                "position cannot be registered as an output",
            ));
        }
        self.outs.retain(|(p, _)| *p != position);
        self.outs.push((position, sql_type));
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        let params = self.engine_values();
        match &mut self.target {
            Target::Sql(stmt) => {
                let changed = stmt.execute(params_from_iter(params.iter())).map_err(map_error)?;
                Ok(changed as u64)
            }
            _ => Err(ConduitError::NotSupported(
                "callable statements must be executed as calls".into(),
            )),
        }
    }

    fn execute_query(&mut self) -> Result<RowSet> {
        let params = self.engine_values();
        match &mut self.target {
            Target::Sql(stmt) | Target::Function { stmt, .. } => collect_rows(stmt, &params),
            Target::Procedure(def) => Err(ConduitError::NotSupported(format!(
                "procedure {} does not return rows",
                def.name
            ))),
        }
    }

    fn execute_call(&mut self) -> Result<CallOutput> {
        let params = self.engine_values();
        match &mut self.target {
            Target::Function {
                stmt,
                has_return: true,
            } => {
                let rows = collect_rows(stmt, &params)?;
                let value = rows
                    .into_cursor()
                    .next()
                    .and_then(|row| row.values.into_iter().next())
                    .unwrap_or(Value::Null);
                Ok(CallOutput {
                    out_values: vec![(1, value)],
                    result_sets: Vec::new(),
                })
            }
            Target::Function { stmt, .. } => Ok(CallOutput {
                out_values: Vec::new(),
                result_sets: vec![collect_rows(stmt, &params)?],
            }),
            Target::Procedure(def) => {
                let args = run_procedure(self.conn, def, self.values.clone())?;
                let out_values = self
                    .outs
                    .iter()
                    .map(|(position, _)| (*position, args[position - 1].clone()))
                    .collect();
                Ok(CallOutput {
                    out_values,
                    result_sets: Vec::new(),
                })
            }
            Target::Sql(stmt) => {
                // A plain statement sent as a call: rows if it has columns, otherwise nothing
                if stmt.column_count() > 0 {
                    Ok(CallOutput {
                        out_values: Vec::new(),
                        result_sets: vec![collect_rows(stmt, &params)?],
                    })
                } else {
                    stmt.execute(params_from_iter(params.iter())).map_err(map_error)?;
                    Ok(CallOutput::default())
                }
            }
        }
    }

    fn add_batch(&mut self) -> Result<()> {
        if !matches!(self.target, Target::Sql(_)) {
            return Err(ConduitError::NotSupported(
                "callable statements cannot be batched".into(),
            ));
        }
        self.queued.push(self.values.clone());
        self.reset_bindings();
        Ok(())
    }

    fn execute_batch(&mut self, policy: BatchPolicy) -> Result<Vec<BatchOutcome>> {
        let queued = std::mem::take(&mut self.queued);
        let Target::Sql(stmt) = &mut self.target else {
            return Err(ConduitError::NotSupported(
                "callable statements cannot be batched".into(),
            ));
        };

        let mut outcomes = Vec::with_capacity(queued.len());
        let mut stopped = false;
        for (member, values) in queued.iter().enumerate() {
            if stopped {
                outcomes.push(BatchOutcome::NotExecuted);
                continue;
            }
            let params: Vec<_> = values.iter().map(value_to_rusqlite).collect();
            match stmt.execute(params_from_iter(params.iter())) {
                Ok(changed) => outcomes.push(BatchOutcome::Succeeded(changed as u64)),
                Err(e) => {
                    let error = map_error(e);
                    tracing::debug!(member, error = %error, "batch member failed");
                    outcomes.push(BatchOutcome::failed(&error));
                    stopped = policy == BatchPolicy::StopOnFirstError;
                }
            }
        }
        Ok(outcomes)
    }
}
