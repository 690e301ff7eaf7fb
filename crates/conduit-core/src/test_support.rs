//! In-memory connection that records every call made against it

use crate::{
    BatchOutcome, BatchPolicy, CallOutput, ColumnMeta, Connection, Result, Row, RowSet, SqlType,
    Statement, StatementKind, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prepare(String, StatementKind),
    Bind(usize, Value),
    RegisterOut(usize, SqlType),
    Update,
    Query,
    Callable,
    AddBatch,
    ExecuteBatch(usize),
    Sql(String),
    SqlBatch(usize),
    Release,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Vec<Call>,
    in_transaction: bool,
}

/// Connection double. Members binding a value listed in `failing` fail with
/// SQLSTATE 23000; literal statements fail when they mention one.
#[derive(Debug, Default, Clone)]
pub struct RecordingConnection {
    shared: Arc<Mutex<Shared>>,
    failing: Vec<Value>,
    rows: Option<(Vec<String>, Vec<Vec<Value>>)>,
    out_values: Vec<(usize, Value)>,
}

impl RecordingConnection {
    pub fn failing_on(mut self, value: impl Into<Value>) -> Self {
        self.failing.push(value.into());
        self
    }

    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.rows = Some((columns.iter().map(|c| c.to_string()).collect(), rows));
        self
    }

    pub fn with_out_value(mut self, position: usize, value: impl Into<Value>) -> Self {
        self.out_values.push((position, value.into()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().calls.clone()
    }

    fn record(&self, call: Call) {
        self.shared.lock().calls.push(call);
    }

    fn fails(&self, values: &[Value]) -> bool {
        values.iter().any(|v| self.failing.contains(v))
    }

    fn fails_sql(&self, sql: &str) -> bool {
        self.failing
            .iter()
            .filter_map(Value::as_str)
            .any(|marker| sql.contains(marker))
    }

    fn row_set(&self) -> RowSet {
        let Some((columns, rows)) = &self.rows else {
            return RowSet::empty();
        };
        let meta = columns
            .iter()
            .enumerate()
            .map(|(ordinal, name)| ColumnMeta {
                name: name.clone(),
                data_type: String::new(),
                ordinal,
            })
            .collect();
        let names: Arc<[String]> = columns.clone().into();
        let rows = rows
            .iter()
            .map(|values| Row::new(names.clone(), values.clone()))
            .collect();
        RowSet::new(meta, rows)
    }
}

fn constraint_failure() -> BatchOutcome {
    BatchOutcome::Failed {
        sql_state: "23000".into(),
        message: "constraint failed".into(),
    }
}

fn run_members<T>(
    members: &[T],
    policy: BatchPolicy,
    fails: impl Fn(&T) -> bool,
) -> Vec<BatchOutcome> {
    let mut stopped = false;
    members
        .iter()
        .map(|member| {
            if stopped {
                BatchOutcome::NotExecuted
            } else if fails(member) {
                stopped = policy == BatchPolicy::StopOnFirstError;
                constraint_failure()
            } else {
                BatchOutcome::Succeeded(1)
            }
        })
        .collect()
}

impl Connection for RecordingConnection {
    fn driver_name(&self) -> &str {
        "recording"
    }

    fn prepare(&self, sql: &str, kind: StatementKind) -> Result<Box<dyn Statement + '_>> {
        self.record(Call::Prepare(sql.to_string(), kind));
        Ok(Box::new(RecordingStatement {
            conn: self,
            parameter_count: sql.matches('?').count(),
            bound: Vec::new(),
            queued: Vec::new(),
        }))
    }

    fn execute_sql(&self, sql: &str) -> Result<u64> {
        self.record(Call::Sql(sql.to_string()));
        let mut shared = self.shared.lock();
        match sql {
            "BEGIN" => shared.in_transaction = true,
            "COMMIT" | "ROLLBACK" => shared.in_transaction = false,
            _ => {}
        }
        Ok(0)
    }

    fn execute_sql_batch(
        &self,
        statements: &[String],
        policy: BatchPolicy,
    ) -> Result<Vec<BatchOutcome>> {
        self.record(Call::SqlBatch(statements.len()));
        Ok(run_members(statements, policy, |sql| self.fails_sql(sql)))
    }

    fn is_in_transaction(&self) -> bool {
        self.shared.lock().in_transaction
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

pub struct RecordingStatement<'c> {
    conn: &'c RecordingConnection,
    parameter_count: usize,
    bound: Vec<Value>,
    queued: Vec<Vec<Value>>,
}

impl Statement for RecordingStatement<'_> {
    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn bind(&mut self, position: usize, value: &Value) -> Result<()> {
        self.conn.record(Call::Bind(position, value.clone()));
        self.bound.push(value.clone());
        Ok(())
    }

    fn register_out(&mut self, position: usize, sql_type: SqlType) -> Result<()> {
        self.conn.record(Call::RegisterOut(position, sql_type));
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.conn.record(Call::Update);
        if self.conn.fails(&self.bound) {
            return Err(crate::ConduitError::execution("23000", "constraint failed"));
        }
        Ok(1)
    }

    fn execute_query(&mut self) -> Result<RowSet> {
        self.conn.record(Call::Query);
        Ok(self.conn.row_set())
    }

    fn execute_call(&mut self) -> Result<CallOutput> {
        self.conn.record(Call::Callable);
        let result_sets = match self.conn.rows {
            Some(_) => vec![self.conn.row_set()],
            None => Vec::new(),
        };
        Ok(CallOutput {
            out_values: self.conn.out_values.clone(),
            result_sets,
        })
    }

    fn add_batch(&mut self) -> Result<()> {
        self.conn.record(Call::AddBatch);
        self.queued.push(std::mem::take(&mut self.bound));
        Ok(())
    }

    fn execute_batch(&mut self, policy: BatchPolicy) -> Result<Vec<BatchOutcome>> {
        let queued = std::mem::take(&mut self.queued);
        self.conn.record(Call::ExecuteBatch(queued.len()));
        Ok(run_members(&queued, policy, |values| self.conn.fails(values)))
    }
}

impl Drop for RecordingStatement<'_> {
    fn drop(&mut self) {
        self.conn.record(Call::Release);
    }
}
