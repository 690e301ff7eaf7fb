//! Batch execution
//!
//! Two modes: one prepared template repeated over many parameter sets, and
//! a list of distinct literal statements. Either way every member gets an
//! outcome, and a batch with any unsuccessful member is reported as a
//! [`ConduitError::BatchPartialFailure`]. Nothing is retried.

use crate::binder::{ParameterBinder, sql_preview};
use crate::sql::reports_row_count;
use crate::{
    BatchOptions, BatchOutcome, BatchPolicy, BatchSpec, ConduitError, Connection, Result,
};

/// Per-member outcomes of a batch that did not fully succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    outcomes: Vec<BatchOutcome>,
}

impl BatchFailure {
    pub fn new(outcomes: Vec<BatchOutcome>) -> Self {
        Self { outcomes }
    }

    /// One outcome per member, in submission order
    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::Failed { .. }))
            .count()
    }

    pub fn not_executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::NotExecuted))
            .count()
    }

    /// Indexes of the members that failed
    pub fn failed_members(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| matches!(o, BatchOutcome::Failed { .. }))
            .map(|(i, _)| i)
            .collect()
    }

    /// Update count of each member, `None` where it did not succeed
    pub fn update_counts(&self) -> Vec<Option<u64>> {
        self.outcomes
            .iter()
            .map(|o| match o {
                BatchOutcome::Succeeded(count) => Some(*count),
                _ => None,
            })
            .collect()
    }

    pub fn first_sql_state(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match o {
            BatchOutcome::Failed { sql_state, .. } => Some(sql_state.as_str()),
            _ => None,
        })
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} members succeeded, {} failed, {} not executed",
            self.succeeded(),
            self.outcomes.len(),
            self.failed(),
            self.not_executed()
        );
        let first_failure = self.outcomes.iter().enumerate().find_map(|(i, o)| match o {
            BatchOutcome::Failed { message, .. } => Some((i, message)),
            _ => None,
        });
        if let Some((member, message)) = first_failure {
            summary.push_str(&format!("; member {}: {}", member, message));
        }
        summary
    }
}

/// Executes batches against a connection
#[derive(Debug, Default, Clone)]
pub struct BatchExecutor {
    binder: ParameterBinder,
    options: BatchOptions,
}

impl BatchExecutor {
    pub fn new(options: BatchOptions) -> Self {
        Self {
            binder: ParameterBinder::new(),
            options,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    fn chunk_size(&self, len: usize) -> usize {
        self.options.max_batch_size.unwrap_or(len).max(1)
    }

    /// Execute one template over every parameter set of `batch`.
    ///
    /// Every set is type-checked before anything is prepared, so a bad
    /// member never leaves earlier chunks flushed behind a bare binding
    /// error. The template is prepared once; each set is bound and queued,
    /// and the queue is flushed once per chunk.
    #[tracing::instrument(
        skip(self, batch, conn),
        fields(sql_preview = %sql_preview(batch.template().sql()), members = batch.len())
    )]
    pub fn execute_batch(&self, batch: &BatchSpec, conn: &dyn Connection) -> Result<Vec<u64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        for (member, set) in batch.sets().iter().enumerate() {
            self.binder.check_set(batch.template(), set, member)?;
        }

        let mut bound = self.binder.prepare(batch.template(), conn)?;
        let counts_rows = reports_row_count(batch.template().sql());
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut stopped = false;

        for (chunk_index, chunk) in batch.sets().chunks(self.chunk_size(batch.len())).enumerate() {
            if stopped {
                outcomes.extend(chunk.iter().map(|_| BatchOutcome::NotExecuted));
                continue;
            }

            let first_member = chunk_index * self.chunk_size(batch.len());
            for (offset, set) in chunk.iter().enumerate() {
                let member = first_member + offset;
                let queued = self
                    .binder
                    .bind_set(&mut bound, set, member)
                    .and_then(|()| bound.statement_mut().add_batch());
                match queued {
                    Ok(()) => {}
                    Err(error) if outcomes.is_empty() => return Err(error),
                    Err(error) => {
                        // earlier chunks are already applied
                        tracing::warn!(member, error = %error, "member could not be queued");
                        outcomes.extend((0..offset).map(|_| BatchOutcome::NotExecuted));
                        outcomes.push(BatchOutcome::failed(&error));
                        outcomes.resize(batch.len(), BatchOutcome::NotExecuted);
                        return finish(outcomes);
                    }
                }
            }

            let flushed = bound.statement_mut().execute_batch(self.options.policy)?;
            tracing::trace!(chunk = chunk_index, members = flushed.len(), "chunk flushed");
            stopped = self.should_stop(&flushed);
            outcomes.extend(flushed.into_iter().map(|o| normalize(o, counts_rows)));
        }

        finish(outcomes)
    }

    /// Execute distinct literal statements as one batch
    #[tracing::instrument(skip(self, statements, conn))]
    pub fn execute_sql_batch<I, S>(&self, statements: I, conn: &dyn Connection) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statements: Vec<String> = statements.into_iter().map(Into::into).collect();
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(members = statements.len(), "executing literal batch");

        let mut outcomes = Vec::with_capacity(statements.len());
        let mut stopped = false;

        for chunk in statements.chunks(self.chunk_size(statements.len())) {
            if stopped {
                outcomes.extend(chunk.iter().map(|_| BatchOutcome::NotExecuted));
                continue;
            }
            let flushed = conn.execute_sql_batch(chunk, self.options.policy)?;
            stopped = self.should_stop(&flushed);
            outcomes.extend(
                flushed
                    .into_iter()
                    .zip(chunk)
                    .map(|(o, sql)| normalize(o, reports_row_count(sql))),
            );
        }

        finish(outcomes)
    }

    fn should_stop(&self, flushed: &[BatchOutcome]) -> bool {
        self.options.policy == BatchPolicy::StopOnFirstError
            && flushed.iter().any(|o| !o.is_success())
    }
}

fn normalize(outcome: BatchOutcome, counts_rows: bool) -> BatchOutcome {
    match outcome {
        BatchOutcome::Succeeded(_) if !counts_rows => BatchOutcome::Succeeded(0),
        other => other,
    }
}

fn finish(outcomes: Vec<BatchOutcome>) -> Result<Vec<u64>> {
    if outcomes.iter().all(BatchOutcome::is_success) {
        let counts: Vec<u64> = outcomes
            .into_iter()
            .filter_map(|o| match o {
                BatchOutcome::Succeeded(count) => Some(count),
                _ => None,
            })
            .collect();
        tracing::debug!(members = counts.len(), "batch executed");
        return Ok(counts);
    }

    let failure = BatchFailure::new(outcomes);
    tracing::warn!(
        succeeded = failure.succeeded(),
        failed = failure.failed(),
        not_executed = failure.not_executed(),
        "batch partially failed"
    );
    Err(ConduitError::BatchPartialFailure(failure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, RecordingConnection};
    use crate::{ParameterSet, ParameterSpec, SqlType, StatementSpec};
    use pretty_assertions::assert_eq;

    fn insert_batch(names: &[&str]) -> BatchSpec {
        let template = StatementSpec::builder("INSERT INTO test(name) VALUES(?)")
            .param(ParameterSpec::typed(SqlType::Varchar(100)))
            .build()
            .unwrap();
        BatchSpec::new(
            template,
            names.iter().map(|n| ParameterSet::positional([*n])).collect(),
        )
        .unwrap()
    }

    fn partial_failure(err: ConduitError) -> BatchFailure {
        match err {
            ConduitError::BatchPartialFailure(failure) => failure,
            other => panic!("expected a partial failure, got {:?}", other),
        }
    }

    #[test]
    fn test_template_batch_prepares_once_and_flushes_once() {
        let conn = RecordingConnection::default();
        let counts = BatchExecutor::default()
            .execute_batch(&insert_batch(&["name3", "name4"]), &conn)
            .unwrap();
        assert_eq!(counts, vec![1, 1]);

        let calls = conn.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Prepare(..))).count(), 1);
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::ExecuteBatch(_))).collect::<Vec<_>>(),
            vec![&Call::ExecuteBatch(2)]
        );
        assert_eq!(calls.last(), Some(&Call::Release));
    }

    #[test]
    fn test_max_batch_size_splits_flushes() {
        let conn = RecordingConnection::default();
        let executor = BatchExecutor::new(BatchOptions {
            max_batch_size: Some(2),
            ..Default::default()
        });
        let counts = executor
            .execute_batch(&insert_batch(&["a", "b", "c"]), &conn)
            .unwrap();
        assert_eq!(counts.len(), 3);
        let flushes: Vec<_> = conn
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::ExecuteBatch(_)))
            .collect();
        assert_eq!(flushes, vec![Call::ExecuteBatch(2), Call::ExecuteBatch(1)]);
    }

    #[test]
    fn test_stop_on_first_error_skips_remaining_members() {
        let conn = RecordingConnection::default().failing_on("bad");
        let err = BatchExecutor::default()
            .execute_batch(&insert_batch(&["a", "bad", "c"]), &conn)
            .unwrap_err();
        assert_eq!(err.sql_state(), Some("23000"));

        let failure = partial_failure(err);
        assert_eq!(failure.succeeded(), 1);
        assert_eq!(failure.failed(), 1);
        assert_eq!(failure.not_executed(), 1);
        assert_eq!(failure.failed_members(), vec![1]);
        assert_eq!(failure.update_counts(), vec![Some(1), None, None]);
    }

    #[test]
    fn test_stopped_batch_skips_later_chunks() {
        let conn = RecordingConnection::default().failing_on("bad");
        let executor = BatchExecutor::new(BatchOptions {
            max_batch_size: Some(1),
            ..Default::default()
        });
        let failure = partial_failure(
            executor
                .execute_batch(&insert_batch(&["bad", "b", "c"]), &conn)
                .unwrap_err(),
        );
        assert_eq!(failure.not_executed(), 2);
        assert_eq!(
            conn.calls()
                .iter()
                .filter(|c| matches!(c, Call::ExecuteBatch(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_mistyped_later_member_fails_before_any_flush() {
        let conn = RecordingConnection::default();
        let executor = BatchExecutor::new(BatchOptions {
            max_batch_size: Some(1),
            ..Default::default()
        });
        let template = StatementSpec::builder("INSERT INTO test(name) VALUES(?)")
            .param(ParameterSpec::typed(SqlType::Varchar(100)))
            .build()
            .unwrap();
        let batch = BatchSpec::new(
            template,
            vec![
                ParameterSet::positional(["a"]),
                ParameterSet::positional([crate::Value::Int32(2)]),
            ],
        )
        .unwrap();

        let err = executor.execute_batch(&batch, &conn).unwrap_err();
        assert!(err.is_binding_error(), "{}", err);
        assert!(err.to_string().contains("batch member 1"), "{}", err);
        assert!(conn.calls().is_empty(), "{:?}", conn.calls());
    }

    #[test]
    fn test_continue_on_error_runs_every_member() {
        let conn = RecordingConnection::default().failing_on("bad");
        let executor = BatchExecutor::new(BatchOptions {
            policy: BatchPolicy::ContinueOnError,
            max_batch_size: None,
        });
        let failure = partial_failure(
            executor
                .execute_batch(&insert_batch(&["bad", "b", "bad"]), &conn)
                .unwrap_err(),
        );
        assert_eq!(failure.succeeded(), 1);
        assert_eq!(failure.failed_members(), vec![0, 2]);
        assert!(failure.summary().starts_with("1 of 3 members succeeded"), "{}", failure.summary());
    }

    #[test]
    fn test_literal_batch() {
        let conn = RecordingConnection::default();
        let counts = BatchExecutor::default()
            .execute_sql_batch(
                [
                    "INSERT INTO test(name) VALUES('name1')",
                    "INSERT INTO test(name) VALUES('name2')",
                ],
                &conn,
            )
            .unwrap();
        assert_eq!(counts, vec![1, 1]);
        assert_eq!(conn.calls(), vec![Call::SqlBatch(2)]);
    }

    #[test]
    fn test_literal_batch_reports_zero_for_ddl() {
        let conn = RecordingConnection::default();
        let counts = BatchExecutor::default()
            .execute_sql_batch(["CREATE TABLE a(x INT)", "INSERT INTO a VALUES(1)"], &conn)
            .unwrap();
        assert_eq!(counts, vec![0, 1]);
    }

    #[test]
    fn test_empty_batch_touches_nothing() {
        let conn = RecordingConnection::default();
        let counts = BatchExecutor::default()
            .execute_sql_batch(Vec::<String>::new(), &conn)
            .unwrap();
        assert!(counts.is_empty());
        assert!(conn.calls().is_empty());
    }
}
