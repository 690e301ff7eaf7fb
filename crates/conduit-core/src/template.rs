//! Execution facade over one borrowed connection

use crate::batch::BatchExecutor;
use crate::binder::sql_preview;
use crate::executor::StatementExecutor;
use crate::mapper::{OutParameters, ResultSetExtractor, RowMapper, extract, map_rows};
use crate::{
    BatchOptions, BatchSpec, ConduitError, Connection, FromValue, Result, RowSet, StatementSpec,
    Value,
};
use std::collections::HashMap;

/// Runs statements, queries, calls and batches on one connection.
///
/// The template does no transaction management; wrap calls in a
/// [`TransactionScope`](crate::TransactionScope) to group them.
pub struct SqlTemplate<'c> {
    conn: &'c dyn Connection,
    executor: StatementExecutor,
    batch: BatchExecutor,
}

impl<'c> SqlTemplate<'c> {
    pub fn new(conn: &'c dyn Connection) -> Self {
        Self::with_batch_options(conn, BatchOptions::default())
    }

    pub fn with_batch_options(conn: &'c dyn Connection, options: BatchOptions) -> Self {
        Self {
            conn,
            executor: StatementExecutor::new(),
            batch: BatchExecutor::new(options),
        }
    }

    pub fn connection(&self) -> &'c dyn Connection {
        self.conn
    }

    /// Execute an unparameterized statement, typically DDL
    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql_preview(sql)))]
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.conn.execute_sql(sql)?;
        Ok(())
    }

    /// Execute an update and return the number of affected rows
    pub fn update(&self, spec: &StatementSpec) -> Result<u64> {
        self.executor.run(spec, self.conn)?.into_update_count()
    }

    /// Execute an update whose positional placeholders take `params` in order
    pub fn update_sql<I, V>(&self, sql: &str, params: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.update(&StatementSpec::with_values(sql, params)?)
    }

    pub fn query(&self, spec: &StatementSpec) -> Result<RowSet> {
        self.executor.run(spec, self.conn)?.into_row_set()
    }

    /// Map every row through `mapper`
    pub fn query_map<T, M>(&self, spec: &StatementSpec, mapper: M) -> Result<Vec<T>>
    where
        M: RowMapper<T>,
    {
        map_rows(self.query(spec)?, mapper).collect()
    }

    /// Hand the whole result to `extractor`
    pub fn query_with<T, E>(&self, spec: &StatementSpec, extractor: &E) -> Result<T>
    where
        E: ResultSetExtractor<T> + ?Sized,
    {
        extract(self.query(spec)?, extractor)
    }

    /// Every row as a column-name map
    pub fn query_for_list(&self, sql: &str) -> Result<Vec<HashMap<String, Value>>> {
        let rows = self.query(&StatementSpec::new(sql)?)?;
        Ok(rows.into_cursor().map(|row| row.to_map()).collect())
    }

    /// The single value of a one-row, one-column result
    pub fn query_for_object<T: FromValue>(&self, spec: &StatementSpec) -> Result<T> {
        let rows = self.query(spec)?;
        if rows.row_count() != 1 {
            return Err(ConduitError::IncorrectResultSize {
                expected: 1,
                actual: rows.row_count(),
            });
        }
        if rows.column_count() != 1 {
            return Err(ConduitError::IncorrectResultSize {
                expected: 1,
                actual: rows.column_count(),
            });
        }
        let mut cursor = rows.into_cursor();
        let row = cursor.next().ok_or(ConduitError::IncorrectResultSize {
            expected: 1,
            actual: 0,
        })?;
        row.get_as(0)
    }

    /// Invoke a function or procedure
    pub fn call(&self, spec: &StatementSpec) -> Result<OutParameters> {
        self.executor.run(spec, self.conn)?.into_out_parameters()
    }

    /// One update count per batch member, in submission order
    pub fn batch_update(&self, batch: &BatchSpec) -> Result<Vec<u64>> {
        self.batch.execute_batch(batch, self.conn)
    }

    /// Execute distinct literal statements as one batch
    pub fn batch_update_sql<I, S>(&self, statements: I) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.batch.execute_sql_batch(statements, self.conn)
    }
}

impl std::fmt::Debug for SqlTemplate<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTemplate")
            .field("driver", &self.conn.driver_name())
            .field("batch", self.batch.options())
            .finish()
    }
}
