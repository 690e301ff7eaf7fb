//! Scoped transactions
//!
//! A [`TransactionScope`] owns the open transaction on a borrowed
//! connection. It ends through `commit` or `rollback`; a scope dropped
//! without either rolls back.

mod savepoint;

pub use savepoint::*;

use crate::{ConduitError, Connection, Result};

/// An open transaction on a borrowed connection
pub struct TransactionScope<'c> {
    conn: &'c dyn Connection,
    finished: bool,
}

impl<'c> TransactionScope<'c> {
    /// Begin a transaction. Fails if one is already open on `conn`.
    pub fn begin(conn: &'c dyn Connection) -> Result<Self> {
        if conn.is_in_transaction() {
            return Err(ConduitError::Transaction(
                "a transaction is already open on this connection".into(),
            ));
        }
        conn.begin()?;
        tracing::debug!(driver = conn.driver_name(), "transaction started");
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// The connection the transaction runs on
    pub fn connection(&self) -> &'c dyn Connection {
        self.conn
    }

    /// Commit. If the commit itself fails the scope still rolls back on drop.
    pub fn commit(mut self) -> Result<()> {
        self.conn.commit()?;
        self.finished = true;
        tracing::debug!("transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback()?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    pub fn savepoint(&self, name: &str) -> Result<Savepoint> {
        let savepoint = Savepoint::new(name)?;
        self.conn.savepoint(savepoint.name())?;
        Ok(savepoint)
    }

    /// Undo everything after `savepoint`; the savepoint stays usable
    pub fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        self.conn.rollback_to_savepoint(savepoint.name())
    }

    pub fn release_savepoint(&self, savepoint: Savepoint) -> Result<()> {
        self.conn.release_savepoint(savepoint.name())
    }
}

impl std::fmt::Debug for TransactionScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("driver", &self.conn.driver_name())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("transaction scope dropped without commit or rollback, rolling back");
            if let Err(e) = self.conn.rollback() {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

/// Run `work` inside a transaction.
///
/// Commits when `work` returns `Ok`. On `Err` the transaction is rolled back
/// and the error from `work` is returned.
pub fn in_transaction<T, F>(conn: &dyn Connection, work: F) -> Result<T>
where
    F: FnOnce(&TransactionScope<'_>) -> Result<T>,
{
    let scope = TransactionScope::begin(conn)?;
    match work(&scope) {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = scope.rollback() {
                tracing::error!(error = %rollback_error, "rollback after failed work also failed");
            }
            Err(e)
        }
    }
}
