//! Named rollback points inside a transaction

use crate::{ConduitError, Result};

/// A savepoint within an open transaction.
///
/// Rolling back to a savepoint undoes everything done after it without
/// ending the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    /// Create a savepoint handle, rejecting names that are not plain identifiers
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Savepoint names are spliced into SQL, so only identifiers are allowed
fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || name.len() > 128 || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConduitError::Transaction(format!(
            "invalid savepoint name '{}'",
            name
        )));
    }
    Ok(())
}
