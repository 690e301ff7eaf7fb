//! SQLite error classification
//!
//! Engine failures become `ConduitError::Execution` with a SQLSTATE class
//! derived from the primary result code. The extended result code is kept
//! as the vendor code.

use conduit_core::{ConduitError, SQL_STATE_GENERAL};
use rusqlite::ErrorCode;

pub(crate) fn map_error(error: rusqlite::Error) -> ConduitError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message) => ConduitError::Execution {
            sql_state: sql_state_for(failure.code).to_string(),
            vendor_code: Some(failure.extended_code),
            message: message.clone().unwrap_or_else(|| failure.to_string()),
        },
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidParameterName(_) => ConduitError::execution("07009", error.to_string()),
        rusqlite::Error::UserFunctionError(inner) => ConduitError::execution("38000", inner.to_string()),
        _ => ConduitError::execution(SQL_STATE_GENERAL, error.to_string()),
    }
}

fn sql_state_for(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::ConstraintViolation => "23000",
        ErrorCode::Unknown => "42000",
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => "40001",
        ErrorCode::TooBig => "22001",
        ErrorCode::CannotOpen | ErrorCode::NotADatabase => "08001",
        ErrorCode::OperationInterrupted => "57014",
        ErrorCode::ParameterOutOfRange => "07009",
        ErrorCode::ReadOnly => "25006",
        _ => SQL_STATE_GENERAL,
    }
}
