//! Error types for Conduit

use crate::{BatchFailure, ParameterId};
use thiserror::Error;

/// SQLSTATE used when the engine gives no better classification
pub const SQL_STATE_GENERAL: &str = "HY000";

/// Core error type for Conduit operations
#[derive(Error, Debug)]
pub enum ConduitError {
    /// A parameter value is missing, has the wrong type, or cannot be matched
    /// to a placeholder. Never retried.
    #[error("Parameter binding error for {parameter}: {message}")]
    ParameterBinding {
        parameter: ParameterId,
        message: String,
    },

    /// The database rejected the statement.
    #[error("Execution error [{sql_state}]: {message}")]
    Execution {
        sql_state: String,
        vendor_code: Option<i32>,
        message: String,
    },

    #[error("Batch partially failed: {}", .0.summary())]
    BatchPartialFailure(BatchFailure),

    #[error("Incorrect result size: expected {expected}, actual {actual}")]
    IncorrectResultSize { expected: usize, actual: usize },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConduitError {
    /// Build a binding error for the given parameter
    pub fn binding(parameter: impl Into<ParameterId>, message: impl Into<String>) -> Self {
        Self::ParameterBinding {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Build an execution error with an explicit SQLSTATE
    pub fn execution(sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            sql_state: sql_state.into(),
            vendor_code: None,
            message: message.into(),
        }
    }

    /// SQLSTATE of an execution error, or of the first failed batch member
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { sql_state, .. } => Some(sql_state),
            Self::BatchPartialFailure(failure) => failure.first_sql_state(),
            _ => None,
        }
    }

    pub fn is_binding_error(&self) -> bool {
        matches!(self, Self::ParameterBinding { .. })
    }
}

/// Result type alias for Conduit operations
pub type Result<T> = std::result::Result<T, ConduitError>;
