use polars::prelude::PolarsError;
use thiserror::Error;

/// Contract violations that stop a merge run. Unresolved references, orphan
/// rows and dangling links are not errors; they are logged and dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("provider '{provider}', table '{table}': missing required column '{column}'")]
    SchemaMismatch { provider: String, table: String, column: String },

    #[error("provider '{provider}', table '{table}': column '{column}' is not declared for this table")]
    UndeclaredColumn { provider: String, table: String, column: String },

    #[error("provider '{provider}', table '{table}', row {row}: '{value}' in column '{column}' is not a valid {expected}")]
    InvalidCell {
        provider: String,
        table: String,
        column: String,
        row: usize,
        value: String,
        expected: &'static str,
    },

    #[error("provider '{0}' is listed more than once in the priority list")]
    DuplicateProvider(String),

    #[error("the provider priority list is empty")]
    EmptyPriority,

    #[error("table operation failed: {0}")]
    Frame(String),
}

impl From<PolarsError> for MergeError {
    fn from(err: PolarsError) -> Self {
        MergeError::Frame(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;
