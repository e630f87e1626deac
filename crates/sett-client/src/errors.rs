use sett_ir::DataType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("remote failure: HTTP {status}: {message}")]
    RemoteFailure { status: u16, message: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("schema mismatch: expected columns {expected:?}, server returned {actual:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("incomplete result after {rows} rows: {reason}")]
    IncompleteResult { rows: usize, reason: String },

    #[error("cannot decode {value} as {ty:?}")]
    TypeCoercionFailure { value: String, ty: DataType },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Top-level error for the connection facade, unifying the compile-time and
/// run-time taxonomies.
#[derive(Debug, Error)]
pub enum SettError {
    #[error(transparent)]
    Compile(#[from] sett_sql::CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
