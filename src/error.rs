// src/error.rs

use thiserror::Error;

/// Everything the warehouse collaborator can report back.
///
/// `NotFound` and `AlreadyExists` are expected negative results that callers
/// branch on; every other variant is fatal for the operation in progress.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("BigQuery API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("BigQuery client error: {0}")]
    Client(String),

    #[error("reading load source: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl WarehouseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, WarehouseError::AlreadyExists(_))
    }
}

/// Argument/validation failures. These never reach the network.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Please provide Google BigQuery {0} with -{0} option")]
    MissingRequired(&'static str),

    #[error("Nothing to do. must provide -bqFile option")]
    NothingToDo,

    #[error("-schemaFile required with -createTable option")]
    SchemaFileRequired,

    #[error("-writeDisposition must be one of WRITE_APPEND (default), WRITE_EMPTY or WRITE_TRUNCATE, got `{0}`")]
    InvalidWriteDisposition(String),

    #[error("-uploadType must be one of census or extension, got `{0}`")]
    InvalidUploadType(String),

    #[error("-pollingInterval must be at least 1 second")]
    InvalidPollingInterval,
}
