//! Error types for the nl2sql persistent storage layer.

use thiserror::Error;

/// Errors that can occur in the SurrealDB-backed persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database query failed: {0}")]
    Query(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("schema snapshot not found: {ds_id} (version {version:?})")]
    SchemaNotFound {
        ds_id: String,
        version: Option<String>,
    },

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StorageError> for nl2sql_core::error::Nl2SqlError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SchemaNotFound { ds_id, version } => {
                nl2sql_core::error::Nl2SqlError::SchemaNotFound { ds_id, version }
            }
            StorageError::ArtifactNotFound(uri) => {
                nl2sql_core::error::Nl2SqlError::ArtifactNotFound(uri)
            }
            other => nl2sql_core::error::Nl2SqlError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
