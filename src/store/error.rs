use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cannot create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot open store at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Connection setup or a schema step failed.
    #[error("Store setup failed: {0}")]
    Setup(#[from] rusqlite::Error),

    #[error("Store query failed: {0}")]
    Query(String),

    /// A persisted document or sync result is not valid JSON for its type.
    #[error("Malformed stored document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// The file was written by a newer build.
    #[error("Store schema version {found} is newer than this build supports ({expected})")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StoreError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
