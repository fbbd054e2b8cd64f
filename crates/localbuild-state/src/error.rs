//! Error types for localbuild-state

use thiserror::Error;

/// Errors raised while setting up the backing database
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Database query failed: {0}")]
    Query(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by [`crate::BuildLedger`] operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Build not found: {build_id}")]
    BuildNotFound { build_id: String },

    #[error("Build {build_id} is {status}, expected {expected}")]
    InvalidBuildState {
        build_id: String,
        status: String,
        expected: String,
    },

    #[error("Invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}
