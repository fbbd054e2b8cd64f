//! localbuild-state: persistence for the ephemeral build master
//!
//! The master records every build it runs, and each log record relayed for
//! it, in a [`BuildLedger`]. [`SurrealBuildLedger`] keeps the ledger in an
//! in-memory SurrealDB instance that disappears with the master;
//! [`fakes::MemoryBuildLedger`] is a dependency-free stand-in for tests.

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    BuildId, BuildLedger, BuildMetadata, BuildRecord, BuildStatus, BuildSummary, ContentDigest,
    LogEntry, StorageResult,
};
pub use surreal_ledger::SurrealBuildLedger;

/// Result type for localbuild-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
