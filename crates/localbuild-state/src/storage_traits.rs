//! Storage abstractions for the ephemeral build master.
//!
//! `BuildLedger` records the builds a master runs and the log records each
//! produces. It is async and backend-agnostic; an in-memory fake lives in
//! the `fakes` module and a SurrealDB implementation in `surreal_ledger`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// SHA-256 digest of a build request.
///
/// The inner field is private so the string is always lowercase hex
/// produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of one build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub String);

impl BuildId {
    pub fn new() -> Self {
        BuildId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What was built, captured when the build is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub builder: String,
    pub project: String,
    pub repository: String,
    pub branch: String,
    pub revision: Option<String>,
    /// Checkout steps were served from host mounts
    pub local_sources: bool,
}

/// One relayed log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number within the build, starting at 1
    pub seq: u64,
    /// Raw record, category prefix included
    pub record: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(seq: u64, record: impl Into<String>) -> Self {
        Self {
            seq,
            record: record.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Produced when a build stops running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Result name (`success`, `failure`, ...); `None` for abandoned builds
    pub result: Option<String>,
    pub total_logs: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Running,
    Finished,
    /// The build stopped without reporting a result.
    Abandoned,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Running => "running",
            BuildStatus::Finished => "finished",
            BuildStatus::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full build record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_id: BuildId,
    pub request_digest: ContentDigest,
    pub metadata: BuildMetadata,
    pub status: BuildStatus,
    pub summary: Option<BuildSummary>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Ledger of the builds run by one master.
///
/// Guarantees:
/// - Logs are ordered by `seq` within a build.
/// - A build transitions Running → Finished | Abandoned (terminal).
/// - Terminal builds are immutable: appends and transitions fail.
#[async_trait]
pub trait BuildLedger: Send + Sync {
    async fn create_build(
        &self,
        request_digest: &ContentDigest,
        metadata: BuildMetadata,
    ) -> StorageResult<BuildId>;

    /// Append a log record to a running build.
    async fn append_log(&self, build_id: &BuildId, entry: LogEntry) -> StorageResult<()>;

    /// Mark a build as finished with its result.
    async fn finish_build(&self, build_id: &BuildId, summary: BuildSummary) -> StorageResult<()>;

    /// Mark a build as stopped without a result.
    async fn abandon_build(&self, build_id: &BuildId, summary: BuildSummary)
        -> StorageResult<()>;

    async fn get_build(&self, build_id: &BuildId) -> StorageResult<BuildRecord>;

    /// All logs of a build, ordered by seq.
    async fn get_logs(&self, build_id: &BuildId) -> StorageResult<Vec<LogEntry>>;

    /// Builds newest first, optionally only those of one builder.
    async fn list_builds(&self, builder: Option<&str>) -> StorageResult<Vec<BuildRecord>>;
}
