//! In-memory `BuildLedger` for tests and hosts without a database.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct BuildState {
    record: BuildRecord,
    logs: Vec<LogEntry>,
}

/// In-memory build ledger; builds are kept in creation order.
#[derive(Debug, Default)]
pub struct MemoryBuildLedger {
    builds: Mutex<Vec<BuildState>>,
}

impl MemoryBuildLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Vec<BuildState>>> {
        self.builds
            .lock()
            .map_err(|_| StorageError::Backend("build ledger lock poisoned".to_string()))
    }
}

fn find<'a>(builds: &'a mut [BuildState], build_id: &BuildId) -> StorageResult<&'a mut BuildState> {
    builds
        .iter_mut()
        .find(|s| s.record.build_id == *build_id)
        .ok_or_else(|| StorageError::BuildNotFound {
            build_id: build_id.0.clone(),
        })
}

fn find_running<'a>(
    builds: &'a mut [BuildState],
    build_id: &BuildId,
) -> StorageResult<&'a mut BuildState> {
    let state = find(builds, build_id)?;
    if state.record.status != BuildStatus::Running {
        return Err(StorageError::InvalidBuildState {
            build_id: build_id.0.clone(),
            status: state.record.status.to_string(),
            expected: BuildStatus::Running.to_string(),
        });
    }
    Ok(state)
}

#[async_trait]
impl BuildLedger for MemoryBuildLedger {
    async fn create_build(
        &self,
        request_digest: &ContentDigest,
        metadata: BuildMetadata,
    ) -> StorageResult<BuildId> {
        let build_id = BuildId::new();
        let record = BuildRecord {
            build_id: build_id.clone(),
            request_digest: request_digest.clone(),
            metadata,
            status: BuildStatus::Running,
            summary: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.lock()?.push(BuildState {
            record,
            logs: Vec::new(),
        });
        Ok(build_id)
    }

    async fn append_log(&self, build_id: &BuildId, entry: LogEntry) -> StorageResult<()> {
        let mut builds = self.lock()?;
        find_running(&mut builds, build_id)?.logs.push(entry);
        Ok(())
    }

    async fn finish_build(&self, build_id: &BuildId, summary: BuildSummary) -> StorageResult<()> {
        let mut builds = self.lock()?;
        let state = find_running(&mut builds, build_id)?;
        state.record.status = BuildStatus::Finished;
        state.record.summary = Some(summary);
        state.record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn abandon_build(
        &self,
        build_id: &BuildId,
        summary: BuildSummary,
    ) -> StorageResult<()> {
        let mut builds = self.lock()?;
        let state = find_running(&mut builds, build_id)?;
        state.record.status = BuildStatus::Abandoned;
        state.record.summary = Some(BuildSummary {
            result: None,
            ..summary
        });
        state.record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_build(&self, build_id: &BuildId) -> StorageResult<BuildRecord> {
        let mut builds = self.lock()?;
        Ok(find(&mut builds, build_id)?.record.clone())
    }

    async fn get_logs(&self, build_id: &BuildId) -> StorageResult<Vec<LogEntry>> {
        let mut builds = self.lock()?;
        let mut logs = find(&mut builds, build_id)?.logs.clone();
        logs.sort_by_key(|e| e.seq);
        Ok(logs)
    }

    async fn list_builds(&self, builder: Option<&str>) -> StorageResult<Vec<BuildRecord>> {
        let builds = self.lock()?;
        Ok(builds
            .iter()
            .rev()
            .filter(|s| builder.map_or(true, |b| s.record.metadata.builder == b))
            .map(|s| s.record.clone())
            .collect())
    }
}
