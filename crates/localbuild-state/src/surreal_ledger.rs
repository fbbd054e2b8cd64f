//! SurrealDB-backed `BuildLedger`
//!
//! Uses `schema::BuildRow` and `schema::BuildLogRow` for persistence,
//! converting to and from `storage_traits` types at the boundary.

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{BuildLogRow, BuildRow};
use crate::storage_traits::{
    BuildId, BuildLedger, BuildMetadata, BuildRecord, BuildStatus, BuildSummary, ContentDigest,
    LogEntry, StorageResult,
};

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// SurrealDB implementation of [`BuildLedger`].
pub struct SurrealBuildLedger {
    db: Surreal<Any>,
}

impl SurrealBuildLedger {
    /// Connect to a fresh `mem://` database and set up the schema.
    ///
    /// Each call yields an independent, empty ledger that lives as long as
    /// the returned value.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        db.use_ns("localbuild")
            .use_db("master")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealBuildLedger connected (in-memory)");
        Ok(Self { db })
    }

    async fn fetch_build(&self, build_id: &BuildId) -> StorageResult<BuildRow> {
        let mut res = self
            .db
            .query("SELECT * FROM builds WHERE build_id = $bid")
            .bind(("bid", build_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<BuildRow> = res.take(0).map_err(backend)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })
    }

    async fn fetch_running(&self, build_id: &BuildId) -> StorageResult<BuildRow> {
        let row = self.fetch_build(build_id).await?;
        if row.status != BuildStatus::Running.as_str() {
            return Err(StorageError::InvalidBuildState {
                build_id: build_id.0.clone(),
                status: row.status,
                expected: BuildStatus::Running.to_string(),
            });
        }
        Ok(row)
    }

    async fn close_build(
        &self,
        build_id: &BuildId,
        status: BuildStatus,
        summary: BuildSummary,
    ) -> StorageResult<()> {
        self.fetch_running(build_id).await?;

        self.db
            .query(
                "UPDATE builds SET status = $status, result = $result, total_logs = $total, \
                 duration_ms = $duration, finished_at = time::now() WHERE build_id = $bid",
            )
            .bind(("status", status.as_str().to_string()))
            .bind(("result", summary.result))
            .bind(("total", summary.total_logs))
            .bind(("duration", summary.duration_ms))
            .bind(("bid", build_id.0.clone()))
            .await
            .map_err(backend)?;

        debug!(build_id = %build_id, status = %status, "build closed");
        Ok(())
    }

    fn row_to_record(row: BuildRow) -> StorageResult<BuildRecord> {
        let status = match row.status.as_str() {
            "running" => BuildStatus::Running,
            "finished" => BuildStatus::Finished,
            "abandoned" => BuildStatus::Abandoned,
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown build status: {other}"
                )))
            }
        };

        let summary = (status != BuildStatus::Running).then(|| BuildSummary {
            result: row.result,
            total_logs: row.total_logs,
            duration_ms: row.duration_ms,
        });

        Ok(BuildRecord {
            build_id: BuildId(row.build_id),
            request_digest: ContentDigest::try_from(row.request_digest)?,
            metadata: BuildMetadata {
                builder: row.builder,
                project: row.project,
                repository: row.repository,
                branch: row.branch,
                revision: row.revision,
                local_sources: row.local_sources,
            },
            status,
            summary,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

#[async_trait]
impl BuildLedger for SurrealBuildLedger {
    async fn create_build(
        &self,
        request_digest: &ContentDigest,
        metadata: BuildMetadata,
    ) -> StorageResult<BuildId> {
        let build_id = BuildId::new();
        let row = BuildRow {
            id: None,
            build_id: build_id.0.clone(),
            request_digest: request_digest.as_str().to_string(),
            builder: metadata.builder,
            project: metadata.project,
            repository: metadata.repository,
            branch: metadata.branch,
            revision: metadata.revision,
            local_sources: metadata.local_sources,
            status: BuildStatus::Running.as_str().to_string(),
            result: None,
            total_logs: 0,
            duration_ms: 0,
            created_at: Utc::now(),
            finished_at: None,
        };

        debug!(build_id = %build_id, "creating build");

        let _created: Option<BuildRow> = self
            .db
            .create("builds")
            .content(row)
            .await
            .map_err(backend)?;

        Ok(build_id)
    }

    async fn append_log(&self, build_id: &BuildId, entry: LogEntry) -> StorageResult<()> {
        self.fetch_running(build_id).await?;

        let row = BuildLogRow {
            id: None,
            build_id: build_id.0.clone(),
            seq: entry.seq,
            record: entry.record,
            timestamp: entry.timestamp,
        };

        let _created: Option<BuildLogRow> = self
            .db
            .create("build_logs")
            .content(row)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn finish_build(&self, build_id: &BuildId, summary: BuildSummary) -> StorageResult<()> {
        self.close_build(build_id, BuildStatus::Finished, summary).await
    }

    async fn abandon_build(
        &self,
        build_id: &BuildId,
        summary: BuildSummary,
    ) -> StorageResult<()> {
        let summary = BuildSummary {
            result: None,
            ..summary
        };
        self.close_build(build_id, BuildStatus::Abandoned, summary).await
    }

    async fn get_build(&self, build_id: &BuildId) -> StorageResult<BuildRecord> {
        let row = self.fetch_build(build_id).await?;
        Self::row_to_record(row)
    }

    async fn get_logs(&self, build_id: &BuildId) -> StorageResult<Vec<LogEntry>> {
        self.fetch_build(build_id).await?;

        let mut res = self
            .db
            .query("SELECT * FROM build_logs WHERE build_id = $bid ORDER BY seq ASC")
            .bind(("bid", build_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<BuildLogRow> = res.take(0).map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|row| LogEntry {
                seq: row.seq,
                record: row.record,
                timestamp: row.timestamp,
            })
            .collect())
    }

    async fn list_builds(&self, builder: Option<&str>) -> StorageResult<Vec<BuildRecord>> {
        let rows: Vec<BuildRow> = if let Some(builder) = builder {
            let mut res = self
                .db
                .query("SELECT * FROM builds WHERE builder = $builder ORDER BY created_at DESC")
                .bind(("builder", builder.to_string()))
                .await
                .map_err(backend)?;
            res.take(0).map_err(backend)?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM builds ORDER BY created_at DESC")
                .await
                .map_err(backend)?;
            res.take(0).map_err(backend)?
        };

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
