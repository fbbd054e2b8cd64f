//! The ephemeral build master.
//!
//! A master lives for a single invocation: it is started with the (already
//! mount-injected) configuration, runs exactly one build, optionally hands
//! the build environment to the operator, and is stopped.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use localbuild_core::config::MasterConfig;
use localbuild_core::{obs, BuildRequest, LocalBuildError, Result, ResultCode};
use localbuild_state::{
    BuildLedger, BuildMetadata, BuildSummary, ContentDigest, SurrealBuildLedger,
};
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

use crate::runner::{LogWriter, StepRunner};
use crate::worker::{worker_for, Worker};

/// Lifecycle of a build master as driven by the orchestrator.
#[async_trait]
pub trait BuildMaster: Send {
    fn name(&self) -> &str;

    /// Bring the master up. Configuration problems surface here.
    async fn start(&mut self) -> Result<()>;

    /// Run one build, sending every log record to `logs` as it is produced.
    ///
    /// Returns `None` when the build never reached completion.
    async fn trigger(
        &mut self,
        request: &BuildRequest,
        logs: mpsc::UnboundedSender<String>,
    ) -> Result<Option<ResultCode>>;

    /// Interactive session in the last build's environment.
    async fn attach(&mut self) -> Result<()>;

    /// Tear everything down. Must be safe to call in any state.
    async fn stop(&mut self) -> Result<()>;
}

/// In-process master backed by an in-memory ledger.
pub struct EphemeralMaster {
    config: MasterConfig,
    project: String,
    ledger: Option<Arc<dyn BuildLedger>>,
    worker: Option<Box<dyn Worker>>,
}

impl EphemeralMaster {
    pub fn new(config: MasterConfig, project: impl Into<String>) -> Self {
        Self {
            config,
            project: project.into(),
            ledger: None,
            worker: None,
        }
    }

    /// Ledger of the running master, if started.
    pub fn ledger(&self) -> Option<Arc<dyn BuildLedger>> {
        self.ledger.clone()
    }

    async fn run_build(
        &mut self,
        request: &BuildRequest,
        log: &mut LogWriter,
    ) -> Result<Option<ResultCode>> {
        let builder = self
            .config
            .project(Some(self.project.as_str()))?
            .builder(&request.builder_name)?
            .clone();

        // Owned by the master before preparing, so `stop` releases it even
        // when the build is interrupted mid-preparation.
        let worker = self.worker.insert(worker_for(&builder)?);
        if let Err(e) = worker.prepare().await {
            warn!(worker = %worker.name(), error = %e, "worker preparation failed");
            log.header(&format!("worker {} could not be prepared: {e}", worker.name()))
                .await?;
            if let Some(mut worker) = self.worker.take() {
                worker.release().await.ok();
            }
            return Ok(None);
        }

        let (result, steps) = StepRunner::new(worker.as_ref(), &builder, request)
            .run(log)
            .await?;
        info!(steps = steps.len(), result = %result, "build finished");
        Ok(Some(result))
    }
}

#[async_trait]
impl BuildMaster for EphemeralMaster {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn start(&mut self) -> Result<()> {
        let warnings = self.config.validate()?;
        for warning in &warnings {
            warn!(master = %self.config.name, "{warning}");
        }

        let ledger = SurrealBuildLedger::in_memory()
            .await
            .map_err(|e| LocalBuildError::Master(e.to_string()))?;
        self.ledger = Some(Arc::new(ledger));

        obs::emit_master_started(&self.config.name, self.config.workers().len());
        Ok(())
    }

    async fn trigger(
        &mut self,
        request: &BuildRequest,
        logs: mpsc::UnboundedSender<String>,
    ) -> Result<Option<ResultCode>> {
        let ledger = self
            .ledger
            .clone()
            .ok_or_else(|| LocalBuildError::Master("master is not running".to_string()))?;

        let stamp = &request.source_stamp;
        obs::emit_build_triggered(
            &request.builder_name,
            &stamp.repository,
            &stamp.branch,
            request.uses_local_sources(),
        );

        let digest = ContentDigest::from_bytes(&serde_json::to_vec(request)?);
        let metadata = BuildMetadata {
            builder: request.builder_name.clone(),
            project: stamp.project.clone(),
            repository: stamp.repository.clone(),
            branch: stamp.branch.clone(),
            revision: stamp.revision.clone(),
            local_sources: request.uses_local_sources(),
        };
        let build_id = ledger
            .create_build(&digest, metadata)
            .await
            .map_err(|e| LocalBuildError::Master(e.to_string()))?;

        let start = Instant::now();
        let mut log = LogWriter::new(ledger.clone(), build_id.clone(), logs);
        let span = obs::build_span(&request.builder_name, &build_id.0);
        let outcome = self.run_build(request, &mut log).instrument(span).await?;

        let summary = BuildSummary {
            result: outcome.map(|code| code.name().to_string()),
            total_logs: log.count(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        let closed = match outcome {
            Some(_) => ledger.finish_build(&build_id, summary.clone()).await,
            None => ledger.abandon_build(&build_id, summary.clone()).await,
        };
        closed.map_err(|e| LocalBuildError::Master(e.to_string()))?;

        obs::emit_build_finished(
            &request.builder_name,
            summary.result.as_deref(),
            summary.duration_ms,
        );
        Ok(outcome)
    }

    async fn attach(&mut self) -> Result<()> {
        match self.worker.as_mut() {
            Some(worker) => worker.attach().await,
            None => Err(LocalBuildError::Master(
                "no build environment to attach to".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let released = match self.worker.take() {
            Some(mut worker) => worker.release().await,
            None => Ok(()),
        };
        if self.ledger.take().is_some() {
            obs::emit_master_stopped(&self.config.name);
        }
        released
    }
}
