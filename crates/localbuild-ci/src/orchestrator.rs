//! One local build, end to end.
//!
//! The orchestrator resolves the request against the configuration, starts
//! an ephemeral master, relays the build log while waiting for completion,
//! classifies the result, optionally attaches to the build environment, and
//! always tears the master down before returning.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use localbuild_core::config::MasterConfig;
use localbuild_core::log_relay::{ConsoleLogRelay, LogSink};
use localbuild_core::{
    classify, mount, obs, BuildRequest, BuildResult, LocalBuildError, Outcome, Result,
    ResultCode, SourceStamp,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::master::{BuildMaster, EphemeralMaster};

/// Builds the master for one invocation from the final configuration and
/// the selected project name.
pub type MasterFactory = Box<dyn Fn(MasterConfig, &str) -> Box<dyn BuildMaster> + Send>;

fn ephemeral_master(config: MasterConfig, project: &str) -> Box<dyn BuildMaster> {
    Box::new(EphemeralMaster::new(config, project))
}

/// Resolves when the operator interrupts the build.
pub type Interrupt = Pin<Box<dyn Future<Output = ()> + Send>>;

fn ctrl_c() -> Interrupt {
    Box::pin(async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    })
}

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Starting,
    AwaitingTrigger,
    Running,
    AwaitingCompletion,
    TornDown,
}

/// What the operator asked to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    pub project: Option<String>,
    pub builder: String,
    pub repo: Option<String>,
    pub branch: String,
    pub commit: Option<String>,
    pub pull_request: Option<u64>,
    pub properties: BTreeMap<String, String>,
    /// `(host source, destination)` pairs.
    pub mounts: Vec<(String, String)>,
    pub attach_on_failure: bool,
}

impl BuildInvocation {
    pub fn new(builder: impl Into<String>) -> Self {
        Self {
            project: None,
            builder: builder.into(),
            repo: None,
            branch: "master".to_string(),
            commit: None,
            pull_request: None,
            properties: BTreeMap::new(),
            mounts: Vec::new(),
            attach_on_failure: false,
        }
    }
}

/// Result of a build that reached classification.
#[derive(Debug, Clone)]
pub struct BuildVerdict {
    pub outcome: Outcome,
    pub request: BuildRequest,
    pub logs: Vec<String>,
}

pub struct EphemeralOrchestrator {
    config: MasterConfig,
    factory: MasterFactory,
    sink: Box<dyn LogSink>,
    interrupt: Option<Interrupt>,
    state: OrchestratorState,
}

impl EphemeralOrchestrator {
    /// Orchestrator using [`EphemeralMaster`] and printing logs to stdout.
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            factory: Box::new(ephemeral_master),
            sink: Box::new(ConsoleLogRelay),
            interrupt: None,
            state: OrchestratorState::Idle,
        }
    }

    pub fn with_master_factory(
        mut self,
        factory: impl Fn(MasterConfig, &str) -> Box<dyn BuildMaster> + Send + 'static,
    ) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn with_log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Replace Ctrl-C as the interrupt for the next run.
    pub fn with_interrupt(mut self, interrupt: impl Future<Output = ()> + Send + 'static) -> Self {
        self.interrupt = Some(Box::pin(interrupt));
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run the build on a private current-thread runtime.
    pub fn execute(&mut self, invocation: BuildInvocation) -> Result<BuildVerdict> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(invocation))
    }

    /// Async form of [`Self::execute`] for callers that own a runtime.
    pub async fn run(&mut self, invocation: BuildInvocation) -> Result<BuildVerdict> {
        self.transition(OrchestratorState::Idle);
        let (config, request, project) = self.prepare(&invocation)?;

        self.transition(OrchestratorState::Starting);
        let mut master = (self.factory)(config, &project);

        let verdict = match master.start().await {
            Ok(()) => self.drive(master.as_mut(), request).await,
            Err(e) => Err(e),
        };

        self.teardown(master.as_mut()).await;
        verdict
    }

    /// Everything that can be checked before a master exists.
    fn prepare(
        &self,
        invocation: &BuildInvocation,
    ) -> Result<(MasterConfig, BuildRequest, String)> {
        let selected = invocation.project.as_deref();
        let project = self.config.project(selected)?;
        project.builder(&invocation.builder)?;

        let mut config = self.config.clone();
        let local_sources = if invocation.mounts.is_empty() {
            None
        } else {
            let builder = config
                .project_mut(selected)?
                .builder_mut(&invocation.builder)?;
            Some(mount::inject(builder, &invocation.mounts)?)
        };

        let stamp = SourceStamp::resolve(
            &project.repo,
            invocation.repo.as_deref(),
            &invocation.branch,
            invocation.commit.as_deref(),
            invocation.pull_request,
            &project.name,
        );

        let attach_on = if invocation.attach_on_failure {
            ResultCode::failures().to_vec()
        } else {
            Vec::new()
        };
        let mut request = BuildRequest::new(invocation.builder.clone(), stamp)
            .with_properties(invocation.properties.clone())
            .with_attach_on(attach_on);
        if let Some(mounts) = local_sources {
            request = request.with_local_sources(mounts);
        }

        Ok((config, request, project.name.clone()))
    }

    async fn drive(
        &mut self,
        master: &mut dyn BuildMaster,
        request: BuildRequest,
    ) -> Result<BuildVerdict> {
        self.transition(OrchestratorState::AwaitingTrigger);
        self.transition(OrchestratorState::Running);
        self.transition(OrchestratorState::AwaitingCompletion);

        let interrupt = self.interrupt.take().unwrap_or_else(ctrl_c);
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut result = BuildResult::new();
        let sink = &mut self.sink;

        let relay = async {
            while let Some(line) = rx.recv().await {
                sink.handle(&line);
                result.push_log(line)?;
            }
            Ok::<_, LocalBuildError>(())
        };
        let triggered = async {
            let (code, relayed) = tokio::join!(master.trigger(&request, tx), relay);
            relayed?;
            code
        };

        // An interrupt also reaches the step's children; their exit must not
        // be mistaken for a completed build.
        let code = tokio::select! {
            biased;
            _ = interrupt => {
                warn!(builder = %request.builder_name, "interrupted, tearing down");
                None
            }
            code = triggered => code?,
        };

        if let Some(code) = code {
            result.finalize(code)?;
        }
        let outcome = classify(&result);
        info!(builder = %request.builder_name, outcome = %outcome, "build classified");

        if let Some(code) = result.result_code() {
            if request.should_attach(code) {
                obs::emit_attach_started(&request.builder_name, code.name());
                if let Err(e) = master.attach().await {
                    warn!(error = %e, "attach session failed");
                }
            }
        }

        Ok(BuildVerdict {
            outcome,
            request,
            logs: result.logs().to_vec(),
        })
    }

    async fn teardown(&mut self, master: &mut dyn BuildMaster) {
        if let Err(e) = master.stop().await {
            obs::emit_teardown_error(master.name(), &e);
        }
        self.transition(OrchestratorState::TornDown);
    }

    fn transition(&mut self, next: OrchestratorState) {
        debug!(from = ?self.state, to = ?next, "orchestrator transition");
        self.state = next;
    }
}
