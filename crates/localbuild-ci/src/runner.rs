//! Step execution with streamed output.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use localbuild_core::config::{BuilderConfig, StepConfig};
use localbuild_core::log_relay::{record, LogCategory};
use localbuild_core::{obs, BuildRequest, LocalBuildError, ResultCode, Result};
use localbuild_state::{BuildId, BuildLedger, LogEntry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::worker::Worker;

/// Timeout applied to each git command of a checkout step.
const CHECKOUT_TIMEOUT_SECS: u64 = 1200;

/// Records a build's log: ledger first, then the relay channel.
pub struct LogWriter {
    ledger: Arc<dyn BuildLedger>,
    build_id: BuildId,
    seq: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl LogWriter {
    pub fn new(
        ledger: Arc<dyn BuildLedger>,
        build_id: BuildId,
        tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            ledger,
            build_id,
            seq: 0,
            tx,
        }
    }

    pub async fn write(&mut self, category: LogCategory, text: &str) -> Result<()> {
        self.seq += 1;
        let line = record(category, text);
        self.ledger
            .append_log(&self.build_id, LogEntry::new(self.seq, line.clone()))
            .await
            .map_err(|e| LocalBuildError::Master(e.to_string()))?;
        obs::emit_log_appended(&self.build_id.0, self.seq);

        // A closed receiver only means nobody is watching the relay.
        let _ = self.tx.send(line);
        Ok(())
    }

    pub async fn header(&mut self, text: &str) -> Result<()> {
        self.write(LogCategory::Header, text).await
    }

    /// Records written so far.
    pub fn count(&self) -> u64 {
        self.seq
    }
}

/// How a single command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(i32),
    TimedOut,
    SpawnFailed(String),
}

/// Run one command in the worker, streaming stdout and stderr line by line.
///
/// A `timeout_secs` of zero disables the timeout.
pub async fn run_command(
    worker: &dyn Worker,
    argv: &[String],
    workdir: &str,
    env: &BTreeMap<String, String>,
    timeout_secs: u64,
    log: &mut LogWriter,
) -> Result<CommandStatus> {
    let mut command = worker.command(argv, workdir, env)?;
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return Ok(CommandStatus::SpawnFailed(e.to_string())),
    };
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(LocalBuildError::Master("child output not captured".to_string()));
    };

    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();

    let streamed = async {
        let (mut out_done, mut err_done) = (false, false);
        while !(out_done && err_done) {
            tokio::select! {
                line = out.next_line(), if !out_done => match line? {
                    Some(line) => log.write(LogCategory::Stdout, &line).await?,
                    None => out_done = true,
                },
                line = err.next_line(), if !err_done => match line? {
                    Some(line) => log.write(LogCategory::Stderr, &line).await?,
                    None => err_done = true,
                },
            }
        }
        Ok::<_, LocalBuildError>(child.wait().await?)
    };

    let finished = if timeout_secs > 0 {
        tokio::time::timeout(Duration::from_secs(timeout_secs), streamed).await
    } else {
        Ok(streamed.await)
    };

    match finished {
        Ok(status) => Ok(CommandStatus::Exited(status?.code().unwrap_or(-1))),
        Err(_) => {
            child.start_kill().ok();
            Ok(CommandStatus::TimedOut)
        }
    }
}

/// Environment exported to every step: builder defaults overridden by the
/// request's properties, then the source stamp.
pub fn step_env(builder: &BuilderConfig, request: &BuildRequest) -> BTreeMap<String, String> {
    let mut env = builder.properties.clone();
    env.extend(request.properties.clone());

    let stamp = &request.source_stamp;
    env.insert("LOCALBUILD_BUILDER".to_string(), builder.name.clone());
    env.insert("LOCALBUILD_BRANCH".to_string(), stamp.branch.clone());
    env.insert("LOCALBUILD_REPOSITORY".to_string(), stamp.repository.clone());
    if let Some(revision) = &stamp.revision {
        env.insert("LOCALBUILD_REVISION".to_string(), revision.clone());
    }
    env
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    pub result: ResultCode,
    pub duration_ms: u64,
}

/// Runs a builder's steps for one request inside a prepared worker.
pub struct StepRunner<'a> {
    worker: &'a dyn Worker,
    builder: &'a BuilderConfig,
    request: &'a BuildRequest,
    env: BTreeMap<String, String>,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        worker: &'a dyn Worker,
        builder: &'a BuilderConfig,
        request: &'a BuildRequest,
    ) -> Self {
        Self {
            worker,
            builder,
            request,
            env: step_env(builder, request),
        }
    }

    /// Run every step in order; the build result is the worst step result.
    pub async fn run(&self, log: &mut LogWriter) -> Result<(ResultCode, Vec<StepResult>)> {
        let mut overall = ResultCode::Success;
        let mut results = Vec::new();

        for (index, step) in self.builder.steps.iter().enumerate() {
            log.header(&format!("step {}: {}", index + 1, step.name()))
                .await?;

            let start = Instant::now();
            let result = match step {
                StepConfig::Checkout { workdir, repo, .. } => {
                    self.checkout(workdir, repo.as_deref(), log).await?
                }
                StepConfig::Shell {
                    command,
                    workdir,
                    timeout_secs,
                    warn_on_failure,
                    ..
                } => {
                    let status =
                        run_command(self.worker, command, workdir, &self.env, *timeout_secs, log)
                            .await?;
                    self.shell_result(status, *warn_on_failure, log).await?
                }
            };

            let duration_ms = start.elapsed().as_millis() as u64;
            debug!(step = %step.name(), result = %result, duration_ms, "step finished");
            overall = overall.worst(result);
            results.push(StepResult {
                name: step.name().to_string(),
                result,
                duration_ms,
            });

            if result >= ResultCode::Failure && halts(step) {
                info!(step = %step.name(), "halting build after failed step");
                log.header(&format!("build halted after step {}", step.name()))
                    .await?;
                break;
            }
        }

        Ok((overall, results))
    }

    async fn shell_result(
        &self,
        status: CommandStatus,
        warn_on_failure: bool,
        log: &mut LogWriter,
    ) -> Result<ResultCode> {
        let result = match &status {
            CommandStatus::Exited(0) => ResultCode::Success,
            CommandStatus::Exited(code) => {
                log.header(&format!("command exited with code {code}")).await?;
                if warn_on_failure {
                    ResultCode::Warnings
                } else {
                    ResultCode::Failure
                }
            }
            CommandStatus::TimedOut => {
                log.header("command timed out").await?;
                ResultCode::Exception
            }
            CommandStatus::SpawnFailed(e) => {
                log.header(&format!("command could not be started: {e}"))
                    .await?;
                ResultCode::Exception
            }
        };
        Ok(result)
    }

    async fn checkout(
        &self,
        workdir: &str,
        repo: Option<&str>,
        log: &mut LogWriter,
    ) -> Result<ResultCode> {
        if let Some(mounts) = &self.request.local_sources {
            return match mounts.for_destination(workdir) {
                Some(mount) => {
                    log.header(&format!(
                        "using local source {} for {workdir}, checkout skipped",
                        mount.host.display()
                    ))
                    .await?;
                    Ok(ResultCode::Success)
                }
                None => {
                    log.header(&format!("no local source mounted for {workdir}"))
                        .await?;
                    Ok(ResultCode::Exception)
                }
            };
        }

        let stamp = &self.request.source_stamp;
        let repository = repo.unwrap_or(&stamp.repository);
        let target = stamp
            .revision
            .clone()
            .unwrap_or_else(|| "FETCH_HEAD".to_string());

        let commands: [(Vec<String>, &str); 3] = [
            (git(&["clone", repository, workdir]), "."),
            (git(&["fetch", "origin", &stamp.branch]), workdir),
            (git(&["checkout", &target]), workdir),
        ];

        for (argv, dir) in &commands {
            let status =
                run_command(self.worker, argv, dir, &self.env, CHECKOUT_TIMEOUT_SECS, log).await?;
            let result = self.shell_result(status, false, log).await?;
            if result != ResultCode::Success {
                return Ok(result);
            }
        }
        Ok(ResultCode::Success)
    }
}

fn git(args: &[&str]) -> Vec<String> {
    std::iter::once("git")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

fn halts(step: &StepConfig) -> bool {
    match step {
        StepConfig::Checkout { .. } => true,
        StepConfig::Shell {
            halt_on_failure, ..
        } => *halt_on_failure,
    }
}
