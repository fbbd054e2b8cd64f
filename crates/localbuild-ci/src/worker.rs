//! Execution environments for builder steps.
//!
//! A worker owns the place a build runs in: a scratch directory on the host
//! for local builders, a detached container for docker builders. Steps are
//! run through [`Worker::command`]; the worker stays alive until released so
//! an operator can attach to it after a failure.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use localbuild_core::config::{BuilderConfig, BuilderKind};
use localbuild_core::{LocalBuildError, Result};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Bring the environment up. Called once before any step.
    async fn prepare(&mut self) -> Result<()>;

    /// Command running `argv` in `workdir` (relative to the build root) with
    /// `env` exported.
    fn command(
        &self,
        argv: &[String],
        workdir: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<Command>;

    /// Interactive shell inside the environment, inheriting the terminal.
    async fn attach(&mut self) -> Result<()>;

    /// Tear the environment down. Idempotent.
    async fn release(&mut self) -> Result<()>;
}

/// Worker matching the builder's kind.
pub fn worker_for(builder: &BuilderConfig) -> Result<Box<dyn Worker>> {
    match builder.kind {
        BuilderKind::Local => Ok(Box::new(LocalWorker::new(&builder.name))),
        BuilderKind::Docker => {
            let image = builder.image.clone().ok_or_else(|| {
                LocalBuildError::Master(format!(
                    "docker builder `{}` has no image",
                    builder.name
                ))
            })?;
            Ok(Box::new(DockerWorker::new(
                &builder.name,
                image,
                builder.workdir.clone(),
                builder.volumes.clone(),
            )))
        }
    }
}

async fn interactive(mut command: Command) -> Result<()> {
    let status = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;
    debug!(status = %status, "attach session ended");
    Ok(())
}

/// Runs steps on the host in a temporary build root.
pub struct LocalWorker {
    name: String,
    root: Option<TempDir>,
}

impl LocalWorker {
    pub fn new(builder: &str) -> Self {
        Self {
            name: format!("local-{builder}"),
            root: None,
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_ref().map(TempDir::path)
    }

    fn require_root(&self) -> Result<&Path> {
        self.root()
            .ok_or_else(|| LocalBuildError::Master(format!("worker {} is not prepared", self.name)))
    }
}

#[async_trait]
impl Worker for LocalWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self) -> Result<()> {
        let root = tempfile::Builder::new().prefix("localbuild-").tempdir()?;
        info!(worker = %self.name, root = %root.path().display(), "local worker ready");
        self.root = Some(root);
        Ok(())
    }

    fn command(
        &self,
        argv: &[String],
        workdir: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<Command> {
        let (exe, args) = argv
            .split_first()
            .ok_or_else(|| LocalBuildError::Master("empty command".to_string()))?;
        let dir = self.require_root()?.join(workdir);
        std::fs::create_dir_all(&dir)?;

        let mut command = Command::new(exe);
        command.args(args).current_dir(dir).envs(env);
        Ok(command)
    }

    async fn attach(&mut self) -> Result<()> {
        let root = self.require_root()?;
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        info!(worker = %self.name, shell = %shell, "attaching to local build root");

        let mut command = Command::new(shell);
        command.current_dir(root);
        interactive(command).await
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(root) = self.root.take() {
            debug!(worker = %self.name, "removing local build root");
            root.close()?;
        }
        Ok(())
    }
}

/// Runs steps inside a detached container started from the builder's image.
pub struct DockerWorker {
    name: String,
    image: String,
    workdir: String,
    volumes: Vec<String>,
    container: Option<String>,
}

impl DockerWorker {
    pub fn new(builder: &str, image: String, workdir: String, volumes: Vec<String>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            name: format!("localbuild-{builder}-{}", &suffix[..8]),
            image,
            workdir,
            volumes,
            container: None,
        }
    }

    /// `docker run` arguments starting the idle container.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-w".to_string(),
            self.workdir.clone(),
        ];
        for volume in &self.volumes {
            args.push("-v".to_string());
            args.push(volume.clone());
        }
        args.extend([
            self.image.clone(),
            "tail".to_string(),
            "-f".to_string(),
            "/dev/null".to_string(),
        ]);
        args
    }

    /// `docker exec` arguments running `argv` in `workdir`, created on demand.
    pub fn exec_args(
        &self,
        container: &str,
        argv: &[String],
        workdir: &str,
        env: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.extend([
            "-w".to_string(),
            self.workdir.clone(),
            container.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            r#"mkdir -p "$1" && cd "$1" && shift && exec "$@""#.to_string(),
            "sh".to_string(),
            workdir.to_string(),
        ]);
        args.extend(argv.iter().cloned());
        args
    }

    fn require_container(&self) -> Result<&str> {
        self.container
            .as_deref()
            .ok_or_else(|| LocalBuildError::Master(format!("worker {} is not prepared", self.name)))
    }
}

#[async_trait]
impl Worker for DockerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self) -> Result<()> {
        info!(worker = %self.name, image = %self.image, "starting container");
        // Addressed by name from here on, so `release` can remove a container
        // whose start was cut short.
        self.container = Some(self.name.clone());
        let output = Command::new("docker")
            .args(self.run_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(LocalBuildError::Master(format!(
                "docker run failed for {}: {}",
                self.image,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(worker = %self.name, container = %id, "container started");
        Ok(())
    }

    fn command(
        &self,
        argv: &[String],
        workdir: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<Command> {
        if argv.is_empty() {
            return Err(LocalBuildError::Master("empty command".to_string()));
        }
        let container = self.require_container()?;
        let mut command = Command::new("docker");
        command.args(self.exec_args(container, argv, workdir, env));
        Ok(command)
    }

    async fn attach(&mut self) -> Result<()> {
        let container = self.require_container()?;
        info!(worker = %self.name, "attaching to container");

        let mut command = Command::new("docker");
        command.args(["exec", "-it", container, "/bin/bash"]);
        interactive(command).await
    }

    async fn release(&mut self) -> Result<()> {
        let Some(container) = self.container.take() else {
            return Ok(());
        };

        let output = Command::new("docker")
            .args(["rm", "-f", container.as_str()])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            warn!(
                worker = %self.name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "failed to remove container"
            );
            return Err(LocalBuildError::Master(format!(
                "docker rm failed for {container}"
            )));
        }
        Ok(())
    }
}
