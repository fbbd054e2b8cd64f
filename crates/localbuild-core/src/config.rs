//! Static master configuration: projects, builders, steps and images.
//!
//! The configuration is a TOML document. Loading validates it: hard problems
//! come back as [`ConfigErrors`], soft problems as warnings on the
//! [`LoadedConfig`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigErrors, LocalBuildError, Result};
use crate::image::{ImageCollection, ImageDescriptor};

fn default_master_name() -> String {
    "localbuild".to_string()
}

fn default_builder_kind() -> BuilderKind {
    BuilderKind::Local
}

fn default_builder_workdir() -> String {
    "/build".to_string()
}

fn default_checkout_workdir() -> String {
    "source".to_string()
}

fn default_step_workdir() -> String {
    ".".to_string()
}

fn default_timeout_secs() -> u64 {
    1200
}

fn default_true() -> bool {
    true
}

/// Execution environment a builder runs its steps in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderKind {
    /// Steps run directly on the host, in a scratch directory.
    Local,
    /// Steps run inside a short-lived container.
    Docker,
}

impl BuilderKind {
    pub fn name(&self) -> &'static str {
        match self {
            BuilderKind::Local => "local",
            BuilderKind::Docker => "docker",
        }
    }

    /// Whether host directories can be mounted in place of checkouts.
    pub fn supports_local_mount(&self) -> bool {
        matches!(self, BuilderKind::Docker)
    }
}

impl std::fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of a builder's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Fetch the source stamp into `workdir`.
    Checkout {
        name: String,
        #[serde(default = "default_checkout_workdir")]
        workdir: String,
        /// Repository used instead of the source stamp's.
        #[serde(default)]
        repo: Option<String>,
    },

    /// Run a command; the first element is the executable.
    Shell {
        name: String,
        command: Vec<String>,
        #[serde(default = "default_step_workdir")]
        workdir: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        warn_on_failure: bool,
        #[serde(default = "default_true")]
        halt_on_failure: bool,
    },
}

impl StepConfig {
    pub fn name(&self) -> &str {
        match self {
            StepConfig::Checkout { name, .. } | StepConfig::Shell { name, .. } => name,
        }
    }

    pub fn workdir(&self) -> &str {
        match self {
            StepConfig::Checkout { workdir, .. } | StepConfig::Shell { workdir, .. } => workdir,
        }
    }

    pub fn is_checkout(&self) -> bool {
        matches!(self, StepConfig::Checkout { .. })
    }
}

/// A named build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub name: String,
    #[serde(default = "default_builder_kind")]
    pub kind: BuilderKind,
    /// Container image, required for docker builders.
    #[serde(default)]
    pub image: Option<String>,
    /// Build root inside the execution environment.
    #[serde(default = "default_builder_workdir")]
    pub workdir: String,
    /// Volume specs in `host:container[:mode]` form.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Default build properties, overridden by the operator's.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl BuilderConfig {
    pub fn checkout_steps(&self) -> impl Iterator<Item = &StepConfig> {
        self.steps.iter().filter(|s| s.is_checkout())
    }
}

impl std::fmt::Display for BuilderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// A project: one repository with its builders and images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
    #[serde(default)]
    pub builders: Vec<BuilderConfig>,
}

impl ProjectConfig {
    pub fn builder_names(&self) -> Vec<&str> {
        self.builders.iter().map(|b| b.name.as_str()).collect()
    }

    /// Look up a builder; unknown names are a usage error listing the valid ones.
    pub fn builder(&self, name: &str) -> Result<&BuilderConfig> {
        self.builders
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| self.unknown_builder(name))
    }

    pub fn builder_mut(&mut self, name: &str) -> Result<&mut BuilderConfig> {
        match self.builders.iter().position(|b| b.name == name) {
            Some(index) => Ok(&mut self.builders[index]),
            None => Err(self.unknown_builder(name)),
        }
    }

    pub fn image_collection(&self) -> ImageCollection {
        ImageCollection::new(self.images.clone())
    }

    fn unknown_builder(&self, name: &str) -> LocalBuildError {
        let available: Vec<String> = self
            .builders
            .iter()
            .map(|b| format!(" - {}", b.name))
            .collect();
        LocalBuildError::usage(format!(
            "Project {} doesn't have a builder named `{}`.\nSelect one from the following list:\n{}",
            self.name,
            name,
            available.join("\n")
        ))
    }
}

/// The whole master configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_master_name")]
    pub name: String,
    /// Web UI address of the persistent master, informational only.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// A validated configuration plus the non-fatal warnings found while loading it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: MasterConfig,
    pub warnings: Vec<String>,
}

impl MasterConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: &Path) -> std::result::Result<LoadedConfig, ConfigErrors> {
        debug!(path = %path.display(), "loading master configuration");
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigErrors {
            errors: vec![format!("cannot read {}: {}", path.display(), e)],
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate a TOML configuration document.
    pub fn from_toml_str(raw: &str) -> std::result::Result<LoadedConfig, ConfigErrors> {
        let config: MasterConfig = toml::from_str(raw).map_err(|e| ConfigErrors {
            errors: vec![format!("invalid configuration: {e}")],
        })?;
        let warnings = config.validate()?;
        Ok(LoadedConfig { config, warnings })
    }

    /// Check the configuration; returns the warnings when there are no errors.
    pub fn validate(&self) -> std::result::Result<Vec<String>, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut warnings = Vec::new();

        if self.projects.is_empty() {
            errors.push("no projects configured");
        }

        let mut project_names = HashSet::new();
        for project in &self.projects {
            if !project_names.insert(project.name.as_str()) {
                errors.push(format!("duplicate project name `{}`", project.name));
            }
            if project.builders.is_empty() {
                warnings.push(format!("project `{}` has no builders", project.name));
            }

            let mut builder_names = HashSet::new();
            for builder in &project.builders {
                if !builder_names.insert(builder.name.as_str()) {
                    errors.push(format!(
                        "duplicate builder name `{}` in project `{}`",
                        builder.name, project.name
                    ));
                }
                validate_builder(project, builder, &mut errors, &mut warnings);
            }
        }

        errors.into_result()?;
        Ok(warnings)
    }

    /// Select a project by name; optional when only one is configured.
    pub fn project(&self, name: Option<&str>) -> Result<&ProjectConfig> {
        let index = self.project_index(name)?;
        Ok(&self.projects[index])
    }

    pub fn project_mut(&mut self, name: Option<&str>) -> Result<&mut ProjectConfig> {
        let index = self.project_index(name)?;
        Ok(&mut self.projects[index])
    }

    fn project_index(&self, name: Option<&str>) -> Result<usize> {
        let names = self
            .projects
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        match name {
            None if self.projects.len() == 1 => Ok(0),
            None => Err(LocalBuildError::usage(format!(
                "Master config has multiple projects, one must be selected: {names}"
            ))),
            Some(name) => self
                .projects
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| {
                    LocalBuildError::usage(format!(
                        "Invalid project name {name}, possible values are: {names}"
                    ))
                }),
        }
    }

    /// Images of every project, in declaration order.
    pub fn images(&self) -> ImageCollection {
        self.projects
            .iter()
            .flat_map(|p| p.images.iter().cloned())
            .collect()
    }

    /// Worker names of every project, deduplicated, in declaration order.
    pub fn workers(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.projects
            .iter()
            .flat_map(|p| p.workers.iter().map(String::as_str))
            .filter(|w| seen.insert(*w))
            .collect()
    }

    pub fn builders(&self) -> impl Iterator<Item = &BuilderConfig> {
        self.projects.iter().flat_map(|p| p.builders.iter())
    }
}

fn validate_builder(
    project: &ProjectConfig,
    builder: &BuilderConfig,
    errors: &mut ConfigErrors,
    warnings: &mut Vec<String>,
) {
    match (&builder.kind, &builder.image) {
        (BuilderKind::Docker, None) => errors.push(format!(
            "docker builder `{}` must declare an image",
            builder.name
        )),
        (BuilderKind::Docker, Some(image)) => {
            if project.image_collection().get(image).is_none() {
                warnings.push(format!(
                    "builder `{}` uses image `{}` which project `{}` does not declare",
                    builder.name, image, project.name
                ));
            }
        }
        (BuilderKind::Local, _) => {}
    }

    if builder.steps.is_empty() {
        warnings.push(format!("builder `{}` has no steps", builder.name));
    }

    for step in &builder.steps {
        if let StepConfig::Shell { name, command, .. } = step {
            if command.is_empty() {
                errors.push(format!(
                    "step `{}` of builder `{}` has an empty command",
                    name, builder.name
                ));
            }
        }
    }
}
