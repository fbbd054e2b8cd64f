//! localbuild - reproduce a CI build on the local machine
//!
//! ## Commands
//!
//! - `desc`: List the images, workers and builders of the master
//! - `checkconfig`: Validate the configuration file
//! - `images list`: List images matching the given filters
//! - `project desc`: Describe one project
//! - `project build`: Run one of the project's builders against an
//!   ephemeral, in-memory master

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::debug;

use localbuild_ci::{BuildInvocation, EphemeralOrchestrator};
use localbuild_core::config::{MasterConfig, ProjectConfig};
use localbuild_core::telemetry::level_for;
use localbuild_core::{
    init_tracing, parse_mount_flag, parse_property_flag, ImageFilter, LocalBuildError,
};

#[derive(Parser)]
#[command(name = "localbuild")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reproduce CI builds locally", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only report warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Master configuration file
    #[arg(short, long, env = "LOCALBUILD_CONFIG", default_value = "localbuild.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the images, workers and builders of the master
    Desc,

    /// Validate the configuration file
    Checkconfig,

    /// Container images declared by the projects
    Images {
        #[command(flatten)]
        filter: ImageArgs,

        #[command(subcommand)]
        action: ImagesAction,
    },

    /// Project level commands
    Project {
        /// Project to use; optional when only one is configured
        #[arg(short, long, env = "LOCALBUILD_PROJECT")]
        project: Option<String>,

        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand)]
enum ImagesAction {
    /// Print the fully qualified name of every matching image
    List,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Describe the project
    Desc,

    /// Run a builder locally
    Build(BuildArgs),
}

/// Image selection; every pattern accepts `*` and `?` wildcards.
#[derive(Args, Debug, Clone)]
struct ImageArgs {
    #[arg(long, default_value = "*")]
    name: String,

    #[arg(long, default_value = "*")]
    tag: String,

    #[arg(long, default_value = "*")]
    variant: String,

    /// Only images without a variant
    #[arg(long, conflicts_with = "variant")]
    no_variant: bool,

    #[arg(long, default_value = "*")]
    arch: String,

    #[arg(long, default_value = "*")]
    system: String,

    #[arg(long, default_value = "*")]
    distro: String,
}

impl From<ImageArgs> for ImageFilter {
    fn from(args: ImageArgs) -> Self {
        ImageFilter {
            name: args.name,
            tag: args.tag,
            variant: args.variant,
            no_variant: args.no_variant,
            arch: args.arch,
            system: args.system,
            distro: args.distro,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    /// Builder to run
    builder: String,

    /// Repository to build instead of the project's
    #[arg(short, long)]
    repo: Option<String>,

    #[arg(short, long, default_value = "master")]
    branch: String,

    #[arg(short, long)]
    commit: Option<String>,

    /// Build the merge ref of this pull request; overrides --branch
    #[arg(long = "pull-request", visible_alias = "pr")]
    pull_request: Option<u64>,

    /// Build property, repeatable
    #[arg(
        short = 'P',
        long = "property",
        value_name = "NAME=VALUE",
        value_parser = parse_property_flag
    )]
    properties: Vec<(String, String)>,

    /// Mount a host directory in place of a checkout, repeatable
    #[arg(
        short = 's',
        long = "mount-source",
        value_name = "SRC:DST",
        value_parser = parse_mount_flag
    )]
    mounts: Vec<(String, String)>,

    /// Open a shell in the build environment if the build fails
    #[arg(short, long)]
    attach_on_failure: bool,
}

impl BuildArgs {
    fn into_invocation(self, project: Option<String>) -> BuildInvocation {
        BuildInvocation {
            project,
            builder: self.builder,
            repo: self.repo,
            branch: self.branch,
            commit: self.commit,
            pull_request: self.pull_request,
            properties: self.properties.into_iter().collect(),
            mounts: self.mounts,
            attach_on_failure: self.attach_on_failure,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json, level_for(cli.verbose, cli.quiet));

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Desc => {
            print!("{}", describe_master(&config));
            Ok(())
        }
        Commands::Checkconfig => {
            println!("{}", "Config file is good!".green());
            Ok(())
        }
        Commands::Images { filter, action } => match action {
            ImagesAction::List => {
                for fqn in list_images(&config, filter) {
                    println!("{fqn}");
                }
                Ok(())
            }
        },
        Commands::Project { project, action } => match action {
            ProjectAction::Desc => {
                let project = config.project(project.as_deref())?;
                print!("{}", describe_project(project));
                Ok(())
            }
            ProjectAction::Build(args) => cmd_build(config, args.into_invocation(project)),
        },
    }
}

/// Load and validate the configuration, printing warnings in red.
fn load_config(path: &Path) -> Result<MasterConfig> {
    let loaded = MasterConfig::load(path)
        .map_err(LocalBuildError::from)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    for warning in &loaded.warnings {
        eprintln!("{}", format!("warning: {warning}").red());
    }
    debug!(projects = loaded.config.projects.len(), "configuration loaded");
    Ok(loaded.config)
}

fn cmd_build(config: MasterConfig, invocation: BuildInvocation) -> Result<()> {
    println!("{}", trigger_banner(&config, &invocation)?);

    let mut orchestrator = EphemeralOrchestrator::new(config);
    let verdict = orchestrator.execute(invocation)?;
    let outcome = verdict.outcome.into_result()?;
    println!("{}", outcome.message().green());
    Ok(())
}

/// Announcement printed once the builder is known to exist.
fn trigger_banner(config: &MasterConfig, invocation: &BuildInvocation) -> Result<String> {
    let builder = config
        .project(invocation.project.as_deref())?
        .builder(&invocation.builder)?;
    Ok(format!("Triggering builder: {}", builder.name))
}

fn bullet_list(title: &str, items: impl IntoIterator<Item = String>) -> String {
    let mut out = format!("{title}:\n");
    for item in items {
        out.push_str(&format!(" - {item}\n"));
    }
    out
}

fn describe_master(config: &MasterConfig) -> String {
    let images = config.images();
    let mut out = bullet_list("Images", images.iter().map(|i| i.fqn()));
    out.push_str(&bullet_list(
        "Workers",
        config.workers().into_iter().map(str::to_string),
    ));
    out.push_str(&bullet_list(
        "Builders",
        config.builders().map(|b| b.to_string()),
    ));
    out
}

fn describe_project(project: &ProjectConfig) -> String {
    let mut out = format!("Name: {}\nRepo: {}\n", project.name, project.repo);
    out.push_str(&bullet_list(
        "Images",
        project.images.iter().map(|i| i.fqn()),
    ));
    out.push_str(&bullet_list("Workers", project.workers.iter().cloned()));
    out.push_str(&bullet_list(
        "Builders",
        project.builders.iter().map(|b| b.to_string()),
    ));
    out
}

fn list_images(config: &MasterConfig, args: ImageArgs) -> Vec<String> {
    let predicate = ImageFilter::from(args).predicate();
    let selected = config.images().filter(&predicate);
    selected.iter().map(|i| i.fqn()).collect()
}
