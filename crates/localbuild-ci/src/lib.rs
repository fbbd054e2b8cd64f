//! localbuild CI - reproduce one CI build locally
//!
//! Provides:
//! - Workers running builder steps on the host or in a container
//! - A step runner streaming command output into the build log
//! - An ephemeral, in-memory build master
//! - The orchestrator driving a single build from request to teardown

pub mod master;
pub mod orchestrator;
pub mod runner;
pub mod worker;

pub use master::{BuildMaster, EphemeralMaster};
pub use orchestrator::{
    BuildInvocation, BuildVerdict, EphemeralOrchestrator, Interrupt, MasterFactory,
    OrchestratorState,
};
pub use runner::{run_command, step_env, CommandStatus, LogWriter, StepResult, StepRunner};
pub use worker::{worker_for, DockerWorker, LocalWorker, Worker};
