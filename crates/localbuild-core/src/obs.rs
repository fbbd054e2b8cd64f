//! Structured lifecycle events for one local build.
//!
//! Every event carries an `event` field so JSON output can be filtered on it.

use tracing::{debug, info, warn};

/// Span tagged with the builder and build id.
///
/// Attach it to the build future with `tracing::Instrument` so every record
/// emitted while the build runs carries both fields:
///
/// ```ignore
/// run_steps(..).instrument(build_span("cpp-debug", &build_id)).await
/// ```
pub fn build_span(builder: &str, build_id: &str) -> tracing::Span {
    tracing::info_span!("localbuild.build", builder = %builder, build_id = %build_id)
}

pub fn emit_master_started(master: &str, workers: usize) {
    info!(event = "master.started", master = %master, workers = workers);
}

pub fn emit_master_stopped(master: &str) {
    info!(event = "master.stopped", master = %master);
}

pub fn emit_build_triggered(builder: &str, repository: &str, branch: &str, local_sources: bool) {
    info!(
        event = "build.triggered",
        builder = %builder,
        repository = %repository,
        branch = %branch,
        local_sources = local_sources,
    );
}

pub fn emit_log_appended(build_id: &str, seq: u64) {
    debug!(event = "build.log_appended", build_id = %build_id, seq = seq);
}

/// `result` is `None` for a build that never completed.
pub fn emit_build_finished(builder: &str, result: Option<&str>, duration_ms: u64) {
    info!(
        event = "build.finished",
        builder = %builder,
        result = result.unwrap_or("incomplete"),
        duration_ms = duration_ms,
    );
}

pub fn emit_attach_started(builder: &str, result: &str) {
    info!(event = "build.attach_started", builder = %builder, result = %result);
}

/// Teardown failures are logged, never raised over the build verdict.
pub fn emit_teardown_error(master: &str, error: &dyn std::fmt::Display) {
    warn!(event = "build.teardown_error", master = %master, error = %error);
}
