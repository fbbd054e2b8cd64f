//! SurrealDB schema setup for the build ledger

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Define the ledger tables on a fresh database.
///
/// Statement errors are surfaced, not just parse errors.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing build ledger schema");

    init_builds_table(db).await?;
    init_build_logs_table(db).await?;

    info!("Build ledger schema initialized");
    Ok(())
}

/// Initialize `builds` table
///
/// ```text
/// TABLE builds {
///   build_id:        STRING (unique)
///   request_digest:  STRING (indexed)
///   builder:         STRING (indexed)
///   project, repository, branch: STRING
///   revision:        STRING?
///   local_sources:   BOOL
///   status:          "running" | "finished" | "abandoned"
///   result:          STRING?
///   total_logs, duration_ms: INT
///   created_at:      DATETIME
///   finished_at:     DATETIME?
/// }
/// ```
///
/// Terminal builds are immutable; enforced by the ledger.
async fn init_builds_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE builds
            SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;

        DEFINE INDEX idx_build_id ON TABLE builds COLUMNS build_id UNIQUE;
        DEFINE INDEX idx_request_digest ON TABLE builds COLUMNS request_digest;
        DEFINE INDEX idx_builder ON TABLE builds COLUMNS builder;
        DEFINE INDEX idx_created_at ON TABLE builds COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    debug!("builds table initialized");
    Ok(())
}

/// Initialize `build_logs` table
///
/// `(build_id, seq)` is unique so a record can never be relayed twice.
async fn init_build_logs_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE build_logs
            SCHEMALESS
            PERMISSIONS
                FOR select, create FULL
                FOR update, delete NONE;

        DEFINE INDEX idx_build_id_seq ON TABLE build_logs COLUMNS build_id, seq UNIQUE;
        DEFINE INDEX idx_build_id ON TABLE build_logs COLUMNS build_id;
    "#;

    db.query(sql).await?.check()?;
    debug!("build_logs table initialized");
    Ok(())
}
