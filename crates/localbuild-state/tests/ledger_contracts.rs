//! Behavioural contract of `BuildLedger`.
//!
//! Every test runs against the in-memory fake and the SurrealDB `mem://`
//! ledger; any conforming implementation must pass them.

use std::time::Duration;

use localbuild_state::fakes::MemoryBuildLedger;
use localbuild_state::storage_traits::*;
use localbuild_state::{StorageError, SurrealBuildLedger};

fn sample_metadata(builder: &str) -> BuildMetadata {
    BuildMetadata {
        builder: builder.to_string(),
        project: "arrow".to_string(),
        repository: "https://github.com/apache/arrow".to_string(),
        branch: "main".to_string(),
        revision: None,
        local_sources: false,
    }
}

fn sample_summary(result: Option<&str>, total_logs: u64) -> BuildSummary {
    BuildSummary {
        result: result.map(str::to_string),
        total_logs,
        duration_ms: 42,
    }
}

async fn create_returns_unique_ids(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let a = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();
    let b = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();
    assert_ne!(a, b);
}

async fn get_returns_running_build(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let id = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();

    let record = ledger.get_build(&id).await.unwrap();
    assert_eq!(record.build_id, id);
    assert_eq!(record.request_digest, digest);
    assert_eq!(record.metadata, sample_metadata("cpp"));
    assert_eq!(record.status, BuildStatus::Running);
    assert!(record.summary.is_none());
    assert!(record.finished_at.is_none());
}

async fn get_unknown_build_fails(ledger: &dyn BuildLedger) {
    let err = ledger
        .get_build(&BuildId("missing".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::BuildNotFound { .. }));

    let err = ledger
        .get_logs(&BuildId("missing".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::BuildNotFound { .. }));
}

async fn logs_come_back_in_seq_order(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let id = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();

    ledger.append_log(&id, LogEntry::new(2, "ohello")).await.unwrap();
    ledger.append_log(&id, LogEntry::new(1, "hstep 1")).await.unwrap();
    ledger.append_log(&id, LogEntry::new(3, "eboom")).await.unwrap();

    let records: Vec<String> = ledger
        .get_logs(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.record)
        .collect();
    assert_eq!(records, vec!["hstep 1", "ohello", "eboom"]);
}

async fn finish_records_summary(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let id = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();
    ledger
        .finish_build(&id, sample_summary(Some("warnings"), 3))
        .await
        .unwrap();

    let record = ledger.get_build(&id).await.unwrap();
    assert_eq!(record.status, BuildStatus::Finished);
    assert_eq!(record.summary, Some(sample_summary(Some("warnings"), 3)));
    assert!(record.finished_at.is_some());
}

async fn abandon_drops_result(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let id = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();
    ledger
        .abandon_build(&id, sample_summary(Some("success"), 1))
        .await
        .unwrap();

    let record = ledger.get_build(&id).await.unwrap();
    assert_eq!(record.status, BuildStatus::Abandoned);
    assert_eq!(record.summary.and_then(|s| s.result), None);
}

async fn terminal_builds_are_immutable(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let id = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();
    ledger
        .finish_build(&id, sample_summary(Some("success"), 0))
        .await
        .unwrap();

    let err = ledger.append_log(&id, LogEntry::new(1, "olate")).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidBuildState { .. }));

    let err = ledger
        .finish_build(&id, sample_summary(Some("failure"), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidBuildState { .. }));

    let err = ledger
        .abandon_build(&id, sample_summary(None, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidBuildState { .. }));

    let record = ledger.get_build(&id).await.unwrap();
    assert_eq!(record.summary.and_then(|s| s.result).as_deref(), Some("success"));
}

async fn list_filters_by_builder_newest_first(ledger: &dyn BuildLedger) {
    let digest = ContentDigest::from_bytes(b"request");
    let first = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _other = ledger.create_build(&digest, sample_metadata("python")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = ledger.create_build(&digest, sample_metadata("cpp")).await.unwrap();

    let all = ledger.list_builds(None).await.unwrap();
    assert_eq!(all.len(), 3);

    let cpp: Vec<BuildId> = ledger
        .list_builds(Some("cpp"))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.build_id)
        .collect();
    assert_eq!(cpp, vec![second, first]);
}

macro_rules! ledger_contracts {
    ($module:ident, $ledger:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn test_create_returns_unique_ids() {
                super::create_returns_unique_ids(&$ledger).await;
            }

            #[tokio::test]
            async fn test_get_returns_running_build() {
                super::get_returns_running_build(&$ledger).await;
            }

            #[tokio::test]
            async fn test_get_unknown_build_fails() {
                super::get_unknown_build_fails(&$ledger).await;
            }

            #[tokio::test]
            async fn test_logs_come_back_in_seq_order() {
                super::logs_come_back_in_seq_order(&$ledger).await;
            }

            #[tokio::test]
            async fn test_finish_records_summary() {
                super::finish_records_summary(&$ledger).await;
            }

            #[tokio::test]
            async fn test_abandon_drops_result() {
                super::abandon_drops_result(&$ledger).await;
            }

            #[tokio::test]
            async fn test_terminal_builds_are_immutable() {
                super::terminal_builds_are_immutable(&$ledger).await;
            }

            #[tokio::test]
            async fn test_list_filters_by_builder_newest_first() {
                super::list_filters_by_builder_newest_first(&$ledger).await;
            }
        }
    };
}

ledger_contracts!(memory, MemoryBuildLedger::new());
ledger_contracts!(
    surreal,
    SurrealBuildLedger::in_memory()
        .await
        .expect("in_memory() failed")
);
