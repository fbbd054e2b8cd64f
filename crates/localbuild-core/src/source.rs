//! Canonical source stamp construction.

use serde::{Deserialize, Serialize};

/// What source revision a build checks out.
///
/// Serialises to the wire shape `{codebase, repository, branch, revision, project}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    /// Always empty: a single-codebase setup.
    pub codebase: String,
    pub repository: String,
    pub branch: String,
    pub revision: Option<String>,
    pub project: String,
}

/// Synthetic merge ref for a pull request.
pub fn pull_request_ref(pull_request: u64) -> String {
    format!("refs/pull/{pull_request}/merge")
}

impl SourceStamp {
    /// Resolve the operator's inputs into a source stamp.
    ///
    /// `repo_override` wins over `default_repo`. A pull request replaces the
    /// branch with its merge ref regardless of `branch`. The commit is passed
    /// through unvalidated; the source-control system rejects bad ids.
    pub fn resolve(
        default_repo: &str,
        repo_override: Option<&str>,
        branch: &str,
        commit: Option<&str>,
        pull_request: Option<u64>,
        project: &str,
    ) -> Self {
        let branch = match pull_request {
            Some(id) => pull_request_ref(id),
            None => branch.to_string(),
        };

        Self {
            codebase: String::new(),
            repository: repo_override.unwrap_or(default_repo).to_string(),
            branch,
            revision: commit.map(str::to_string),
            project: project.to_string(),
        }
    }
}
