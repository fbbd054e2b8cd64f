//! Build result codes and the process-level verdict.

use serde::{Deserialize, Serialize};

use crate::build::BuildResult;
use crate::error::LocalBuildError;

/// Completion state reported by the master, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    Warnings,
    Failure,
    Exception,
}

impl ResultCode {
    pub fn name(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::Warnings => "warnings",
            ResultCode::Failure => "failure",
            ResultCode::Exception => "exception",
        }
    }

    /// The more severe of two results.
    pub fn worst(self, other: ResultCode) -> ResultCode {
        self.max(other)
    }

    /// The result codes that trigger an attach session with `--attach-on-failure`.
    pub fn failures() -> [ResultCode; 2] {
        [ResultCode::Failure, ResultCode::Exception]
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Final classification of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Warnings,
    Failure,
    Exception,
    /// The build never signalled completion.
    Incomplete,
}

impl Outcome {
    pub fn from_code(code: ResultCode) -> Self {
        match code {
            ResultCode::Success => Outcome::Success,
            ResultCode::Warnings => Outcome::Warnings,
            ResultCode::Failure => Outcome::Failure,
            ResultCode::Exception => Outcome::Exception,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Warnings)
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Operator-facing summary line.
    pub fn message(&self) -> String {
        match self {
            Outcome::Success | Outcome::Warnings => "Build successful!".to_string(),
            Outcome::Failure => format!("Build has failed with state {}", ResultCode::Failure),
            Outcome::Exception => format!("Build has failed with state {}", ResultCode::Exception),
            Outcome::Incomplete => "Build has not completed!".to_string(),
        }
    }

    /// `Ok` for zero-exit outcomes, otherwise the matching error.
    pub fn into_result(self) -> Result<Outcome, LocalBuildError> {
        match self {
            Outcome::Success | Outcome::Warnings => Ok(self),
            Outcome::Failure => Err(LocalBuildError::BuildFailed {
                outcome: ResultCode::Failure,
            }),
            Outcome::Exception => Err(LocalBuildError::BuildFailed {
                outcome: ResultCode::Exception,
            }),
            Outcome::Incomplete => Err(LocalBuildError::BuildIncomplete),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Outcome::Success => "success",
            Outcome::Warnings => "warnings",
            Outcome::Failure => "failure",
            Outcome::Exception => "exception",
            Outcome::Incomplete => "incomplete",
        };
        f.write_str(name)
    }
}

/// Classify a raw result code.
pub fn classify_code(code: ResultCode) -> Outcome {
    Outcome::from_code(code)
}

/// Classify a build; an unfinished build is `Incomplete` whatever its code.
pub fn classify(result: &BuildResult) -> Outcome {
    match (result.is_complete(), result.result_code()) {
        (true, Some(code)) => Outcome::from_code(code),
        _ => Outcome::Incomplete,
    }
}
