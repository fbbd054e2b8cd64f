//! Error taxonomy for local build reproduction.

use crate::outcome::ResultCode;

/// Ordered list of problems found in a master configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("Configuration Errors:{}", bullet_lines(.errors))]
pub struct ConfigErrors {
    pub errors: Vec<String>,
}

impl ConfigErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing was collected, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), ConfigErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn bullet_lines(errors: &[String]) -> String {
    errors.iter().map(|e| format!("\n - {e}")).collect()
}

/// Errors terminating a single local build invocation. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum LocalBuildError {
    #[error("{0}")]
    Configuration(#[from] ConfigErrors),

    #[error("{0}")]
    Usage(String),

    #[error("{feature} is not supported by {builder_kind} builders")]
    Capability {
        feature: String,
        builder_kind: String,
    },

    #[error("Build has not completed!")]
    BuildIncomplete,

    #[error("Build has failed with state {outcome}")]
    BuildFailed { outcome: ResultCode },

    #[error("master error: {0}")]
    Master(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LocalBuildError {
    pub fn usage(message: impl Into<String>) -> Self {
        LocalBuildError::Usage(message.into())
    }

    /// Operator input problems: bad names, bad flags, unsupported combinations.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            LocalBuildError::Usage(_) | LocalBuildError::Capability { .. }
        )
    }
}

/// Result type for localbuild domain operations.
pub type Result<T> = std::result::Result<T, LocalBuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_display_lists_every_error() {
        let mut errors = ConfigErrors::new();
        errors.push("no projects configured");
        errors.push("duplicate builder `cpp`");

        assert_eq!(
            errors.to_string(),
            "Configuration Errors:\n - no projects configured\n - duplicate builder `cpp`"
        );

        let wrapped = LocalBuildError::from(errors);
        assert!(wrapped.to_string().starts_with("Configuration Errors:"));
        let source: &dyn std::error::Error = &ConfigErrors::new();
        assert_eq!(source.to_string(), "Configuration Errors:");
    }

    #[test]
    fn test_empty_config_errors_is_ok() {
        assert!(ConfigErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_capability_error_names_feature_and_kind() {
        let err = LocalBuildError::Capability {
            feature: "local source mounting".to_string(),
            builder_kind: "local".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("local source mounting"));
        assert!(msg.contains("local"));
        assert!(err.is_usage());
    }

    #[test]
    fn test_build_failed_carries_outcome_name() {
        let err = LocalBuildError::BuildFailed {
            outcome: ResultCode::Exception,
        };
        assert_eq!(err.to_string(), "Build has failed with state exception");
        assert!(!err.is_usage());
    }
}
