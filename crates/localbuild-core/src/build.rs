//! Build request and the single in-flight build result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{LocalBuildError, Result};
use crate::mount::MountSpec;
use crate::outcome::ResultCode;
use crate::source::SourceStamp;

/// Parse a `name=value` property flag. The value may itself contain `=`.
pub fn parse_property_flag(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(LocalBuildError::usage(format!(
            "invalid property `{raw}`, it must be passed in `name=value` form"
        ))),
    }
}

/// Everything the master needs to run one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub builder_name: String,
    pub source_stamp: SourceStamp,
    pub properties: BTreeMap<String, String>,
    /// Results that open an interactive session before teardown.
    pub attach_on: BTreeSet<ResultCode>,
    /// When set, checkout steps use these mounts instead of fetching.
    pub local_sources: Option<MountSpec>,
}

impl BuildRequest {
    pub fn new(builder_name: impl Into<String>, source_stamp: SourceStamp) -> Self {
        Self {
            builder_name: builder_name.into(),
            source_stamp,
            properties: BTreeMap::new(),
            attach_on: BTreeSet::new(),
            local_sources: None,
        }
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_attach_on(mut self, attach_on: impl IntoIterator<Item = ResultCode>) -> Self {
        self.attach_on = attach_on.into_iter().collect();
        self
    }

    pub fn with_local_sources(mut self, mounts: MountSpec) -> Self {
        self.local_sources = Some(mounts);
        self
    }

    pub fn uses_local_sources(&self) -> bool {
        self.local_sources.is_some()
    }

    pub fn should_attach(&self, code: ResultCode) -> bool {
        self.attach_on.contains(&code)
    }
}

/// State of the build triggered by one invocation.
///
/// Starts empty, collects log records, and is finalized at most once;
/// after that it rejects every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildResult {
    complete: bool,
    result_code: Option<ResultCode>,
    logs: Vec<String>,
}

impl BuildResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_log(&mut self, record: impl Into<String>) -> Result<()> {
        if self.complete {
            return Err(LocalBuildError::Master(
                "log record received after build completion".to_string(),
            ));
        }
        self.logs.push(record.into());
        Ok(())
    }

    pub fn finalize(&mut self, code: ResultCode) -> Result<()> {
        if self.complete {
            return Err(LocalBuildError::Master(
                "build result finalized twice".to_string(),
            ));
        }
        self.complete = true;
        self.result_code = Some(code);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Present only once the build is complete.
    pub fn result_code(&self) -> Option<ResultCode> {
        self.result_code
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property_flag() {
        assert_eq!(
            parse_property_flag("CMAKE_BUILD_TYPE=release").unwrap(),
            ("CMAKE_BUILD_TYPE".to_string(), "release".to_string())
        );
        assert_eq!(
            parse_property_flag("FLAGS=-O2 -DX=1").unwrap(),
            ("FLAGS".to_string(), "-O2 -DX=1".to_string())
        );
        assert_eq!(
            parse_property_flag("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_property_flag("novalue").is_err());
        assert!(parse_property_flag("=value").is_err());
    }

    #[test]
    fn test_result_finalized_once() {
        let mut result = BuildResult::new();
        assert!(!result.is_complete());
        assert_eq!(result.result_code(), None);

        result.push_log("hstep").unwrap();
        result.finalize(ResultCode::Success).unwrap();
        assert!(result.is_complete());
        assert_eq!(result.result_code(), Some(ResultCode::Success));

        assert!(result.finalize(ResultCode::Failure).is_err());
        assert!(result.push_log("olate").is_err());
        assert_eq!(result.result_code(), Some(ResultCode::Success));
        assert_eq!(result.logs(), ["hstep".to_string()]);
    }

    #[test]
    fn test_attach_set() {
        let stamp = SourceStamp::resolve("repo", None, "main", None, None, "p");
        let request = BuildRequest::new("b", stamp).with_attach_on(ResultCode::failures());
        assert!(request.should_attach(ResultCode::Failure));
        assert!(request.should_attach(ResultCode::Exception));
        assert!(!request.should_attach(ResultCode::Success));
        assert!(!request.uses_local_sources());
    }
}
