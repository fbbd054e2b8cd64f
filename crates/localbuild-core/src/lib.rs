//! localbuild core library
//!
//! Configuration model, image filtering, source resolution, local mounts,
//! log relay and outcome classification for reproducing CI builds locally.

pub mod build;
pub mod config;
pub mod error;
pub mod filter;
pub mod image;
pub mod log_relay;
pub mod mount;
pub mod obs;
pub mod outcome;
pub mod source;
pub mod telemetry;

pub use build::{parse_property_flag, BuildRequest, BuildResult};
pub use config::{
    BuilderConfig, BuilderKind, LoadedConfig, MasterConfig, ProjectConfig, StepConfig,
};
pub use error::{ConfigErrors, LocalBuildError, Result};
pub use filter::{matches, AttributeValue, Constraint, FilterPredicate, Filterable, Pattern};
pub use image::{ImageCollection, ImageDescriptor, ImageFilter, Platform};
pub use log_relay::{CollectingLogSink, ConsoleLogRelay, LogCategory, LogSink};
pub use mount::{inject, parse_mount_flag, MountEntry, MountSpec};
pub use outcome::{classify, classify_code, Outcome, ResultCode};
pub use source::SourceStamp;
pub use telemetry::init_tracing;
