//! Local source mounts for container builders.
//!
//! Mounting replaces a builder's checkout steps with host directories. The
//! bypass is carried by the [`crate::build::BuildRequest`] it was resolved
//! for, never by process-wide state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BuilderConfig;
use crate::error::{LocalBuildError, Result};

/// Feature name reported when a builder cannot mount local sources.
pub const LOCAL_MOUNT_FEATURE: &str = "local source mounting";

/// One host directory mounted at a path relative to the build root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Absolute host path.
    pub host: PathBuf,
    /// Destination relative to the builder's workdir.
    pub dest: String,
}

/// Ordered mounts resolved for one build request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub entries: Vec<MountEntry>,
}

impl MountSpec {
    /// Mount whose destination is the given checkout workdir.
    pub fn for_destination(&self, dest: &str) -> Option<&MountEntry> {
        let wanted = normalize_dest(dest);
        self.entries.iter().find(|e| normalize_dest(&e.dest) == wanted)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_dest(dest: &str) -> &str {
    let trimmed = dest.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        "."
    } else {
        trimmed
    }
}

/// Parse a `source:destination` flag.
pub fn parse_mount_flag(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((src, dst)) if !src.is_empty() && !dst.is_empty() && !dst.contains(':') => {
            Ok((src.to_string(), dst.to_string()))
        }
        _ => Err(LocalBuildError::usage(format!(
            "invalid mount `{raw}`, it must be passed in `source:destination` form"
        ))),
    }
}

/// Expand `~` or `~user` and make `path` absolute against the current directory.
pub fn absolute_host_path(path: &str) -> Result<PathBuf> {
    let expanded = expand_user(path)?;
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()?.join(expanded))
    }
}

fn expand_user(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(path);
    let Some(rest) = expanded.strip_prefix('~') else {
        return Ok(PathBuf::from(expanded.as_ref()));
    };

    let (user, tail) = rest.split_once('/').unwrap_or((rest, ""));
    let home = user_home(user).ok_or_else(|| {
        LocalBuildError::usage(format!("cannot expand `{path}`: no home directory found"))
    })?;
    if tail.is_empty() {
        Ok(home)
    } else {
        Ok(home.join(tail))
    }
}

#[cfg(unix)]
fn user_home(user: &str) -> Option<PathBuf> {
    if user.is_empty() {
        return None;
    }
    nix::unistd::User::from_name(user).ok().flatten().map(|u| u.dir)
}

#[cfg(not(unix))]
fn user_home(_user: &str) -> Option<PathBuf> {
    None
}

/// Volume spec for one mount inside a builder rooted at `workdir`.
pub fn volume_spec(host: &Path, workdir: &str, dest: &str) -> String {
    format!(
        "{}:{}/{}:rw",
        host.display(),
        workdir.trim_end_matches('/'),
        normalize_dest(dest)
    )
}

/// Add `sources` to the builder's volumes and return the resolved mounts.
///
/// Fails with a capability error for builders that cannot mount, and with a
/// usage error when a checkout step has no mount: with local sources every
/// checkout is bypassed, so each one must be covered. The builder is left
/// untouched on error.
pub fn inject(builder: &mut BuilderConfig, sources: &[(String, String)]) -> Result<MountSpec> {
    if !builder.kind.supports_local_mount() {
        return Err(LocalBuildError::Capability {
            feature: LOCAL_MOUNT_FEATURE.to_string(),
            builder_kind: builder.kind.to_string(),
        });
    }

    let mut spec = MountSpec::default();
    for (src, dst) in sources {
        spec.entries.push(MountEntry {
            host: absolute_host_path(src)?,
            dest: dst.clone(),
        });
    }

    let unmapped: Vec<&str> = builder
        .checkout_steps()
        .filter(|step| spec.for_destination(step.workdir()).is_none())
        .map(|step| step.name())
        .collect();
    if !unmapped.is_empty() {
        return Err(LocalBuildError::usage(format!(
            "builder `{}` has checkout steps without a local source mount: {}; \
             each checkout step must be provided when mounting sources",
            builder.name,
            unmapped.join(", ")
        )));
    }

    for entry in &spec.entries {
        let volume = volume_spec(&entry.host, &builder.workdir, &entry.dest);
        debug!(builder = %builder.name, volume = %volume, "mounting local source");
        builder.volumes.push(volume);
    }

    Ok(spec)
}
