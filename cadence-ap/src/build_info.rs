//! Build identification captured by `build.rs`

use serde::Serialize;
use std::fmt;

/// Where and how this binary was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub timestamp: &'static str,
    pub profile: &'static str,
    pub target: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("CADENCE_GIT_HASH"),
            timestamp: env!("CADENCE_BUILD_TIMESTAMP"),
            profile: env!("CADENCE_BUILD_PROFILE"),
            target: env!("CADENCE_BUILD_TARGET"),
        }
    }

    /// True when built from a tree with uncommitted changes
    pub fn is_dirty(&self) -> bool {
        self.git_hash.ends_with("-dirty")
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} [{}] built {} ({}, {})",
            self.version, self.git_hash, self.timestamp, self.profile, self.target
        )
    }
}
