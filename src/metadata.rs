//! Build and source-control metadata.
//!
//! Calibration runs are only reproducible if every state report says
//! exactly which software produced it, so the snapshot carries the crate
//! version and the source-control revision the binary was built from.
//! The revision is captured at compile time by `build.rs`; outside a git
//! checkout it degrades to `"unknown"`.

use serde::{Deserialize, Serialize};

/// Source-control revision the running binary was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareRevision {
    /// `git describe` output, or `"unknown"` outside a checkout.
    pub id: String,
    /// Whether the working tree had uncommitted changes at build time.
    pub dirty: bool,
}

impl SoftwareRevision {
    /// Revision information baked in at compile time.
    pub fn current() -> Self {
        Self {
            id: env!("GIT_REVISION").to_string(),
            dirty: env!("GIT_DIRTY") == "true",
        }
    }
}

/// Version of this crate.
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
