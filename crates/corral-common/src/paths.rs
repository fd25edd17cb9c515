//! Standard cgroup hierarchy paths for corral.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Default cgroup v2 mount point.
pub static CGROUP_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_CGROUP_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/sys/fs/cgroup"))
});

/// Default namespace directory under the cgroup root.
pub static CGROUP_NAMESPACE: Lazy<String> = Lazy::new(|| {
    std::env::var("CORRAL_NAMESPACE").unwrap_or_else(|_| "corral".to_string())
});

/// Locations of the hierarchy managed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupPaths {
    /// Cgroup v2 mount point (default: /sys/fs/cgroup).
    pub root: PathBuf,
    /// Directory under `root` holding every group (default: corral).
    pub namespace: String,
}

impl CgroupPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            namespace: CGROUP_NAMESPACE.clone(),
        }
    }

    /// Replace the namespace directory name.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Directory holding every group.
    #[must_use]
    pub fn namespace_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    /// Directory of a specific group.
    #[must_use]
    pub fn group(&self, name: &str) -> PathBuf {
        self.namespace_dir().join(name)
    }
}

impl Default for CgroupPaths {
    fn default() -> Self {
        Self {
            root: CGROUP_ROOT.clone(),
            namespace: CGROUP_NAMESPACE.clone(),
        }
    }
}
