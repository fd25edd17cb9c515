//! Cgroup hierarchy detection.

use std::path::Path;

use corral_common::{CorralError, CorralResult};

/// Cgroup version found at a mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// Cgroups v1 (legacy, one mount per controller).
    V1,
    /// Cgroups v2 (unified).
    V2,
    /// Hybrid mode (v1 controllers next to a unified mount).
    Hybrid,
    /// No cgroup hierarchy recognised.
    Absent,
}

impl CgroupVersion {
    /// Detect the cgroup version mounted at `root`.
    pub fn detect(root: &Path) -> Self {
        let unified = root.join("cgroup.controllers").exists();
        let legacy = root.join("cpu").is_dir();

        match (unified, legacy) {
            (true, false) => Self::V2,
            (true, true) => Self::Hybrid,
            (false, true) => Self::V1,
            (false, false) => Self::Absent,
        }
    }
}

/// The kind of hierarchy a controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyKind {
    /// A real cgroup v2 hierarchy; the kernel enforces the limits.
    V2,
    /// A plain directory tree laid out like cgroup v2.
    ///
    /// Control files are ordinary files and nothing is enforced. Membership
    /// and termination still act on real processes through signals.
    Emulated,
}

impl HierarchyKind {
    /// Decide which hierarchy to drive at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Unsupported`] unless `root` is a unified cgroup
    /// v2 mount or emulation was requested.
    pub fn resolve(root: &Path, emulate: bool) -> CorralResult<Self> {
        if emulate {
            return Ok(Self::Emulated);
        }

        match CgroupVersion::detect(root) {
            CgroupVersion::V2 | CgroupVersion::Hybrid => Ok(Self::V2),
            CgroupVersion::V1 => Err(CorralError::Unsupported {
                feature: format!("cgroup v1 hierarchy at {}", root.display()),
            }),
            CgroupVersion::Absent => Err(CorralError::Unsupported {
                feature: format!("no cgroup v2 hierarchy at {}", root.display()),
            }),
        }
    }
}
