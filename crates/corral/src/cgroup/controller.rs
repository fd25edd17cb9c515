//! Group creation and namespace housekeeping.

use std::collections::BTreeSet;
use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;

use corral_common::{CorralError, CorralResult, GroupName};

use super::control::ControlDir;
use super::group::ResourceGroup;
use super::process;
use super::stats::parse_pids;
use super::version::HierarchyKind;
use crate::config::{CollisionPolicy, ControllerConfig};

/// State shared by the controller and every group it hands out.
#[derive(Debug)]
pub(crate) struct Hierarchy {
    pub(crate) config: ControllerConfig,
    pub(crate) kind: HierarchyKind,
    pub(crate) namespace: ControlDir,
    /// Highest accepted CPU rate: 100 per logical CPU.
    pub(crate) max_cpu_rate: i64,
}

impl Hierarchy {
    /// Pids listed in a group's `cgroup.procs`.
    ///
    /// An emulated tree never forgets a pid on its own, so dead entries are
    /// filtered out there.
    pub(crate) fn procs(&self, dir: &ControlDir) -> io::Result<BTreeSet<u32>> {
        let pids = dir
            .read_optional("cgroup.procs")?
            .map(|content| parse_pids(&content))
            .unwrap_or_default();

        Ok(match self.kind {
            HierarchyKind::V2 => pids,
            HierarchyKind::Emulated => pids.into_iter().filter(|pid| process::is_alive(*pid)).collect(),
        })
    }

    /// The group in this namespace, other than `except`, that holds `pid`.
    pub(crate) fn owner_of(&self, pid: u32, except: &str) -> io::Result<Option<String>> {
        for name in self.namespace.children()? {
            if name == except {
                continue;
            }

            let dir = match self.namespace.open_child(&name) {
                Ok(dir) => dir,
                // Removed while we were scanning.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            if self.procs(&dir)?.contains(&pid) {
                return Ok(Some(name));
            }
        }

        Ok(None)
    }
}

/// Creates and opens resource groups inside one namespace of a hierarchy.
///
/// # Example
///
/// ```no_run
/// use corral::{Controller, ControllerConfig, PriorityClass};
///
/// # fn example() -> corral_common::CorralResult<()> {
/// let controller = Controller::new(ControllerConfig::default())?;
///
/// let mut group = controller.create("quota-test")?;
/// group.set_cpu_limit(150)?;
/// group.set_memory_and_priority_limit(20 * 1024 * 1024, PriorityClass::BelowNormal)?;
///
/// let child = std::process::Command::new("sleep").arg("60").spawn()?;
/// group.bind_child(&child)?;
///
/// group.terminate(0)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Controller {
    inner: Arc<Hierarchy>,
}

impl Controller {
    /// Open the hierarchy described by `config`.
    ///
    /// Creates the namespace directory if needed and, on cgroup v2, enables
    /// the cpu and memory controllers for the groups below it.
    ///
    /// # Errors
    ///
    /// [`CorralError::Unsupported`] if there is no cgroup v2 hierarchy at the
    /// configured root, [`CorralError::Creation`] if the namespace cannot be
    /// set up.
    pub fn new(config: ControllerConfig) -> CorralResult<Self> {
        config.validate()?;

        let kind = HierarchyKind::resolve(&config.paths.root, config.emulate)?;
        let namespace_path = config.paths.namespace_dir();
        let setup_error = |source| CorralError::Creation {
            name: config.paths.namespace.clone(),
            source,
        };

        if kind == HierarchyKind::Emulated {
            std::fs::create_dir_all(&config.paths.root).map_err(setup_error)?;
        }
        match std::fs::create_dir(&namespace_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(setup_error(e)),
        }

        let namespace = ControlDir::open(&namespace_path, kind).map_err(setup_error)?;

        // Children may only use controllers enabled in the parent's subtree_control.
        namespace
            .write("cgroup.subtree_control", "+cpu +memory")
            .map_err(setup_error)?;

        let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let max_cpu_rate = i64::try_from(cpus).unwrap_or(i64::MAX / 100) * 100;

        tracing::debug!(
            path = %namespace_path.display(),
            kind = ?kind,
            max_cpu_rate,
            "Opened cgroup namespace"
        );

        Ok(Self {
            inner: Arc::new(Hierarchy {
                config,
                kind,
                namespace,
                max_cpu_rate,
            }),
        })
    }

    /// Create a new group.
    ///
    /// A name collision is resolved by the configured [`CollisionPolicy`]:
    /// `Fail` returns a creation error carrying `EEXIST`, `Attach` opens the
    /// existing group instead.
    ///
    /// # Errors
    ///
    /// [`CorralError::InvalidGroupName`] for a malformed name,
    /// [`CorralError::Creation`] if the OS refuses.
    pub fn create(&self, name: &str) -> CorralResult<ResourceGroup> {
        let name = GroupName::new(name)?;

        match self.inner.namespace.make_child(name.as_str()) {
            Ok(()) => {
                tracing::info!(group = %name, "Created group");
                self.attach(name, false)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.inner.config.collision {
                CollisionPolicy::Fail => Err(CorralError::Creation {
                    name: name.to_string(),
                    source: e,
                }),
                CollisionPolicy::Attach => {
                    tracing::info!(group = %name, "Group exists, attaching");
                    self.attach(name, true)
                }
            },
            Err(e) => Err(CorralError::Creation {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    /// Open an existing group.
    ///
    /// # Errors
    ///
    /// [`CorralError::Creation`] with `ENOENT` if no such group exists.
    pub fn open(&self, name: &str) -> CorralResult<ResourceGroup> {
        let name = GroupName::new(name)?;
        self.attach(name, true)
    }

    fn attach(&self, name: GroupName, existing: bool) -> CorralResult<ResourceGroup> {
        let creation_error = |source| CorralError::Creation {
            name: name.to_string(),
            source,
        };

        let dir = self
            .inner
            .namespace
            .open_child(name.as_str())
            .map_err(creation_error)?;

        let members = if existing {
            self.inner.procs(&dir).map_err(creation_error)?
        } else {
            BTreeSet::new()
        };

        ResourceGroup::new(name, Arc::clone(&self.inner), dir, members, existing)
    }

    /// Names of the groups in the namespace.
    pub fn list(&self) -> CorralResult<Vec<String>> {
        Ok(self.inner.namespace.children()?)
    }

    /// Remove groups that no longer hold any process.
    ///
    /// These are left behind when an owner that was itself a member got
    /// killed with its group before it could release it. Returns the names
    /// of the removed groups.
    pub fn prune(&self) -> CorralResult<Vec<String>> {
        let mut removed = Vec::new();

        for name in self.inner.namespace.children()? {
            let dir = match self.inner.namespace.open_child(&name) {
                Ok(dir) => dir,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if !self.inner.procs(&dir)?.is_empty() {
                continue;
            }
            drop(dir);

            match self.inner.namespace.remove_child(&name) {
                Ok(()) => {
                    tracing::info!(group = %name, "Pruned empty group");
                    removed.push(name);
                }
                // Gained a member or was removed concurrently.
                Err(e) if matches!(e.raw_os_error(), Some(libc::EBUSY | libc::ENOENT)) => {
                    tracing::debug!(group = %name, error = %e, "Skipped group while pruning");
                }
                Err(e) => {
                    return Err(CorralError::Teardown {
                        group: name,
                        source: e,
                    });
                }
            }
        }

        Ok(removed)
    }

    /// The kind of hierarchy in use.
    #[must_use]
    pub fn kind(&self) -> HierarchyKind {
        self.inner.kind
    }

    /// The configuration this controller was opened with.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn controller(root: &std::path::Path) -> Controller {
        Controller::new(
            ControllerConfig::default()
                .with_root(root)
                .with_namespace("unit")
                .emulated(),
        )
        .unwrap()
    }

    #[test]
    fn new_sets_up_namespace() {
        let temp = tempdir().unwrap();
        let controller = controller(temp.path());

        let subtree = std::fs::read_to_string(temp.path().join("unit/cgroup.subtree_control")).unwrap();
        assert_eq!(subtree.trim(), "+cpu +memory");
        assert_eq!(controller.kind(), HierarchyKind::Emulated);
        assert!(controller.list().unwrap().is_empty());
    }

    #[test]
    fn new_requires_cgroup_v2_without_emulation() {
        let temp = tempdir().unwrap();
        let err = Controller::new(ControllerConfig::default().with_root(temp.path())).unwrap_err();
        assert!(matches!(err, CorralError::Unsupported { .. }));
    }

    #[test]
    fn create_rejects_bad_names() {
        let temp = tempdir().unwrap();
        let controller = controller(temp.path());
        assert!(matches!(
            controller.create("../escape"),
            Err(CorralError::InvalidGroupName { .. })
        ));
    }

    #[test]
    fn open_missing_group_fails() {
        let temp = tempdir().unwrap();
        let controller = controller(temp.path());
        let err = controller.open("ghost").unwrap_err();
        assert!(matches!(err, CorralError::Creation { .. }));
        assert_eq!(err.os_code(), Some(libc::ENOENT));
    }
}
