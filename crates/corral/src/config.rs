//! Controller configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use corral_common::{CgroupPaths, CorralError, CorralResult, GroupName};
use serde::{Deserialize, Serialize};

use crate::cgroup::LimitPolicy;

/// Kernel bounds for the `cpu.max` period, in microseconds.
const CPU_PERIOD_RANGE: std::ops::RangeInclusive<u64> = 1_000..=1_000_000;

/// What `create` does when a group of the same name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Refuse with a creation error carrying `EEXIST`.
    #[default]
    Fail,
    /// Open the existing group; both handles address the same cgroup.
    Attach,
}

/// Controller configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Hierarchy locations.
    pub paths: CgroupPaths,
    /// Name collision handling for `create`.
    pub collision: CollisionPolicy,
    /// CPU enforcement period (microseconds).
    pub cpu_period_us: u64,
    /// How long `terminate` waits for the kernel to drain a group (milliseconds).
    pub terminate_timeout_ms: u64,
    /// Whether dropping a live group terminates it.
    pub kill_on_drop: bool,
    /// Drive a plain directory tree instead of a real cgroup v2 hierarchy.
    pub emulate: bool,
    /// Limits applied by `corral run` when no flags override them.
    pub limits: Option<LimitPolicy>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            paths: CgroupPaths::new(),
            collision: CollisionPolicy::Fail,
            cpu_period_us: 100_000,
            terminate_timeout_ms: 5_000,
            kill_on_drop: true,
            emulate: false,
            limits: None,
        }
    }
}

impl ControllerConfig {
    /// Parse a configuration from TOML.
    pub fn from_toml(content: &str) -> CorralResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CorralError::Config {
            message: format!("Failed to parse TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> CorralResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CorralError::Config {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        tracing::debug!(path = %path.display(), "Loaded controller config");
        Self::from_toml(&content)
    }

    /// Load the user's configuration file if there is one, else the defaults.
    pub fn discover() -> CorralResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// The per-user configuration file (`~/.config/corral/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("corral").join("config.toml"))
    }

    /// Check value ranges.
    pub fn validate(&self) -> CorralResult<()> {
        if !CPU_PERIOD_RANGE.contains(&self.cpu_period_us) {
            return Err(CorralError::Config {
                message: format!(
                    "cpu_period_us must be between {} and {}, got {}",
                    CPU_PERIOD_RANGE.start(),
                    CPU_PERIOD_RANGE.end(),
                    self.cpu_period_us
                ),
            });
        }
        if GroupName::new(self.paths.namespace.as_str()).is_err() {
            return Err(CorralError::Config {
                message: format!("invalid namespace '{}'", self.paths.namespace),
            });
        }
        Ok(())
    }

    /// The termination drain timeout.
    #[must_use]
    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    /// Set the cgroup root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths.root = root.into();
        self
    }

    /// Set the namespace directory name.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.paths.namespace = namespace.into();
        self
    }

    /// Set the collision policy.
    #[must_use]
    pub fn with_collision(mut self, collision: CollisionPolicy) -> Self {
        self.collision = collision;
        self
    }

    /// Drive an emulated hierarchy.
    #[must_use]
    pub fn emulated(mut self) -> Self {
        self.emulate = true;
        self
    }

    /// Set the termination drain timeout.
    #[must_use]
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Keep groups alive when their handle is dropped.
    #[must_use]
    pub fn without_kill_on_drop(mut self) -> Self {
        self.kill_on_drop = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_common::{CpuRate, MemoryQuantity};

    use crate::cgroup::PriorityClass;

    #[test]
    fn default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.collision, CollisionPolicy::Fail);
        assert_eq!(config.cpu_period_us, 100_000);
        assert!(config.kill_on_drop);
        assert!(!config.emulate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = ControllerConfig::default()
            .with_root("/tmp/cg")
            .with_namespace("jobs")
            .with_collision(CollisionPolicy::Attach)
            .with_terminate_timeout(Duration::from_secs(2))
            .without_kill_on_drop()
            .emulated();

        assert_eq!(config.paths.namespace_dir(), PathBuf::from("/tmp/cg/jobs"));
        assert_eq!(config.collision, CollisionPolicy::Attach);
        assert_eq!(config.terminate_timeout(), Duration::from_secs(2));
        assert!(!config.kill_on_drop);
        assert!(config.emulate);
    }

    #[test]
    fn parse_toml_file() {
        let config = ControllerConfig::from_toml(
            r#"
            collision = "attach"
            cpu_period_us = 50000

            [paths]
            root = "/sys/fs/cgroup"
            namespace = "batch"

            [limits]
            cpu_rate = "1.5c"
            memory_limit = "20Mi"
            priority = "below-normal"
            "#,
        )
        .unwrap();

        assert_eq!(config.collision, CollisionPolicy::Attach);
        assert_eq!(config.cpu_period_us, 50_000);
        assert_eq!(config.paths.namespace, "batch");
        assert_eq!(
            config.limits,
            Some(LimitPolicy::new(
                CpuRate::percent(150),
                MemoryQuantity::mebibytes(20),
                PriorityClass::BelowNormal
            ))
        );
        assert_eq!(config.terminate_timeout_ms, 5_000);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ControllerConfig::from_toml("cpu_period_us = 10").is_err());
        assert!(ControllerConfig::from_toml("unknown_key = true").is_err());
        assert!(
            ControllerConfig::from_toml("[paths]\nnamespace = \"a/b\"").is_err()
        );
    }

    #[test]
    fn rejects_namespaces_that_leave_the_root() {
        for namespace in ["..", ".", "", "a/b", "../escape"] {
            let config = ControllerConfig::default().with_namespace(namespace);
            assert!(config.validate().is_err(), "namespace {namespace:?}");
        }
        assert!(ControllerConfig::default().with_namespace("jobs.v2").validate().is_ok());
    }

    #[test]
    fn terminate_timeout_saturates() {
        let config = ControllerConfig::default().with_terminate_timeout(Duration::MAX);
        assert_eq!(config.terminate_timeout_ms, u64::MAX);

        let config = ControllerConfig::default().with_terminate_timeout(Duration::from_secs(2));
        assert_eq!(config.terminate_timeout(), Duration::from_secs(2));
    }
}
