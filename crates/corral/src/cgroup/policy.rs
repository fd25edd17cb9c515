//! Limit policy types.

use std::fmt;
use std::str::FromStr;

use corral_common::{CorralError, CpuRate, MemoryQuantity};
use serde::{Deserialize, Serialize};

/// Scheduling priority applied to every member of a group.
///
/// Classes are ordered from least to most CPU share. On cgroup v2 each
/// class maps to a `cpu.weight` value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityClass {
    /// Runs only when nothing else wants the CPU.
    Idle,
    /// Half the share of a normal group.
    BelowNormal,
    /// The kernel default weight.
    #[default]
    Normal,
    /// Twice the share of a normal group.
    AboveNormal,
    /// Four times the share of a normal group.
    High,
    /// The maximum weight and the lowest nice value. Not a real-time
    /// scheduling policy.
    Realtime,
}

impl PriorityClass {
    /// Every class, lowest first.
    pub const ALL: [Self; 6] = [
        Self::Idle,
        Self::BelowNormal,
        Self::Normal,
        Self::AboveNormal,
        Self::High,
        Self::Realtime,
    ];

    /// The `cpu.weight` value (1-10000) for this class.
    #[must_use]
    pub const fn cpu_weight(self) -> u64 {
        match self {
            Self::Idle => 1,
            Self::BelowNormal => 50,
            Self::Normal => 100,
            Self::AboveNormal => 200,
            Self::High => 400,
            Self::Realtime => 10_000,
        }
    }

    /// The nice value given to every member thread.
    ///
    /// `cpu.weight` only ranks the group against its siblings; the nice value
    /// ranks member threads against everything else on the host. Raising
    /// priority above `Normal` needs `CAP_SYS_NICE` or a matching
    /// `RLIMIT_NICE`.
    #[must_use]
    pub const fn niceness(self) -> i32 {
        match self {
            Self::Idle => 19,
            Self::BelowNormal => 10,
            Self::Normal => 0,
            Self::AboveNormal => -5,
            Self::High => -10,
            Self::Realtime => -20,
        }
    }

    /// The class whose weight is exactly `weight`.
    #[must_use]
    pub fn from_cpu_weight(weight: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.cpu_weight() == weight)
    }

    /// The kebab-case name of the class.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BelowNormal => "below-normal",
            Self::Normal => "normal",
            Self::AboveNormal => "above-normal",
            Self::High => "high",
            Self::Realtime => "realtime",
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PriorityClass {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|class| class.name() == wanted)
            .ok_or_else(|| CorralError::Config {
                message: format!(
                    "unknown priority class '{s}' (expected one of idle, below-normal, normal, above-normal, high, realtime)"
                ),
            })
    }
}

/// The complete set of limits for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// CPU ceiling in percent of one logical CPU.
    pub cpu_rate: CpuRate,
    /// Aggregate memory ceiling.
    pub memory_limit: MemoryQuantity,
    /// Scheduling priority class.
    #[serde(default)]
    pub priority: PriorityClass,
}

impl LimitPolicy {
    /// Create a policy from its three dimensions.
    #[must_use]
    pub const fn new(cpu_rate: CpuRate, memory_limit: MemoryQuantity, priority: PriorityClass) -> Self {
        Self {
            cpu_rate,
            memory_limit,
            priority,
        }
    }
}

/// What to do when a policy write fails during [`configure`](super::ResourceGroup::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnPolicyFailure {
    /// Terminate the group and return the failure.
    #[default]
    Abort,
    /// Keep the group running with whatever limits did apply.
    Continue,
}

/// Outcome of a [`configure`](super::ResourceGroup::configure) call.
#[derive(Debug, Default)]
pub struct ConfigureReport {
    /// Policy failures tolerated under [`OnPolicyFailure::Continue`].
    pub failures: Vec<CorralError>,
}

impl ConfigureReport {
    /// Whether the group runs with fewer guarantees than requested.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// `cpu.weight` of a freshly created cgroup.
const KERNEL_DEFAULT_WEIGHT: u64 = 100;

/// Limits currently in effect on a group. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppliedLimits {
    /// CPU ceiling in percent of one logical CPU.
    pub cpu_rate_percent: Option<i64>,
    /// Aggregate memory ceiling in bytes.
    pub memory_limit_bytes: Option<u64>,
    /// Scheduling priority class.
    pub priority: Option<PriorityClass>,
}

impl AppliedLimits {
    /// Reconstruct limits from the contents of `cpu.max`, `memory.max` and
    /// `cpu.weight`.
    ///
    /// Weights that match no priority class, the kernel's default weight of
    /// 100, and "max" ceilings read as `None`: the kernel creates every
    /// group with those values, so they say nothing about what was applied.
    #[must_use]
    pub fn from_control_files(
        cpu_max: Option<&str>,
        memory_max: Option<&str>,
        cpu_weight: Option<&str>,
    ) -> Self {
        let cpu_rate_percent = cpu_max.and_then(|content| {
            let mut parts = content.split_whitespace();
            let quota: i64 = parts.next()?.parse().ok()?;
            let period: i64 = parts.next()?.parse().ok()?;
            if period <= 0 {
                return None;
            }
            quota.checked_mul(100).map(|scaled| scaled / period)
        });

        let memory_limit_bytes = memory_max.and_then(|content| content.trim().parse().ok());

        let priority = cpu_weight
            .and_then(|content| content.trim().parse().ok())
            .filter(|weight| *weight != KERNEL_DEFAULT_WEIGHT)
            .and_then(PriorityClass::from_cpu_weight);

        Self {
            cpu_rate_percent,
            memory_limit_bytes,
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_classes_are_ordered() {
        assert!(PriorityClass::Idle < PriorityClass::BelowNormal);
        assert!(PriorityClass::High < PriorityClass::Realtime);

        let weights: Vec<u64> = PriorityClass::ALL.iter().map(|c| c.cpu_weight()).collect();
        assert!(weights.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn priority_class_parsing() {
        assert_eq!(
            "below-normal".parse::<PriorityClass>().unwrap(),
            PriorityClass::BelowNormal
        );
        assert_eq!(
            "ABOVE_NORMAL".parse::<PriorityClass>().unwrap(),
            PriorityClass::AboveNormal
        );
        assert!("urgent".parse::<PriorityClass>().is_err());
        assert_eq!(PriorityClass::from_cpu_weight(50), Some(PriorityClass::BelowNormal));
        assert_eq!(PriorityClass::from_cpu_weight(77), None);
    }

    #[test]
    fn limits_from_control_files() {
        let limits = AppliedLimits::from_control_files(
            Some("150000 100000\n"),
            Some("20971520\n"),
            Some("50\n"),
        );
        assert_eq!(limits.cpu_rate_percent, Some(150));
        assert_eq!(limits.memory_limit_bytes, Some(20_971_520));
        assert_eq!(limits.priority, Some(PriorityClass::BelowNormal));
    }

    #[test]
    fn unlimited_control_files_read_as_none() {
        let limits =
            AppliedLimits::from_control_files(Some("max 100000\n"), Some("max\n"), Some("100\n"));
        assert_eq!(limits.cpu_rate_percent, None);
        assert_eq!(limits.memory_limit_bytes, None);
        assert_eq!(limits.priority, None);
        assert_eq!(limits, AppliedLimits::default());

        assert_eq!(AppliedLimits::from_control_files(None, None, None), AppliedLimits::default());
    }

    #[test]
    fn oversized_cpu_quota_reads_as_none() {
        let limits = AppliedLimits::from_control_files(
            Some(&format!("{} 100000\n", i64::MAX)),
            None,
            None,
        );
        assert_eq!(limits.cpu_rate_percent, None);

        let limits = AppliedLimits::from_control_files(Some("150000 0\n"), None, None);
        assert_eq!(limits.cpu_rate_percent, None);
    }

    #[test]
    fn niceness_follows_class_order() {
        let nice: Vec<i32> = PriorityClass::ALL.iter().map(|c| c.niceness()).collect();
        assert!(nice.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(PriorityClass::Normal.niceness(), 0);
        assert_eq!(PriorityClass::BelowNormal.niceness(), 10);
    }

    #[test]
    fn policy_deserializes_from_toml() {
        let policy: LimitPolicy = toml::from_str(
            r#"
            cpu_rate = 150
            memory_limit = "20Mi"
            priority = "below-normal"
            "#,
        )
        .unwrap();
        assert_eq!(policy.cpu_rate, CpuRate::percent(150));
        assert_eq!(policy.memory_limit, MemoryQuantity::mebibytes(20));
        assert_eq!(policy.priority, PriorityClass::BelowNormal);
    }
}
