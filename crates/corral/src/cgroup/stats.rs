//! Resource accounting read back from a group.

use std::collections::BTreeSet;

use serde::Serialize;

/// CPU statistics from `cpu.stat`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuStats {
    /// Total CPU time consumed (microseconds).
    pub usage_usec: u64,
    /// User-mode CPU time (microseconds).
    pub user_usec: u64,
    /// Kernel-mode CPU time (microseconds).
    pub system_usec: u64,
    /// Number of enforcement periods that elapsed.
    pub nr_periods: u64,
    /// Number of periods in which the group was throttled.
    pub nr_throttled: u64,
    /// Total time spent throttled (microseconds).
    pub throttled_usec: u64,
}

impl CpuStats {
    /// Parse the flat-keyed content of `cpu.stat`. Unknown keys are ignored.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut stats = Self::default();

        for (key, value) in flat_keyed(content) {
            match key {
                "usage_usec" => stats.usage_usec = value,
                "user_usec" => stats.user_usec = value,
                "system_usec" => stats.system_usec = value,
                "nr_periods" => stats.nr_periods = value,
                "nr_throttled" => stats.nr_throttled = value,
                "throttled_usec" => stats.throttled_usec = value,
                _ => {}
            }
        }

        stats
    }
}

/// Memory usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    /// Current memory usage in bytes.
    pub current: u64,
    /// Maximum memory limit (None if unlimited).
    pub max: Option<u64>,
}

impl MemoryUsage {
    /// Build from the contents of `memory.current` and `memory.max`.
    #[must_use]
    pub fn parse(current: Option<&str>, max: Option<&str>) -> Self {
        let current = current
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let max = max.and_then(|s| {
            let s = s.trim();
            if s == "max" { None } else { s.parse().ok() }
        });

        Self { current, max }
    }

    /// Get usage percentage.
    #[must_use]
    pub fn percent(&self) -> Option<f64> {
        self.max
            .map(|max| (self.current as f64 / max as f64) * 100.0)
    }
}

/// Memory limit events from `memory.events`.
///
/// `max` counts allocations that hit the ceiling; `oom_kill` counts members
/// killed because reclaim could not satisfy them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryEvents {
    /// Times usage went over the low boundary.
    pub low: u64,
    /// Times usage went over the high boundary.
    pub high: u64,
    /// Times an allocation hit the hard ceiling.
    pub max: u64,
    /// Times the group ran out of memory.
    pub oom: u64,
    /// Members killed by the OOM killer.
    pub oom_kill: u64,
}

impl MemoryEvents {
    /// Parse the flat-keyed content of `memory.events`.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut events = Self::default();

        for (key, value) in flat_keyed(content) {
            match key {
                "low" => events.low = value,
                "high" => events.high = value,
                "max" => events.max = value,
                "oom" => events.oom = value,
                "oom_kill" => events.oom_kill = value,
                _ => {}
            }
        }

        events
    }
}

/// Accounting snapshot of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GroupStats {
    /// CPU usage and throttling.
    pub cpu: CpuStats,
    /// Memory usage against the ceiling.
    pub memory: MemoryUsage,
    /// Memory ceiling events.
    pub events: MemoryEvents,
}

/// Whether `cgroup.events` reports live processes. `None` if the key is absent.
pub(crate) fn parse_populated(content: &str) -> Option<bool> {
    flat_keyed(content)
        .find(|(key, _)| *key == "populated")
        .map(|(_, value)| value != 0)
}

/// Parse the newline-separated pid list of `cgroup.procs`.
pub(crate) fn parse_pids(content: &str) -> BTreeSet<u32> {
    content
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

fn flat_keyed(content: &str) -> impl Iterator<Item = (&str, u64)> {
    content.lines().filter_map(|line| {
        let mut parts = line.split_whitespace();
        let key = parts.next()?;
        let value = parts.next()?.parse().ok()?;
        Some((key, value))
    })
}
