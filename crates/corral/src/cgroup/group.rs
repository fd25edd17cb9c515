//! A single resource group and its lifecycle.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corral_common::{CorralError, CorralResult, GroupName};

use super::control::ControlDir;
use super::controller::Hierarchy;
use super::policy::{AppliedLimits, ConfigureReport, LimitPolicy, OnPolicyFailure, PriorityClass};
use super::process;
use super::stats::{parse_populated, CpuStats, GroupStats, MemoryEvents, MemoryUsage};
use super::version::HierarchyKind;

/// Interval between `cgroup.events` polls while a group drains.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Lifecycle state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Created, no limit applied yet.
    Created,
    /// At least one limit has been applied.
    Configured,
    /// Members killed and the group released. Absorbing.
    Terminated {
        /// Exit code recorded for the group.
        exit_code: u32,
    },
}

/// A named group of processes sharing one set of limits.
///
/// The handle owns the group: dropping it terminates the members unless
/// `kill_on_drop` is off.
#[derive(Debug)]
pub struct ResourceGroup {
    name: GroupName,
    hierarchy: Arc<Hierarchy>,
    dir: ControlDir,
    state: GroupState,
    members: BTreeSet<u32>,
    limits: AppliedLimits,
    kill_on_drop: bool,
}

impl ResourceGroup {
    pub(crate) fn new(
        name: GroupName,
        hierarchy: Arc<Hierarchy>,
        dir: ControlDir,
        members: BTreeSet<u32>,
        existing: bool,
    ) -> CorralResult<Self> {
        let limits = if existing {
            let read = |file| dir.read_optional(file);
            AppliedLimits::from_control_files(
                read("cpu.max")?.as_deref(),
                read("memory.max")?.as_deref(),
                read("cpu.weight")?.as_deref(),
            )
        } else {
            AppliedLimits::default()
        };

        let configured = limits != AppliedLimits::default();
        let kill_on_drop = hierarchy.config.kill_on_drop;

        Ok(Self {
            name,
            hierarchy,
            dir,
            state: if configured {
                GroupState::Configured
            } else {
                GroupState::Created
            },
            members,
            limits,
            kill_on_drop,
        })
    }

    /// Add a process to the group.
    ///
    /// Binding a pid that is already a member is a no-op. A process can
    /// belong to only one group of the namespace at a time.
    ///
    /// # Errors
    ///
    /// [`CorralError::AlreadyTerminated`] after `terminate`.
    /// [`CorralError::Bind`] with `ESRCH` if the process has exited, with
    /// `EBUSY` if another group holds it, or with the OS refusal.
    pub fn bind(&mut self, pid: u32) -> CorralResult<()> {
        self.ensure_active()?;

        if self.members.contains(&pid) {
            tracing::debug!(group = %self.name, pid, "Process already bound");
            return Ok(());
        }

        let bind_error = |source| CorralError::Bind {
            group: self.name.to_string(),
            pid,
            source,
        };

        process::probe(pid).map_err(bind_error)?;

        if let Some(owner) = self
            .hierarchy
            .owner_of(pid, self.name.as_str())
            .map_err(bind_error)?
        {
            tracing::warn!(group = %self.name, pid, owner = %owner, "Process belongs to another group");
            return Err(bind_error(io::Error::from_raw_os_error(libc::EBUSY)));
        }

        if let Some(priority) = self.limits.priority {
            process::set_niceness(pid, priority.niceness()).map_err(bind_error)?;
        }

        self.dir
            .append("cgroup.procs", &pid.to_string())
            .map_err(bind_error)?;
        self.members.insert(pid);

        tracing::info!(group = %self.name, pid, "Bound process");
        Ok(())
    }

    /// Add the calling process to the group.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub fn bind_current(&mut self) -> CorralResult<()> {
        self.bind(std::process::id())
    }

    /// Add a spawned child to the group.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub fn bind_child(&mut self, child: &Child) -> CorralResult<()> {
        self.bind(child.id())
    }

    /// Cap the group's CPU time at `rate_percent` of one logical CPU.
    ///
    /// The cap is hard: members are throttled once the group has used its
    /// quota for the current period.
    ///
    /// # Errors
    ///
    /// [`CorralError::Policy`] with `EINVAL` for a rate outside
    /// `1..=100 * CPUs` (nothing is written), or with the OS refusal.
    pub fn set_cpu_limit(&mut self, rate_percent: i64) -> CorralResult<()> {
        self.ensure_active()?;

        let policy_error = |source| CorralError::Policy {
            group: self.name.to_string(),
            setting: "cpu.max".to_string(),
            source,
        };

        if !(1..=self.hierarchy.max_cpu_rate).contains(&rate_percent) {
            tracing::warn!(
                group = %self.name,
                rate_percent,
                max = self.hierarchy.max_cpu_rate,
                "Rejected CPU rate"
            );
            return Err(policy_error(io::Error::from_raw_os_error(libc::EINVAL)));
        }

        let period = self.hierarchy.config.cpu_period_us;
        // rate is positive and bounded by 100 * CPUs, period by 10^6.
        let quota = rate_percent.unsigned_abs() * period / 100;

        self.dir
            .write("cpu.max", &format!("{quota} {period}"))
            .map_err(policy_error)?;

        self.limits.cpu_rate_percent = Some(rate_percent);
        self.state = GroupState::Configured;

        tracing::info!(group = %self.name, rate_percent, quota, period, "Applied CPU limit");
        Ok(())
    }

    /// Set the aggregate memory ceiling and the priority class together.
    ///
    /// The class is written as the group's `cpu.weight` and as the nice value
    /// of every live member thread; members bound later get the same nice
    /// value. Either all settings take effect or none does.
    ///
    /// # Errors
    ///
    /// [`CorralError::Policy`] with `EINVAL` for a zero limit, or with the OS
    /// refusal of any write. Raising priority above `Normal` without
    /// `CAP_SYS_NICE` fails with `EACCES` once the group has members.
    pub fn set_memory_and_priority_limit(
        &mut self,
        memory_limit_bytes: u64,
        priority: PriorityClass,
    ) -> CorralResult<()> {
        self.ensure_active()?;

        let policy_error = |setting: &str, source| CorralError::Policy {
            group: self.name.to_string(),
            setting: setting.to_string(),
            source,
        };

        if memory_limit_bytes == 0 {
            return Err(policy_error(
                "memory.max",
                io::Error::from_raw_os_error(libc::EINVAL),
            ));
        }

        let previous_memory = self
            .dir
            .read_optional("memory.max")
            .map_err(|e| policy_error("memory.max", e))?;
        let previous_weight = self
            .dir
            .read_optional("cpu.weight")
            .map_err(|e| policy_error("cpu.weight", e))?;

        self.dir
            .write("memory.max", &memory_limit_bytes.to_string())
            .map_err(|e| policy_error("memory.max", e))?;

        if let Err(e) = self
            .dir
            .write("cpu.weight", &priority.cpu_weight().to_string())
        {
            self.restore("memory.max", previous_memory.as_deref(), "max");
            return Err(policy_error("cpu.weight", e));
        }

        if let Err(e) = self.renice_members(priority.niceness()) {
            let previous_nice = self.limits.priority.unwrap_or_default().niceness();
            if let Err(restore_err) = self.renice_members(previous_nice) {
                tracing::error!(group = %self.name, error = %restore_err, "Failed to restore member priority");
            }
            self.restore("memory.max", previous_memory.as_deref(), "max");
            self.restore("cpu.weight", previous_weight.as_deref(), "100");
            return Err(policy_error("nice", e));
        }

        self.limits.memory_limit_bytes = Some(memory_limit_bytes);
        self.limits.priority = Some(priority);
        self.state = GroupState::Configured;

        tracing::info!(
            group = %self.name,
            memory_limit_bytes,
            priority = %priority,
            weight = priority.cpu_weight(),
            nice = priority.niceness(),
            "Applied memory and priority limits"
        );
        Ok(())
    }

    /// Put back a control file's earlier content, or `default` if it had none.
    fn restore(&self, file: &str, previous: Option<&str>, default: &str) {
        let value = previous.map_or(default, str::trim);
        if let Err(e) = self.dir.write(file, value) {
            tracing::error!(group = %self.name, file, error = %e, "Failed to restore control file");
        }
    }

    /// Apply `nice` to every thread of every live member.
    fn renice_members(&self, nice: i32) -> io::Result<()> {
        for pid in self.hierarchy.procs(&self.dir)? {
            match process::set_niceness(pid, nice) {
                Ok(()) => {}
                // Exited since cgroup.procs was read.
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Apply a complete policy.
    ///
    /// Under [`OnPolicyFailure::Abort`] the first failure terminates the
    /// group, with the failing OS code as exit code, and is returned. Under
    /// [`OnPolicyFailure::Continue`] every failure is collected in the report
    /// and the group keeps running.
    ///
    /// # Errors
    ///
    /// The first policy failure under `Abort`;
    /// [`CorralError::AlreadyTerminated`] in either mode.
    pub fn configure(
        &mut self,
        policy: &LimitPolicy,
        on_failure: OnPolicyFailure,
    ) -> CorralResult<ConfigureReport> {
        self.ensure_active()?;

        let mut report = ConfigureReport::default();

        let cpu = self.set_cpu_limit(policy.cpu_rate.as_percent());
        self.settle(cpu, on_failure, &mut report)?;

        let memory = self.set_memory_and_priority_limit(policy.memory_limit.as_bytes(), policy.priority);
        self.settle(memory, on_failure, &mut report)?;

        Ok(report)
    }

    fn settle(
        &mut self,
        result: CorralResult<()>,
        on_failure: OnPolicyFailure,
        report: &mut ConfigureReport,
    ) -> CorralResult<()> {
        let Err(err) = result else {
            return Ok(());
        };

        if err.is_terminated() {
            return Err(err);
        }

        match on_failure {
            OnPolicyFailure::Abort => {
                let exit_code = err
                    .os_code()
                    .and_then(|code| u32::try_from(code).ok())
                    .unwrap_or(1);
                tracing::error!(group = %self.name, error = %err, exit_code, "Policy failed, terminating group");
                if let Err(teardown) = self.terminate(exit_code) {
                    tracing::error!(group = %self.name, error = %teardown, "Failed to terminate group");
                }
                Err(err)
            }
            OnPolicyFailure::Continue => {
                tracing::warn!(group = %self.name, error = %err, "Policy failed, continuing degraded");
                report.failures.push(err);
                Ok(())
            }
        }
    }

    /// Kill every member and release the group.
    ///
    /// `exit_code` is recorded in the group state; the kernel cannot stamp it
    /// on a killed process.
    ///
    /// # Errors
    ///
    /// [`CorralError::AlreadyTerminated`] on a second call.
    /// [`CorralError::Teardown`] if the members cannot be killed (the group
    /// stays active) or the group cannot be released (it stays terminated).
    pub fn terminate(&mut self, exit_code: u32) -> CorralResult<()> {
        self.ensure_active()?;

        let teardown_error = |source| CorralError::Teardown {
            group: self.name.to_string(),
            source,
        };

        let victims = self.hierarchy.procs(&self.dir).map_err(teardown_error)?;
        self.kill_members(&victims).map_err(teardown_error)?;

        self.state = GroupState::Terminated { exit_code };
        tracing::info!(
            group = %self.name,
            exit_code,
            killed = victims.len(),
            "Terminated group"
        );

        self.release().map_err(teardown_error)
    }

    fn kill_members(&self, victims: &BTreeSet<u32>) -> io::Result<()> {
        if self.hierarchy.kind == HierarchyKind::V2 {
            match self.dir.write("cgroup.kill", "1") {
                Ok(()) => return Ok(()),
                // cgroup.kill arrived in Linux 5.14.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(group = %self.name, "cgroup.kill unavailable, signalling members");
                }
                Err(e) => return Err(e),
            }
        }

        // A member owner signals itself last so the rest of the group still dies.
        let own = std::process::id();
        victims
            .iter()
            .filter(|pid| **pid != own)
            .try_for_each(|pid| process::kill(*pid))?;
        if victims.contains(&own) {
            tracing::warn!(group = %self.name, "Terminating group that contains this process");
            process::kill(own)?;
        }
        Ok(())
    }

    fn release(&self) -> io::Result<()> {
        let name = self.name.as_str();

        if self.hierarchy.kind == HierarchyKind::Emulated {
            return self.hierarchy.namespace.remove_child(name);
        }

        let deadline = Instant::now() + self.hierarchy.config.terminate_timeout();
        loop {
            let populated = self
                .dir
                .read_optional("cgroup.events")?
                .and_then(|events| parse_populated(&events))
                .unwrap_or(false);

            if !populated {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(group = %self.name, "Group did not drain before timeout");
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }

            // Processes that forked while cgroup.kill was in flight.
            for pid in self.hierarchy.procs(&self.dir)? {
                process::kill(pid)?;
            }
            std::thread::sleep(DRAIN_POLL);
        }

        self.hierarchy.namespace.remove_child(name)
    }

    /// Read the group's accounting counters.
    ///
    /// Files the hierarchy does not provide read as zero.
    ///
    /// # Errors
    ///
    /// [`CorralError::AlreadyTerminated`] once the group is gone, or the I/O
    /// failure.
    pub fn stats(&self) -> CorralResult<GroupStats> {
        self.ensure_active()?;

        let read = |file| self.dir.read_optional(file);

        let cpu = read("cpu.stat")?
            .map(|content| CpuStats::parse(&content))
            .unwrap_or_default();
        let memory = MemoryUsage::parse(
            read("memory.current")?.as_deref(),
            read("memory.max")?.as_deref(),
        );
        let events = read("memory.events")?
            .map(|content| MemoryEvents::parse(&content))
            .unwrap_or_default();

        Ok(GroupStats {
            cpu,
            memory,
            events,
        })
    }

    /// Pids currently in the group, as the hierarchy reports them.
    ///
    /// Unlike [`members`](Self::members) this shrinks as processes exit and
    /// includes children forked by members.
    ///
    /// # Errors
    ///
    /// [`CorralError::AlreadyTerminated`] once the group is gone, or the I/O
    /// failure.
    pub fn live_members(&self) -> CorralResult<BTreeSet<u32>> {
        self.ensure_active()?;
        Ok(self.hierarchy.procs(&self.dir)?)
    }

    /// Every pid bound through this handle. Never shrinks.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<u32> {
        &self.members
    }

    /// Limits applied so far.
    #[must_use]
    pub fn limits(&self) -> AppliedLimits {
        self.limits
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &GroupName {
        &self.name
    }

    /// Group directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Whether dropping this handle terminates the group.
    pub fn set_kill_on_drop(&mut self, kill_on_drop: bool) {
        self.kill_on_drop = kill_on_drop;
    }

    fn ensure_active(&self) -> CorralResult<()> {
        match self.state {
            GroupState::Terminated { .. } => Err(CorralError::AlreadyTerminated {
                group: self.name.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for ResourceGroup {
    fn drop(&mut self) {
        if matches!(self.state, GroupState::Terminated { .. }) {
            return;
        }

        if !self.kill_on_drop {
            tracing::debug!(group = %self.name, "Releasing handle, group left running");
            return;
        }

        if let Err(e) = self.terminate(0) {
            tracing::warn!(group = %self.name, error = %e, "Failed to terminate group on drop");
        }
    }
}
