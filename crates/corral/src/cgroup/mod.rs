//! Cgroup v2 resource groups.
//!
//! A [`Controller`] owns one namespace directory below the cgroup root and
//! hands out [`ResourceGroup`]s inside it. Each group is a child cgroup whose
//! control files carry the CPU ceiling (`cpu.max`), the memory ceiling
//! (`memory.max`) and the priority (`cpu.weight`) shared by all members.

mod control;
mod controller;
mod group;
mod policy;
mod process;
mod stats;
mod version;

pub use controller::Controller;
pub use group::{GroupState, ResourceGroup};
pub use policy::{AppliedLimits, ConfigureReport, LimitPolicy, OnPolicyFailure, PriorityClass};
pub use stats::{CpuStats, GroupStats, MemoryEvents, MemoryUsage};
pub use version::{CgroupVersion, HierarchyKind};
