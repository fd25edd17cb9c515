//! # Corral
//!
//! Corral groups processes under one set of resource limits on Linux
//! cgroup v2.
//!
//! ## Features
//!
//! - **CPU ceiling**: a hard rate cap in percent of one logical CPU (`cpu.max`)
//! - **Memory ceiling**: an aggregate limit across all members (`memory.max`)
//! - **Priority classes**: relative CPU share through `cpu.weight`
//! - **Scoped lifetime**: dropping a group kills its members
//!
//! ## Usage
//!
//! ```no_run
//! use corral::{Controller, ControllerConfig, LimitPolicy, OnPolicyFailure, PriorityClass};
//! use corral_common::{CpuRate, MemoryQuantity};
//!
//! # fn example() -> corral_common::CorralResult<()> {
//! let controller = Controller::new(ControllerConfig::discover()?)?;
//! let mut group = controller.create("quota-test")?;
//!
//! let policy = LimitPolicy::new(
//!     CpuRate::percent(150),
//!     MemoryQuantity::mebibytes(20),
//!     PriorityClass::BelowNormal,
//! );
//! group.configure(&policy, OnPolicyFailure::Abort)?;
//! group.bind_current()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod config;
pub mod workload;

pub use cgroup::{
    AppliedLimits, ConfigureReport, Controller, GroupState, LimitPolicy, OnPolicyFailure,
    PriorityClass, ResourceGroup,
};
pub use config::{CollisionPolicy, ControllerConfig};
