//! # corral-common
//!
//! Shared types for the corral resource group controller.
//!
//! This crate provides common functionality used across corral crates:
//! - The controller error taxonomy
//! - Group name validation
//! - CPU rate and memory quantity parsing
//! - Cgroup hierarchy paths

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;
pub mod quantity;

pub use error::{CorralError, CorralResult};
pub use name::GroupName;
pub use paths::CgroupPaths;
pub use quantity::{CpuRate, MemoryQuantity};
