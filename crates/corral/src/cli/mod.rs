//! CLI command definitions and handlers.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use corral_common::{CpuRate, MemoryQuantity};
use serde::Serialize;

use crate::cgroup::{
    AppliedLimits, Controller, GroupStats, LimitPolicy, OnPolicyFailure, PriorityClass,
    ResourceGroup,
};
use crate::config::{CollisionPolicy, ControllerConfig};
use crate::workload::{self, BusyWorkers};

/// Corral - resource groups on cgroup v2
#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: ~/.config/corral/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root of the cgroup hierarchy
    #[arg(long, global = true, env = "CORRAL_CGROUP_ROOT")]
    pub cgroup_root: Option<PathBuf>,

    /// Namespace directory holding the groups
    #[arg(long, global = true, env = "CORRAL_NAMESPACE")]
    pub namespace: Option<String>,

    /// Drive a plain directory tree instead of the kernel hierarchy
    #[arg(long, global = true)]
    pub emulate: bool,

    /// Attach to an existing group instead of failing on a name collision
    #[arg(long, global = true)]
    pub attach: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Corral commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a limited group, run busy workers inside it, then terminate it
    Run {
        /// Group name
        name: String,

        /// CPU ceiling: percent of one CPU ("150"), cores ("1.5c") or millicores ("500m")
        #[arg(long, allow_hyphen_values = true)]
        cpu: Option<CpuRate>,

        /// Memory ceiling (e.g. "20Mi", "1G")
        #[arg(long)]
        memory: Option<MemoryQuantity>,

        /// Priority class (idle, below-normal, normal, above-normal, high, realtime)
        #[arg(long)]
        priority: Option<PriorityClass>,

        /// Number of busy worker threads
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Also spawn a spinning child process and bind it
        #[arg(long)]
        spawn_member: bool,

        /// Do not bind this process to the group
        #[arg(long)]
        no_bind_self: bool,

        /// Keep running when a limit cannot be applied
        #[arg(long)]
        continue_on_policy_failure: bool,

        /// Terminate after this many seconds instead of waiting for Enter
        #[arg(long)]
        duration: Option<u64>,
    },

    /// List groups in the namespace
    List,

    /// Show accounting for a group
    Stats {
        /// Group name
        name: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table", value_parser = ["table", "json"])]
        format: String,
    },

    /// Kill every member of a group and remove it
    Kill {
        /// Group name
        name: String,

        /// Exit code to record
        #[arg(long, default_value_t = 0)]
        exit_code: u32,
    },

    /// Remove groups that no longer hold any process
    Prune,

    /// Spin on CPU until killed
    #[command(hide = true)]
    Spin {
        /// Number of spinning threads
        #[arg(long, default_value_t = 1)]
        threads: usize,
    },
}

/// JSON shape of `stats --format json`.
#[derive(Serialize)]
struct GroupReport<'a> {
    name: &'a str,
    path: String,
    members: Vec<u32>,
    limits: AppliedLimits,
    stats: GroupStats,
}

impl Cli {
    /// Build the controller configuration from the config file and flags.
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load(path)?,
            None => ControllerConfig::discover()?,
        };

        if let Some(root) = &self.cgroup_root {
            config = config.with_root(root);
        }
        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace);
        }
        if self.emulate {
            config = config.emulated();
        }
        if self.attach {
            config = config.with_collision(CollisionPolicy::Attach);
        }

        config.validate()?;
        Ok(config)
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        if let Commands::Spin { threads } = self.command {
            workload::spin(threads)?;
            return Ok(());
        }

        let config = self.controller_config()?;

        match self.command {
            Commands::Run {
                name,
                cpu,
                memory,
                priority,
                workers,
                spawn_member,
                no_bind_self,
                continue_on_policy_failure,
                duration,
            } => {
                let defaults = config.limits.unwrap_or(LimitPolicy::new(
                    CpuRate::percent(150),
                    MemoryQuantity::mebibytes(20),
                    PriorityClass::BelowNormal,
                ));
                let policy = LimitPolicy::new(
                    cpu.unwrap_or(defaults.cpu_rate),
                    memory.unwrap_or(defaults.memory_limit),
                    priority.unwrap_or(defaults.priority),
                );
                let on_failure = if continue_on_policy_failure {
                    OnPolicyFailure::Continue
                } else {
                    OnPolicyFailure::Abort
                };

                let controller = Controller::new(config)?;
                let mut group = controller.create(&name)?;
                println!("Group {} created at {}", name, group.path().display());

                let report = group.configure(&policy, on_failure)?;
                for failure in &report.failures {
                    eprintln!("warning: {failure}");
                }
                println!(
                    "Limits: cpu {}, memory {}, priority {}",
                    policy.cpu_rate, policy.memory_limit, policy.priority
                );

                if !no_bind_self {
                    group.bind_current()?;
                }

                let member = if spawn_member {
                    let mut child = workload::spawn_member()?;
                    if let Err(e) = group.bind_child(&child) {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e.into());
                    }
                    println!("Member process {} bound", child.id());
                    Some(child)
                } else {
                    None
                };

                let busy = BusyWorkers::spawn(workers)?;
                println!("Simulating work using {} threads", busy.len());

                wait_for_release(duration).await?;

                let iterations = busy.stop();
                tracing::debug!(iterations, "Workers finished");
                if let Ok(stats) = group.stats() {
                    println!(
                        "CPU used: {} ms ({} of {} periods throttled)",
                        stats.cpu.usage_usec / 1000,
                        stats.cpu.nr_throttled,
                        stats.cpu.nr_periods
                    );
                }

                println!("Terminating group {name}");
                std::io::stdout().flush()?;
                group.terminate(0)?;

                if let Some(mut child) = member {
                    child.wait()?;
                }
                println!("Group {name} terminated");
                Ok(())
            }

            Commands::List => {
                let controller = Controller::new(config)?;

                println!("NAME\tMEMBERS\tCPU\tMEMORY\tPRIORITY");
                for name in controller.list()? {
                    let mut group = match controller.open(&name) {
                        Ok(group) => group,
                        Err(e) => {
                            tracing::warn!(group = %name, error = %e, "Failed to open group");
                            continue;
                        }
                    };
                    group.set_kill_on_drop(false);

                    let members = match group.live_members() {
                        Ok(members) => members.len(),
                        Err(e) => {
                            tracing::warn!(group = %name, error = %e, "Failed to read group members");
                            0
                        }
                    };
                    let limits = group.limits();
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        name,
                        members,
                        limits
                            .cpu_rate_percent
                            .map_or_else(|| "max".to_string(), |rate| format!("{rate}%")),
                        limits.memory_limit_bytes.map_or_else(
                            || "max".to_string(),
                            |bytes| MemoryQuantity::bytes(bytes).to_string()
                        ),
                        limits
                            .priority
                            .map_or_else(|| "-".to_string(), |class| class.to_string())
                    );
                }
                Ok(())
            }

            Commands::Stats { name, format } => {
                let controller = Controller::new(config)?;
                let mut group = controller.open(&name)?;
                group.set_kill_on_drop(false);

                if format == "json" {
                    let report = group_report(&group)?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_stats(&group)?;
                }
                Ok(())
            }

            Commands::Kill { name, exit_code } => {
                let controller = Controller::new(config)?;
                let mut group = controller.open(&name)?;
                let killed = group.live_members()?.len();

                group
                    .terminate(exit_code)
                    .map_err(|e| eyre!("Failed to terminate group {name}: {e}"))?;

                println!("Group {name} terminated ({killed} processes, exit code {exit_code})");
                Ok(())
            }

            Commands::Prune => {
                let controller = Controller::new(config)?;
                let removed = controller.prune()?;

                for name in &removed {
                    println!("{name}");
                }
                println!("Pruned {} groups", removed.len());
                Ok(())
            }

            Commands::Spin { .. } => Ok(()),
        }
    }
}

/// Block until Ctrl-C, Enter, or the optional deadline.
async fn wait_for_release(duration: Option<u64>) -> Result<()> {
    if let Some(secs) = duration {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(secs)) => {}
            signal = tokio::signal::ctrl_c() => signal?,
        }
        return Ok(());
    }

    println!("Press Enter to terminate the group");

    // A detached thread, so a pending read never holds up runtime shutdown.
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });

    tokio::select! {
        _ = rx => {}
        signal = tokio::signal::ctrl_c() => signal?,
    }
    Ok(())
}

fn group_report(group: &ResourceGroup) -> Result<GroupReport<'_>> {
    Ok(GroupReport {
        name: group.name().as_str(),
        path: group.path().display().to_string(),
        members: group.live_members()?.into_iter().collect(),
        limits: group.limits(),
        stats: group.stats()?,
    })
}

fn print_stats(group: &ResourceGroup) -> Result<()> {
    let stats = group.stats()?;
    let members = group.live_members()?;
    let limits = group.limits();

    println!("Group:      {}", group.name());
    println!("Path:       {}", group.path().display());
    println!(
        "Members:    {}",
        members
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    );
    println!(
        "CPU limit:  {}",
        limits
            .cpu_rate_percent
            .map_or_else(|| "max".to_string(), |rate| format!("{rate}%"))
    );
    println!(
        "CPU usage:  {} us (user {}, system {})",
        stats.cpu.usage_usec, stats.cpu.user_usec, stats.cpu.system_usec
    );
    println!(
        "Throttled:  {} of {} periods, {} us",
        stats.cpu.nr_throttled, stats.cpu.nr_periods, stats.cpu.throttled_usec
    );
    println!(
        "Memory:     {} / {}{}",
        MemoryQuantity::bytes(stats.memory.current),
        stats
            .memory
            .max
            .map_or_else(|| "max".to_string(), |max| MemoryQuantity::bytes(max).to_string()),
        stats
            .memory
            .percent()
            .map_or_else(String::new, |pct| format!(" ({pct:.1}%)"))
    );
    println!(
        "Events:     max {}, oom {}, oom_kill {}",
        stats.events.max, stats.events.oom, stats.events.oom_kill
    );
    println!(
        "Priority:   {}",
        limits
            .priority
            .map_or_else(|| "-".to_string(), |class| class.to_string())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse_quantities() {
        let cli = Cli::parse_from([
            "corral", "run", "quota-test", "--cpu", "1.5c", "--memory", "20Mi", "--priority",
            "below-normal",
        ]);

        let Commands::Run {
            cpu,
            memory,
            priority,
            workers,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(cpu, Some(CpuRate::percent(150)));
        assert_eq!(memory, Some(MemoryQuantity::mebibytes(20)));
        assert_eq!(priority, Some(PriorityClass::BelowNormal));
        assert_eq!(workers, 4);
    }

    #[test]
    fn negative_cpu_rate_reaches_the_controller() {
        let cli = Cli::parse_from(["corral", "run", "g", "--cpu", "-5"]);
        assert!(matches!(
            cli.command,
            Commands::Run {
                cpu: Some(rate),
                ..
            } if rate.as_percent() == -5
        ));
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "corral",
            "--cgroup-root",
            "/tmp/cg",
            "--namespace",
            "jobs",
            "--emulate",
            "--attach",
            "--config",
            "/nonexistent/corral.toml",
            "list",
        ]);
        assert!(cli.controller_config().is_err());

        let cli = Cli::parse_from([
            "corral",
            "--cgroup-root",
            "/tmp/cg",
            "--namespace",
            "jobs",
            "--emulate",
            "--attach",
            "list",
        ]);
        let config = cli.controller_config().unwrap();
        assert_eq!(config.paths.namespace_dir(), PathBuf::from("/tmp/cg/jobs"));
        assert!(config.emulate);
        assert_eq!(config.collision, CollisionPolicy::Attach);
    }
}
