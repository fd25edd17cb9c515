//! CPU-bound load used by the `run` demonstration.

use std::hint::black_box;
use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Threads that spin on floating point work until stopped.
#[derive(Debug)]
pub struct BusyWorkers {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<u64>>,
}

impl BusyWorkers {
    /// Start `count` spinning threads.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a thread cannot be spawned; threads already
    /// started are stopped first.
    pub fn spawn(count: usize) -> io::Result<Self> {
        let mut workers = Self {
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::with_capacity(count),
        };

        for index in 0..count {
            let stop = Arc::clone(&workers.stop);
            let handle = std::thread::Builder::new()
                .name(format!("busy-{index}"))
                .spawn(move || burn(&stop))?;
            workers.handles.push(handle);
        }

        tracing::debug!(count, "Started busy workers");
        Ok(workers)
    }

    /// Number of running threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no thread was started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every thread and wait for it. Returns the total iterations.
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        let iterations = self
            .handles
            .drain(..)
            .filter_map(|handle| handle.join().ok())
            .sum();
        tracing::debug!(iterations, "Stopped busy workers");
        iterations
    }
}

impl Drop for BusyWorkers {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.halt();
        }
    }
}

fn burn(stop: &AtomicBool) -> u64 {
    let mut iterations = 0u64;
    let mut value = 1.000_001_f64;

    while !stop.load(Ordering::Relaxed) {
        for _ in 0..10_000 {
            value = black_box(value * value);
            if value > 1e6 {
                value = 1.000_001;
            }
        }
        iterations += 1;
    }

    iterations
}

/// Spin on `threads` threads until the process is killed.
pub fn spin(threads: usize) -> io::Result<()> {
    let workers = BusyWorkers::spawn(threads.max(1))?;
    tracing::debug!(threads = workers.len(), pid = std::process::id(), "Spinning");

    loop {
        std::thread::park();
    }
}

/// Start a copy of this binary running `spin`, for binding into a group.
///
/// # Errors
///
/// Returns the I/O error if the executable cannot be located or spawned.
pub fn spawn_member() -> io::Result<Child> {
    let exe = std::env::current_exe()?;

    let child = Command::new(exe)
        .args(["spin", "--threads", "1"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    tracing::debug!(pid = child.id(), "Spawned member process");
    Ok(child)
}
