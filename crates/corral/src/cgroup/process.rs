//! Signal-level process probing and killing.

use std::io;

fn raw_pid(pid: u32) -> io::Result<libc::pid_t> {
    // 0 and negative values address process groups, never a single process.
    libc::pid_t::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Check that `pid` names a live process.
///
/// `EPERM` means the process exists but belongs to someone else; that is
/// left for the cgroup write to accept or refuse.
pub(crate) fn probe(pid: u32) -> io::Result<()> {
    let raw = raw_pid(pid)?;

    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(raw, 0) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EPERM) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Whether `pid` still names a process (zombies included).
pub(crate) fn is_alive(pid: u32) -> bool {
    probe(pid).is_ok()
}

/// Send `SIGKILL` to `pid`. A process that is already gone is not an error.
pub(crate) fn kill(pid: u32) -> io::Result<()> {
    let raw = raw_pid(pid)?;

    // SAFETY: plain kill(2) on a single positive pid.
    if unsafe { libc::kill(raw, libc::SIGKILL) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Set the nice value of every thread of `pid`.
///
/// Threads are listed from `/proc/<pid>/task`; threads that exit while the
/// list is walked are skipped. Threads created later inherit the value from
/// their creator.
pub(crate) fn set_niceness(pid: u32, nice: i32) -> io::Result<()> {
    raw_pid(pid)?;

    let tids: Vec<u32> = match std::fs::read_dir(format!("/proc/{pid}/task")) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }
        Err(e) => return Err(e),
    };

    for tid in tids {
        // SAFETY: setpriority(2) on a single thread id; no memory is shared.
        if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) } == 0 {
            continue;
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn probe_current_process() {
        assert!(probe(std::process::id()).is_ok());
    }

    #[test]
    fn probe_rejects_group_addresses() {
        let err = probe(0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        assert!(probe(u32::MAX).is_err());
    }

    #[test]
    fn set_niceness_on_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        set_niceness(pid, 7).unwrap();
        // SAFETY: getpriority(2) only reads scheduler state.
        let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid) };
        assert_eq!(nice, 7);

        kill(pid).unwrap();
        child.wait().unwrap();
        assert_eq!(
            set_niceness(pid, 7).unwrap_err().raw_os_error(),
            Some(libc::ESRCH)
        );
    }

    #[test]
    fn kill_marks_child_exited() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_alive(pid));

        kill(pid).unwrap();
        child.wait().unwrap();

        let err = probe(pid).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
        assert!(kill(pid).is_ok());
    }
}
