//! Zombie reaper
//!
//! Some OS/event-loop combinations never report a child's exit when both of
//! its pipes close before the wait-for-exit call is issued, leaving a
//! defunct entry behind. [`reap`] uses only OS primitives to collect such a
//! child: probe liveness with signal 0 and collect the exit status with a
//! non-blocking wait until the probe reports the process gone.

use std::time::Duration;

/// Default sleep between liveness probes
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Block until `pid` no longer exists, collecting its exit status.
///
/// Never fails observably. Returns at once for a pid that is not a child of
/// the current process; for a child the probe loop does not return while it
/// is alive.
pub fn reap(pid: u32) {
    reap_with_interval(pid, DEFAULT_REAP_INTERVAL);
}

/// Same as [`reap`] with an explicit sleep between probes.
#[cfg(unix)]
pub fn reap_with_interval(pid: u32, interval: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 0 {
        return;
    }
    let pid = Pid::from_raw(raw);

    let mut probes: u64 = 0;
    loop {
        match kill(pid, None) {
            Ok(()) => {}
            // EPERM means the pid now belongs to someone else's process
            Err(Errno::ESRCH) | Err(Errno::EPERM) => break,
            Err(e) => {
                tracing::warn!(pid = %pid, error = %e, "Liveness probe failed");
                break;
            }
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => {
                tracing::debug!(pid = %pid, status = ?status, "Collected exit status");
            }
            // Not our child: nothing left to collect, and a live pid here
            // belongs to some other process
            Err(Errno::ECHILD) => break,
            Err(e) => tracing::trace!(pid = %pid, error = %e, "waitpid failed"),
        }

        probes += 1;
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    tracing::trace!(pid = %pid, probes, "Process reaped");
}

/// Same as [`reap`] with an explicit sleep between probes.
///
/// No zombie concept outside Unix: nothing to do.
#[cfg(not(unix))]
pub fn reap_with_interval(pid: u32, interval: Duration) {
    let _ = (pid, interval);
}
