//! Run loop state and readiness waiting
//!
//! The loop itself is driven by the reactor; this module owns the stop flag,
//! the run timer with its prepare hook, and the poll(2) call that blocks
//! between iterations.

use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::timer::{OneShotTimer, PrepareHook};

/// Which watched descriptors became ready
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

/// Loop control shared by every run of one reactor
#[derive(Debug, Default)]
pub(crate) struct EventLoop {
    stop_requested: bool,
    timer: OneShotTimer,
    prepare: PrepareHook,
}

impl EventLoop {
    pub(crate) fn new() -> Self {
        Self {
            stop_requested: false,
            timer: OneShotTimer::new(),
            prepare: PrepareHook::new(),
        }
    }

    /// Ask the current run to return after this iteration
    pub(crate) fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub(crate) fn clear_stop(&mut self) {
        self.stop_requested = false;
    }

    /// Schedule the run timer; it is armed by the first `prepare` call
    pub(crate) fn arm_timeout(&mut self, timeout: Duration) {
        self.prepare.start(timeout);
    }

    pub(crate) fn disarm(&mut self) {
        self.prepare.stop();
        self.timer.stop();
    }

    /// Prepare phase at the top of an iteration
    pub(crate) fn prepare(&mut self) {
        self.prepare.run(&mut self.timer);
    }

    /// Fire the timer if due; firing requests a stop
    pub(crate) fn fire_timer(&mut self) -> bool {
        if self.timer.fire_if_due() {
            tracing::debug!("Run timeout elapsed");
            self.stop();
            return true;
        }
        false
    }

    pub(crate) fn has_active_timer(&self) -> bool {
        self.timer.is_active() || self.prepare.is_active()
    }

    /// Block until a descriptor is ready, the timer is due, or `cap` elapses.
    ///
    /// An interrupted wait reports nothing ready.
    pub(crate) fn wait(
        &self,
        input: Option<BorrowedFd<'_>>,
        output: Option<BorrowedFd<'_>>,
        cap: Option<Duration>,
    ) -> io::Result<Readiness> {
        let mut fds = Vec::with_capacity(2);
        let input_slot = input.map(|fd| {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
            fds.len() - 1
        });
        let output_slot = output.map(|fd| {
            fds.push(PollFd::new(fd, PollFlags::POLLOUT));
            fds.len() - 1
        });

        let limit = match (self.timer.remaining(), cap) {
            (Some(left), Some(cap)) => Some(left.min(cap)),
            (left, cap) => left.or(cap),
        };

        match poll(&mut fds, to_poll_timeout(limit)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Readiness::default()),
            Err(e) => return Err(io::Error::from(e)),
        }

        let ready = |slot: Option<usize>, wanted: PollFlags| {
            slot.and_then(|i| fds[i].revents())
                .map(|events| events.intersects(wanted | PollFlags::POLLHUP | PollFlags::POLLERR))
                .unwrap_or(false)
        };

        Ok(Readiness {
            readable: ready(input_slot, PollFlags::POLLIN),
            writable: ready(output_slot, PollFlags::POLLOUT),
        })
    }
}

/// Round up to whole milliseconds so a sub-millisecond remainder still sleeps
fn to_poll_timeout(limit: Option<Duration>) -> PollTimeout {
    match limit {
        None => PollTimeout::NONE,
        Some(limit) => {
            let ms = limit.as_nanos().div_ceil(1_000_000);
            PollTimeout::from(u16::try_from(ms).unwrap_or(u16::MAX))
        }
    }
}
