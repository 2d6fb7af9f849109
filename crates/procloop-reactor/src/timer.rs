//! One-shot run timer and the prepare hook that arms it

use std::time::{Duration, Instant};

/// Timer that fires at most once after being started
#[derive(Debug, Default)]
pub(crate) struct OneShotTimer {
    deadline: Option<Instant>,
}

impl OneShotTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm relative to now, replacing any previous deadline
    pub(crate) fn start(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub(crate) fn stop(&mut self) {
        self.deadline = None;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left until the deadline, zero once it has passed
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Disarm and report true if the deadline has passed
    pub(crate) fn fire_if_due(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Hook run at the top of a loop iteration; stops itself after one call.
///
/// The run timer is armed only from here, so it is armed at most once per run.
#[derive(Debug, Default)]
pub(crate) struct PrepareHook {
    pending: Option<Duration>,
}

impl PrepareHook {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&mut self, timeout: Duration) {
        self.pending = Some(timeout);
    }

    pub(crate) fn stop(&mut self) {
        self.pending = None;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    /// Run the hook: arm `timer` if started, then stop
    pub(crate) fn run(&mut self, timer: &mut OneShotTimer) {
        if let Some(timeout) = self.pending.take() {
            timer.start(timeout);
        }
    }
}
