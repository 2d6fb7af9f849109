//! Shared helpers for reactor integration tests

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use procloop_reactor::{Reactor, ReactorConfig, RunOutcome};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Generous upper bound for runs that should end on their own
pub const RUN_LIMIT: Duration = Duration::from_secs(10);

/// Reactor with short poll and escalation intervals
pub fn fast_reactor() -> Reactor {
    init_tracing();
    let config = ReactorConfig::new()
        .exit_poll_interval(Duration::from_millis(10))
        .kill_escalation(Some(Duration::from_millis(500)));
    Reactor::with_config(config).unwrap()
}

/// Run until `expected` bytes arrived (or the run ends), collecting chunks
pub fn collect(reactor: &mut Reactor, expected: usize) -> (RunOutcome, Vec<Vec<u8>>) {
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut total = 0;
    let outcome = reactor
        .run(
            |control, chunk| {
                total += chunk.len();
                chunks.push(chunk.to_vec());
                if total >= expected {
                    control.stop();
                }
            },
            Some(RUN_LIMIT),
        )
        .unwrap();
    (outcome, chunks)
}

/// True while `pid` still has an entry in the process table
pub fn process_visible(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
