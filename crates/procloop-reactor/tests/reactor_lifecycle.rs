//! End-to-end lifecycle tests against real child processes

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use common::{collect, fast_reactor, init_tracing, process_visible, RUN_LIMIT};
use procloop_reactor::{Reactor, ReactorError, ReactorState, RunOutcome, StreamFault};

#[test]
fn test_echo_round_trip() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();
    assert_eq!(reactor.state(), ReactorState::Connected);

    reactor.send(b"ping").unwrap();
    let (outcome, chunks) = collect(&mut reactor, 4);

    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(chunks.concat(), b"ping");
    assert!(reactor.error().is_none());

    reactor.exit(false).unwrap();
    assert_eq!(reactor.state(), ReactorState::Exited);
}

#[test]
fn test_reactor_reusable_across_runs() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();

    for word in ["one", "two", "three"] {
        reactor.send(word.as_bytes()).unwrap();
        let (outcome, chunks) = collect(&mut reactor, word.len());
        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(chunks.concat(), word.as_bytes());
        assert_eq!(reactor.state(), ReactorState::Connected);
    }

    reactor.exit(false).unwrap();
}

#[test]
fn test_send_from_handler() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();
    reactor.send(b"a").unwrap();

    let mut received = Vec::new();
    let outcome = reactor
        .run(
            |control, chunk| {
                received.extend_from_slice(chunk);
                if received.len() < 5 {
                    control.send(b"a").unwrap();
                } else {
                    control.stop();
                }
            },
            Some(RUN_LIMIT),
        )
        .unwrap();

    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(received, b"aaaaa");
    reactor.exit(false).unwrap();
}

#[test]
fn test_control_reports_child_pid() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();
    let pid = reactor.pid();
    assert!(pid.is_some());

    reactor.send(b"x").unwrap();
    let mut seen = None;
    reactor
        .run(
            |control, _| {
                seen = control.pid();
                control.stop();
            },
            Some(RUN_LIMIT),
        )
        .unwrap();

    assert_eq!(seen, pid);
    reactor.exit(false).unwrap();
}

#[test]
fn test_timeout_without_output() {
    let mut reactor = fast_reactor();
    reactor.spawn(["sleep", "5"]).unwrap();

    let mut calls = 0;
    let start = Instant::now();
    let outcome = reactor
        .run(|_, _| calls += 1, Some(Duration::from_millis(100)))
        .unwrap();

    assert_eq!(outcome, RunOutcome::TimedOut);
    assert_eq!(calls, 0);
    assert!(start.elapsed() >= Duration::from_millis(90));
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(reactor.error().is_none());
    assert_eq!(reactor.timeout(), Some(Duration::from_millis(100)));

    // A timed-out reactor can run again.
    let outcome = reactor
        .run(|_, _| calls += 1, Some(Duration::from_millis(50)))
        .unwrap();
    assert_eq!(outcome, RunOutcome::TimedOut);

    reactor.exit(false).unwrap();
}

#[test]
fn test_zero_timeout_means_none() {
    let mut reactor = fast_reactor();
    reactor.spawn(["printf", "done"]).unwrap();

    let mut received = Vec::new();
    let outcome = reactor
        .run(|_, chunk| received.extend_from_slice(chunk), Some(Duration::ZERO))
        .unwrap();

    assert_eq!(outcome, RunOutcome::StreamClosed);
    assert_eq!(received, b"done");
    assert_eq!(reactor.timeout(), None);
    reactor.exit(false).unwrap();
}

#[test]
fn test_end_of_stream_is_sticky() {
    let mut reactor = fast_reactor();
    reactor.spawn(["printf", "hello"]).unwrap();

    let (outcome, chunks) = collect(&mut reactor, usize::MAX);
    assert_eq!(outcome, RunOutcome::StreamClosed);
    assert_eq!(chunks.concat(), b"hello");
    assert_eq!(reactor.error(), Some(&StreamFault::EndOfStream));

    let err = reactor.run(|_, _| {}, None).unwrap_err();
    assert!(matches!(err, ReactorError::EndOfStream));
    assert!(err.is_stream_fault());

    // Teardown still succeeds with the sticky error set.
    reactor.exit(false).unwrap();
    assert!(reactor.exit_status().is_some_and(|status| status.success()));
}

#[test]
fn test_empty_argv_then_valid_spawn() {
    let mut reactor = fast_reactor();
    let empty: [&str; 0] = [];
    assert!(matches!(
        reactor.spawn(empty),
        Err(ReactorError::Argument(_))
    ));
    assert_eq!(reactor.state(), ReactorState::Idle);

    reactor.spawn(["cat"]).unwrap();
    assert_eq!(reactor.state(), ReactorState::Connected);
    assert!(matches!(
        reactor.spawn(["cat"]),
        Err(ReactorError::State(_))
    ));
    reactor.exit(false).unwrap();
}

#[test]
fn test_exit_is_idempotent() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();

    reactor.exit(false).unwrap();
    reactor.exit(false).unwrap();
    reactor.exit(true).unwrap();
    assert_eq!(reactor.state(), ReactorState::Exited);

    assert!(matches!(reactor.send(b"x"), Err(ReactorError::State(_))));
    assert!(matches!(
        reactor.run(|_, _| {}, None),
        Err(ReactorError::State(_))
    ));
    assert!(matches!(
        reactor.spawn(["cat"]),
        Err(ReactorError::State(_))
    ));
}

#[test]
fn test_exit_leaves_no_zombie() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();
    let pid = reactor.pid().unwrap();
    assert!(process_visible(pid));

    reactor.exit(false).unwrap();
    assert!(!process_visible(pid));
    assert!(reactor.exit_status().is_some());
    assert_eq!(reactor.pid(), Some(pid));
}

#[test]
fn test_drop_tears_down() {
    init_tracing();
    let pid = {
        let mut reactor = Reactor::new();
        reactor.spawn(["cat"]).unwrap();
        reactor.pid().unwrap()
    };
    assert!(!process_visible(pid));
}

#[test]
fn test_force_exit_kills_child() {
    let mut reactor = fast_reactor();
    reactor.spawn(["sleep", "30"]).unwrap();
    let pid = reactor.pid().unwrap();

    let start = Instant::now();
    reactor.exit(true).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!process_visible(pid));

    use std::os::unix::process::ExitStatusExt;
    let status = reactor.exit_status().unwrap();
    assert_eq!(status.signal(), Some(9));
}

#[test]
fn test_escalates_when_sigterm_ignored() {
    let mut reactor = fast_reactor();
    reactor
        .spawn(["sh", "-c", "trap '' TERM; exec sleep 30"])
        .unwrap();
    let pid = reactor.pid().unwrap();
    // Give the shell time to install the trap before signalling.
    std::thread::sleep(Duration::from_millis(200));

    let start = Instant::now();
    reactor.exit(false).unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_secs(10));
    assert!(!process_visible(pid));
}

#[test]
fn test_broken_stdin_fails_next_send() {
    let mut reactor = fast_reactor();
    reactor.spawn(["true"]).unwrap();

    let mut failure = None;
    for _ in 0..100 {
        match reactor.send(b"data") {
            Ok(()) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    assert!(matches!(failure, Some(ReactorError::Write(_))));
    assert!(matches!(reactor.error(), Some(StreamFault::Write(_))));
    assert!(matches!(
        reactor.run(|_, _| {}, None),
        Err(ReactorError::Write(_))
    ));
    reactor.exit(false).unwrap();
}

#[test]
fn test_handler_panic_leaves_reactor_running() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();
    let pid = reactor.pid().unwrap();
    reactor.send(b"boom").unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = reactor.run(|_, _| panic!("handler failed"), Some(RUN_LIMIT));
    }));
    assert!(result.is_err());

    assert_eq!(reactor.state(), ReactorState::Running);
    assert!(matches!(reactor.exit(false), Err(ReactorError::State(_))));

    drop(reactor);
    assert!(!process_visible(pid));
}

#[test]
fn test_stop_outside_run_is_noop() {
    let mut reactor = fast_reactor();
    reactor.spawn(["cat"]).unwrap();
    reactor.stop();

    reactor.send(b"ok").unwrap();
    let (outcome, chunks) = collect(&mut reactor, 2);
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(chunks.concat(), b"ok");
    reactor.exit(false).unwrap();
}
