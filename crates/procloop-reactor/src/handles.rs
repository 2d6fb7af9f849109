//! Handle set owned by a reactor
//!
//! A transport bundles the OS resources for one stream source. Every
//! transport kind answers the same closed set of operations (open, read,
//! write, close); the reactor never inspects the variant directly.

use std::ffi::OsString;
use std::io;
use std::os::fd::BorrowedFd;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::config::ReactorConfig;
use crate::error::{ReactorError, Result};
use crate::pipe::{InputPipe, OutputPipe};

/// Spawned child process and its lifecycle bookkeeping
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    child: Child,
    pid: u32,
    status: Option<ExitStatus>,
    /// Exit was collected elsewhere (SIGCHLD ignored or reaped by another
    /// waiter); the status is unknown
    gone: bool,
    signalled: Option<Signal>,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            status: None,
            gone: false,
            signalled: None,
        }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.status.is_some() || self.gone
    }

    /// Non-blocking exit check. Returns true the first time exit is seen,
    /// whether or not the status could be collected.
    pub(crate) fn poll_exit(&mut self) -> bool {
        if self.has_exited() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = %self.pid, status = %status, "Process exited");
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) if e.raw_os_error() == Some(Errno::ECHILD as i32) => {
                debug!(pid = %self.pid, "Process collected elsewhere, status unknown");
                self.gone = true;
                true
            }
            Err(e) => {
                debug!(pid = %self.pid, error = %e, "Exit check failed");
                false
            }
        }
    }

    /// Liveness probe with signal 0; ESRCH marks the child gone
    fn probe_gone(&mut self) -> bool {
        let Ok(raw) = i32::try_from(self.pid) else {
            return false;
        };
        if kill(Pid::from_raw(raw), None) == Err(Errno::ESRCH) {
            debug!(pid = %self.pid, "Process no longer exists");
            self.gone = true;
        }
        self.gone
    }

    /// Deliver `signal` unless the child is already gone or was sent the
    /// same signal before.
    pub(crate) fn signal(&mut self, signal: Signal) {
        if self.has_exited() || self.signalled == Some(signal) {
            return;
        }
        let Ok(raw) = i32::try_from(self.pid) else {
            return;
        };
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => {
                debug!(pid = %self.pid, signal = %signal, "Sent signal");
                self.signalled = Some(signal);
            }
            Err(e) => warn!(pid = %self.pid, signal = %signal, error = %e, "Failed to signal process"),
        }
    }

    /// Poll until the child exits, escalating to SIGKILL after `escalation`
    pub(crate) fn wait_with_escalation(&mut self, escalation: Option<Duration>, interval: Duration) {
        let started = Instant::now();
        while !self.has_exited() {
            if self.poll_exit() || self.probe_gone() {
                break;
            }
            if let Some(delay) = escalation {
                if started.elapsed() >= delay && self.signalled != Some(Signal::SIGKILL) {
                    warn!(pid = %self.pid, "Process ignored termination, sending SIGKILL");
                    self.signal(Signal::SIGKILL);
                }
            }
            std::thread::sleep(interval);
        }
    }
}

/// Child process transport: a process wired to two pipes
#[derive(Debug)]
pub(crate) struct ChildTransport {
    process: ProcessHandle,
    input: Option<InputPipe>,
    output: Option<OutputPipe>,
}

/// Stream sources a reactor can drive
#[derive(Debug)]
pub(crate) enum Transport {
    Child(ChildTransport),
}

/// Every OS resource owned by one connected reactor
#[derive(Debug)]
pub(crate) struct HandleSet {
    transport: Transport,
}

impl HandleSet {
    /// Spawn `argv[0]` with `argv[1..]`, stdin/stdout piped and stderr
    /// inherited (or discarded per config).
    pub(crate) fn open_child(argv: &[OsString], config: &ReactorConfig) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ReactorError::Argument("argv must have at least one entry".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(if config.discard_stderr {
            Stdio::null()
        } else {
            Stdio::inherit()
        });

        let mut child = cmd.spawn().map_err(ReactorError::Spawn)?;
        let pid = child.id();

        let pipes = child
            .stdin
            .take()
            .zip(child.stdout.take())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child pipes missing"))
            .and_then(|(stdin, stdout)| Ok((OutputPipe::open(stdin)?, InputPipe::open(stdout)?)));

        let (output, input) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                // Pipes already dropped; don't leave the child behind
                let _ = child.kill();
                let _ = child.wait();
                return Err(ReactorError::Io(e));
            }
        };

        info!(pid = %pid, program = ?program, "Process spawned");

        Ok(Self {
            transport: Transport::Child(ChildTransport {
                process: ProcessHandle::new(child),
                input: Some(input),
                output: Some(output),
            }),
        })
    }

    pub(crate) fn process(&self) -> Option<&ProcessHandle> {
        match &self.transport {
            Transport::Child(child) => Some(&child.process),
        }
    }

    pub(crate) fn process_mut(&mut self) -> Option<&mut ProcessHandle> {
        match &mut self.transport {
            Transport::Child(child) => Some(&mut child.process),
        }
    }

    pub(crate) fn input(&mut self) -> Option<&mut InputPipe> {
        match &mut self.transport {
            Transport::Child(child) => child.input.as_mut(),
        }
    }

    pub(crate) fn output(&mut self) -> Option<&mut OutputPipe> {
        match &mut self.transport {
            Transport::Child(child) => child.output.as_mut(),
        }
    }

    /// Split borrow of the readable and writable ends
    pub(crate) fn pipes(&mut self) -> (Option<&mut InputPipe>, Option<&mut OutputPipe>) {
        match &mut self.transport {
            Transport::Child(child) => (child.input.as_mut(), child.output.as_mut()),
        }
    }

    /// Descriptors to watch: (stdout if reading, stdin if writes are pending)
    pub(crate) fn interest(&self) -> (Option<BorrowedFd<'_>>, Option<BorrowedFd<'_>>) {
        match &self.transport {
            Transport::Child(child) => (
                child.input.as_ref().filter(|p| p.is_reading()).map(InputPipe::fd),
                child
                    .output
                    .as_ref()
                    .filter(|p| p.has_pending() && !p.is_broken())
                    .map(OutputPipe::fd),
            ),
        }
    }

    /// Close pipes first, then release the process. Returns how many
    /// handles were closed by this call.
    pub(crate) fn close(&mut self) -> usize {
        let mut closed = 0;
        match &mut self.transport {
            Transport::Child(child) => {
                if let Some(mut output) = child.output.take() {
                    output.cancel_pending();
                    drop(output);
                    closed += 1;
                }
                if let Some(input) = child.input.take() {
                    drop(input);
                    closed += 1;
                }
            }
        }
        debug!(closed, "Closed pipe handles");
        closed
    }

    /// True while any pipe is still open
    pub(crate) fn has_open_pipes(&self) -> bool {
        match &self.transport {
            Transport::Child(child) => child.input.is_some() || child.output.is_some(),
        }
    }
}
