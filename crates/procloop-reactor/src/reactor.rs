//! Reactor core: one child process, two pipes, one run loop

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing::{debug, info, trace};

use crate::buffer::ReadBuffer;
use crate::config::ReactorConfig;
use crate::error::{ReactorError, Result, StreamFault};
use crate::event_loop::EventLoop;
use crate::handles::{HandleSet, ProcessHandle};
use crate::pipe::OutputPipe;
use crate::reaper;

/// Position in the reactor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Constructed, no child yet
    Idle,
    /// Child spawned, loop not running
    Connected,
    /// Inside `run`
    Running,
    /// Torn down; terminal
    Exited,
}

/// Why a call to [`Reactor::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `stop` was requested
    Stopped,
    /// The run timeout elapsed
    TimedOut,
    /// The child's stdout ended or failed; see [`Reactor::error`]
    StreamClosed,
}

/// Handle given to the data handler for the duration of one chunk
pub struct Control<'a> {
    output: Option<&'a mut OutputPipe>,
    event_loop: &'a mut EventLoop,
    error: &'a mut Option<StreamFault>,
    pid: Option<u32>,
}

impl Control<'_> {
    /// Queue bytes for the child's stdin, same contract as [`Reactor::send`]
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        issue_write(self.output.as_deref_mut(), self.error, bytes)
    }

    /// Return from `run` once the current handler call finishes
    pub fn stop(&mut self) {
        self.event_loop.stop();
    }

    /// Process ID of the child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl fmt::Debug for Control<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("pid", &self.pid)
            .field("stop_requested", &self.event_loop.stop_requested())
            .finish()
    }
}

/// Spawns one child process and exchanges bytes with it over its stdin and
/// stdout.
///
/// Single-threaded: `run` blocks the calling thread and calls the handler
/// synchronously for each chunk read from the child. Dropping the reactor
/// performs the same teardown as [`Reactor::exit`].
#[derive(Debug)]
pub struct Reactor {
    config: ReactorConfig,
    connected: bool,
    exited: bool,
    running: bool,
    error: Option<StreamFault>,
    timeout: Option<Duration>,
    pid: Option<u32>,
    final_status: Option<ExitStatus>,
    event_loop: EventLoop,
    read_buffer: ReadBuffer,
    handles: Option<HandleSet>,
}

impl Reactor {
    /// Create an idle reactor with default configuration
    pub fn new() -> Self {
        Self::build(ReactorConfig::default())
    }

    /// Create an idle reactor with a validated configuration
    pub fn with_config(config: ReactorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ReactorConfig) -> Self {
        let read_buffer = ReadBuffer::new(config.read_buffer_size);
        Self {
            config,
            connected: false,
            exited: false,
            running: false,
            error: None,
            timeout: None,
            pid: None,
            final_status: None,
            event_loop: EventLoop::new(),
            read_buffer,
            handles: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReactorState {
        if self.exited {
            ReactorState::Exited
        } else if self.running {
            ReactorState::Running
        } else if self.connected {
            ReactorState::Connected
        } else {
            ReactorState::Idle
        }
    }

    /// Sticky asynchronous failure, if any
    pub fn error(&self) -> Option<&StreamFault> {
        self.error.as_ref()
    }

    /// Process ID of the spawned child (kept after exit)
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status of the child once its exit has been observed
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.handles
            .as_ref()
            .and_then(HandleSet::process)
            .and_then(ProcessHandle::exit_status)
            .or(self.final_status)
    }

    /// Timeout of the current or most recent run
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Reactor configuration
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Spawn `argv[0]` with the remaining entries as its arguments.
    ///
    /// The child's stdin and stdout are connected to the reactor; stderr is
    /// inherited. A failed spawn leaves the reactor idle.
    pub fn spawn<I, S>(&mut self, argv: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if self.exited {
            return Err(ReactorError::State("Reactor already exited".to_string()));
        }
        if self.connected {
            return Err(ReactorError::State("Reactor already connected".to_string()));
        }

        let argv: Vec<OsString> = argv
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        validate_argv(&argv)?;

        debug!(argv = ?argv, "Spawning process");
        let handles = HandleSet::open_child(&argv, &self.config)?;
        self.pid = handles.process().map(ProcessHandle::pid);
        self.handles = Some(handles);
        self.connected = true;
        Ok(())
    }

    /// Queue a copy of `bytes` for the child's stdin.
    ///
    /// The caller's buffer is not referenced after this returns. Fails
    /// synchronously only when the write cannot be issued (the pipe broke on
    /// an earlier write), which also records the sticky error.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let output = self.handles.as_mut().and_then(HandleSet::output);
        issue_write(output, &mut self.error, bytes)
    }

    /// Drive the loop, calling `handler` with every chunk read from the child.
    ///
    /// Returns when the handler (or the timeout) stops the loop, or when the
    /// child's stdout ends or fails. A zero timeout means no timeout. Refuses
    /// to start while a sticky error is recorded.
    pub fn run<F>(&mut self, mut handler: F, timeout: Option<Duration>) -> Result<RunOutcome>
    where
        F: FnMut(&mut Control<'_>, &[u8]),
    {
        if self.exited {
            return Err(ReactorError::State("Reactor already exited".to_string()));
        }
        if self.running {
            return Err(ReactorError::State("Reactor already running".to_string()));
        }
        if let Some(fault) = &self.error {
            return Err(ReactorError::from(fault));
        }
        if !self.connected {
            return Err(ReactorError::State("Reactor not connected".to_string()));
        }

        self.timeout = timeout.filter(|t| !t.is_zero());
        if let Some(timeout) = self.timeout {
            self.event_loop.arm_timeout(timeout);
        }
        self.event_loop.clear_stop();
        self.running = true;
        if let Some(input) = self.handles.as_mut().and_then(HandleSet::input) {
            input.read_start();
        }
        debug!(
            timeout = ?self.timeout,
            buffer = self.read_buffer.capacity(),
            "Run started"
        );

        let outcome = self.drive(&mut handler);

        if let Some(input) = self.handles.as_mut().and_then(HandleSet::input) {
            input.read_stop();
        }
        self.event_loop.disarm();
        self.running = false;
        debug!(outcome = ?outcome, "Run finished");
        outcome
    }

    /// Ask the running loop to return. No-op when not running.
    ///
    /// `run` holds the reactor borrowed for its whole duration, so a running
    /// loop is stopped from the handler with [`Control::stop`].
    pub fn stop(&mut self) {
        if self.running {
            self.event_loop.stop();
        }
    }

    /// Tear the reactor down: signal the child (SIGTERM, or SIGKILL when
    /// `force`), close every pipe, wait for the child to exit and reap it.
    ///
    /// Idempotent, and a no-op on a reactor that never spawned. Succeeds even
    /// with a sticky error recorded.
    pub fn exit(&mut self, force: bool) -> Result<()> {
        if self.exited || !self.connected {
            return Ok(());
        }
        if self.running {
            return Err(ReactorError::State(
                "exit called while the loop is running".to_string(),
            ));
        }
        self.teardown(force);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.exited {
            return Err(ReactorError::State("Reactor already exited".to_string()));
        }
        if !self.connected {
            return Err(ReactorError::State("Reactor not connected".to_string()));
        }
        Ok(())
    }

    fn drive<F>(&mut self, handler: &mut F) -> Result<RunOutcome>
    where
        F: FnMut(&mut Control<'_>, &[u8]),
    {
        let Reactor {
            config,
            error,
            event_loop,
            read_buffer,
            handles,
            ..
        } = self;
        let handles = handles
            .as_mut()
            .ok_or_else(|| ReactorError::State("Reactor not connected".to_string()))?;
        let exit_poll = config.exit_poll_duration();
        let mut outcome: Option<RunOutcome> = None;

        loop {
            if event_loop.fire_timer() {
                outcome.get_or_insert(RunOutcome::TimedOut);
            }
            event_loop.prepare();
            if event_loop.stop_requested() {
                break;
            }

            // Exit only marks the stream; the loop keeps draining stdout
            // until the read side reports end of stream.
            if let Some(process) = handles.process_mut() {
                if process.poll_exit() {
                    record_fault(error, StreamFault::EndOfStream);
                }
            }

            let pid = handles.process().map(ProcessHandle::pid);
            let process_alive = handles.process().is_some_and(|p| !p.has_exited());
            let readiness = {
                let (read_fd, write_fd) = handles.interest();
                if read_fd.is_none()
                    && write_fd.is_none()
                    && !event_loop.has_active_timer()
                    && !process_alive
                {
                    outcome.get_or_insert(RunOutcome::StreamClosed);
                    break;
                }
                let cap = process_alive.then_some(exit_poll);
                event_loop.wait(read_fd, write_fd, cap)?
            };

            if readiness.writable {
                if let Some(output) = handles.output() {
                    output.flush();
                }
            }

            if !readiness.readable {
                continue;
            }
            let (input, output) = handles.pipes();
            let Some(input) = input else {
                continue;
            };
            let Some(slot) = read_buffer.acquire() else {
                trace!("Read deferred, chunk still in flight");
                continue;
            };

            match input.read(slot) {
                Ok(0) => {
                    read_buffer.release();
                    input.read_stop();
                    debug!(pid = ?pid, "Child stdout closed");
                    record_fault(error, StreamFault::EndOfStream);
                    event_loop.stop();
                    outcome.get_or_insert(RunOutcome::StreamClosed);
                }
                Ok(n) => {
                    trace!(bytes = n, "Delivering chunk");
                    let mut control = Control {
                        output,
                        event_loop: &mut *event_loop,
                        error: &mut *error,
                        pid,
                    };
                    handler(&mut control, read_buffer.chunk(n));
                    read_buffer.release();
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    read_buffer.release();
                }
                Err(e) => {
                    read_buffer.release();
                    input.read_stop();
                    debug!(pid = ?pid, error = %e, "Child stdout read failed");
                    record_fault(error, StreamFault::Stream(e.to_string()));
                    event_loop.stop();
                    outcome.get_or_insert(RunOutcome::StreamClosed);
                }
            }
        }

        Ok(outcome.unwrap_or(RunOutcome::Stopped))
    }

    fn teardown(&mut self, force: bool) {
        if self.exited || !self.connected {
            return;
        }
        self.exited = true;
        self.running = false;
        self.event_loop.disarm();

        let Some(mut handles) = self.handles.take() else {
            return;
        };
        info!(pid = ?self.pid, force, "Tearing down reactor");

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Some(process) = handles.process_mut() {
            process.poll_exit();
            process.signal(signal);
        }

        while handles.has_open_pipes() {
            handles.close();
        }

        let interval = self.config.reap_interval_duration();
        if let Some(process) = handles.process_mut() {
            let escalation = if force {
                None
            } else {
                self.config.kill_escalation_delay()
            };
            process.wait_with_escalation(escalation, interval);
            self.final_status = process.exit_status();
        }
        drop(handles);

        // Reap only an uncollected child; a collected pid may have been reused
        if let (None, Some(pid)) = (self.final_status, self.pid) {
            reaper::reap_with_interval(pid, interval);
        }
        debug!(pid = ?self.pid, status = ?self.final_status, "Reactor exited");
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.teardown(false);
    }
}

fn validate_argv(argv: &[OsString]) -> Result<()> {
    let Some(program) = argv.first() else {
        return Err(ReactorError::Argument(
            "`spawn` argv must have at least one string".to_string(),
        ));
    };
    if program.is_empty() {
        return Err(ReactorError::Argument(
            "`spawn` program path is empty".to_string(),
        ));
    }
    if argv.iter().any(|arg| arg.as_bytes().contains(&0)) {
        return Err(ReactorError::Argument(
            "`spawn` argv has an entry with an interior NUL byte".to_string(),
        ));
    }
    Ok(())
}

fn issue_write(
    output: Option<&mut OutputPipe>,
    error: &mut Option<StreamFault>,
    bytes: &[u8],
) -> Result<()> {
    let Some(output) = output else {
        return Err(ReactorError::State("Child stdin is closed".to_string()));
    };
    if let Err(reason) = output.write(bytes) {
        record_fault(error, StreamFault::Write(reason.clone()));
        return Err(ReactorError::Write(reason));
    }
    Ok(())
}

/// First error wins
fn record_fault(slot: &mut Option<StreamFault>, fault: StreamFault) {
    if slot.is_none() {
        debug!(fault = %fault, "Recorded stream fault");
        *slot = Some(fault);
    }
}
