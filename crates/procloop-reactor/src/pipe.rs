//! Non-blocking pipe ends connected to the child

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::process::{ChildStdin, ChildStdout};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::write::WriteQueue;

fn set_nonblocking<F: AsRawFd>(fd: &F) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

/// Read end of the child's stdout
#[derive(Debug)]
pub(crate) struct InputPipe {
    stream: ChildStdout,
    reading: bool,
    #[cfg(test)]
    injected: Option<io::Error>,
}

impl InputPipe {
    pub(crate) fn open(stream: ChildStdout) -> io::Result<Self> {
        set_nonblocking(&stream)?;
        Ok(Self {
            stream,
            reading: false,
            #[cfg(test)]
            injected: None,
        })
    }

    /// Start active consumption; readiness is only watched while reading
    pub(crate) fn read_start(&mut self) {
        self.reading = true;
    }

    pub(crate) fn read_stop(&mut self) {
        self.reading = false;
    }

    pub(crate) fn is_reading(&self) -> bool {
        self.reading
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(test)]
        if let Some(err) = self.injected.take() {
            return Err(err);
        }
        self.stream.read(buf)
    }

    /// Make the next read fail with `err`
    #[cfg(test)]
    pub(crate) fn inject_read_error(&mut self, err: io::Error) {
        self.injected = Some(err);
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Write end of the child's stdin together with its pending writes
#[derive(Debug)]
pub(crate) struct OutputPipe {
    stream: ChildStdin,
    queue: WriteQueue,
    broken: Option<String>,
}

impl OutputPipe {
    pub(crate) fn open(stream: ChildStdin) -> io::Result<Self> {
        set_nonblocking(&stream)?;
        Ok(Self {
            stream,
            queue: WriteQueue::new(),
            broken: None,
        })
    }

    /// Queue a copy of `bytes` and write what the pipe accepts right away.
    ///
    /// Fails only when the write cannot be issued: the pipe already broke on
    /// an earlier write. Failures of this write itself are reported by the
    /// next call.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<(), String> {
        if let Some(reason) = &self.broken {
            return Err(reason.clone());
        }
        self.queue.push(bytes);
        self.flush();
        Ok(())
    }

    /// Flush pending writes; a hard error marks the pipe broken
    pub(crate) fn flush(&mut self) {
        if self.broken.is_some() {
            return;
        }
        if let Err(e) = self.queue.flush(&mut self.stream) {
            tracing::debug!(error = %e, "Child stdin broken");
            self.broken = Some(e.to_string());
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    pub(crate) fn cancel_pending(&mut self) {
        self.queue.cancel_all();
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
