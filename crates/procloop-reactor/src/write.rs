//! Pending writes to the child's stdin

use std::collections::VecDeque;
use std::io::{self, Write};

/// One in-flight send: an owned copy of the caller's bytes.
///
/// The copy lives until [`PendingWrite::complete`] consumes it, whatever the
/// outcome.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    id: u64,
    data: Box<[u8]>,
    offset: usize,
}

impl PendingWrite {
    fn new(id: u64, bytes: &[u8]) -> Self {
        Self {
            id,
            data: bytes.into(),
            offset: 0,
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Completion: release the copy. Failures are logged, never raised.
    fn complete(self, status: io::Result<()>) {
        match status {
            Ok(()) => tracing::trace!(write = self.id, bytes = self.data.len(), "Write complete"),
            Err(e) => tracing::debug!(
                write = self.id,
                written = self.offset,
                bytes = self.data.len(),
                error = %e,
                "Write failed"
            ),
        }
    }
}

/// FIFO of pending writes, flushed to a non-blocking stream
#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    pending: VecDeque<PendingWrite>,
    next_id: u64,
}

impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Copy `bytes` into a new pending write
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(PendingWrite::new(id, bytes));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Write as much as the stream accepts without blocking.
    ///
    /// On a hard error every pending write completes with that error and the
    /// error is returned.
    pub(crate) fn flush<W: Write>(&mut self, stream: &mut W) -> io::Result<()> {
        while let Some(front) = self.pending.front_mut() {
            if front.is_done() {
                if let Some(done) = self.pending.pop_front() {
                    done.complete(Ok(()));
                }
                continue;
            }
            match stream.write(front.remaining()) {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "pipe accepted no bytes");
                    self.fail_all(&err);
                    return Err(err);
                }
                Ok(n) => front.offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.fail_all(&e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Complete every pending write with a failure mirroring `err`
    pub(crate) fn fail_all(&mut self, err: &io::Error) {
        for write in self.pending.drain(..) {
            write.complete(Err(io::Error::new(err.kind(), err.to_string())));
        }
    }

    /// Drop every pending write as cancelled
    pub(crate) fn cancel_all(&mut self) {
        let err = io::Error::new(io::ErrorKind::Interrupted, "write cancelled");
        self.fail_all(&err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that accepts at most `budget` bytes, then reports WouldBlock
    struct ThrottledSink {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl Write for ThrottledSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_copy_outlives_caller_buffer() {
        let mut queue = WriteQueue::new();
        {
            let caller = b"ping".to_vec();
            queue.push(&caller);
        }
        let mut sink = ThrottledSink {
            accepted: Vec::new(),
            budget: usize::MAX,
        };
        queue.flush(&mut sink).unwrap();
        assert_eq!(sink.accepted, b"ping");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_flush_preserves_order() {
        let mut queue = WriteQueue::new();
        queue.push(b"hello ");
        queue.push(b"world");

        let mut sink = ThrottledSink {
            accepted: Vec::new(),
            budget: 8,
        };
        queue.flush(&mut sink).unwrap();
        assert_eq!(sink.accepted, b"hello wo");
        assert_eq!(queue.len(), 1);

        sink.budget = 100;
        queue.flush(&mut sink).unwrap();
        assert_eq!(sink.accepted, b"hello world");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_hard_error_releases_everything() {
        let mut queue = WriteQueue::new();
        queue.push(b"a");
        queue.push(b"b");

        let err = queue.flush(&mut BrokenSink).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let mut queue = WriteQueue::new();
        queue.push(b"abc");
        queue.cancel_all();
        assert!(queue.is_empty());
    }
}
