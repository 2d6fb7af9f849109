//! Single scratch buffer shared by every read of a reactor
//!
//! At most one chunk is in flight: while a chunk is being delivered to the
//! handler, `acquire` reports no space and the read is deferred until the
//! chunk is released. This is the only backpressure in the reactor.

/// Fixed-capacity read buffer with a re-entrancy guard
#[derive(Debug)]
pub(crate) struct ReadBuffer {
    data: Box<[u8]>,
    reading: bool,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            reading: false,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Hand out the whole buffer, or `None` while a chunk is outstanding
    pub(crate) fn acquire(&mut self) -> Option<&mut [u8]> {
        if self.reading {
            return None;
        }
        self.reading = true;
        Some(&mut self.data)
    }

    /// View of the first `len` bytes of the outstanding chunk
    pub(crate) fn chunk(&self, len: usize) -> &[u8] {
        &self.data[..len.min(self.data.len())]
    }

    pub(crate) fn release(&mut self) {
        self.reading = false;
    }
}
