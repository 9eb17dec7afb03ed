use tracing::trace;

use crate::buffer::{BufferError, DynBuf};

/// The log served by `/api/log`, keeping at most `capacity` of the newest bytes.
///
/// A capacity of zero disables logging altogether.
#[derive(Debug, Default)]
pub struct LogBuffer {
    buf: DynBuf,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { buf: DynBuf::new(), capacity }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Appends `message`, dropping the oldest bytes once the capacity is exceeded.
    ///
    /// When trimming would not leave room, the whole buffer is discarded and only
    /// the newest `capacity` bytes of `message` are kept.
    pub fn push(&mut self, message: &[u8]) -> Result<(), BufferError> {
        if !self.is_enabled() || message.is_empty() {
            return Ok(());
        }

        let max = self.capacity;
        let total = self.buf.len() + message.len();
        if total > max {
            let to_remove = total - max;
            if to_remove <= max && message.len() < max {
                trace!(to_remove, "trimming oldest log bytes");
                self.buf.remove_prefix(to_remove)?;
            } else {
                trace!(discarded = self.buf.len(), "discarding log");
                self.buf.free();
            }
        }

        let offset = message.len().saturating_sub(max);
        self.buf.append(&message[offset..])
    }

    /// Moves the log out, leaving it empty.
    pub fn take(&mut self) -> Option<Box<[u8]>> {
        self.buf.take()
    }

    pub fn clear(&mut self) {
        self.buf.free();
    }
}
