use ipcbuf_transport::TransportError;

use crate::buffer::Buffer;

/// Errors returned by [`Buffer`] and [`OutputQueue`](crate::OutputQueue) operations.
///
/// A failed operation never leaves partial effects behind: no partial
/// growth, no partial drain.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Nonsensical configuration (zero ceiling, `initial > max`, zero-size fixed buffer).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A size computation would wrap `usize` or exceed the buffer's ceiling.
    #[error("buffer overflow: {len} written + {requested} requested exceeds max {max}")]
    Overflow {
        len: usize,
        requested: usize,
        max: usize,
    },

    /// A fixed-size buffer has no room left for the request.
    #[error("buffer full: {len} written + {requested} requested exceeds capacity {capacity}")]
    Capacity {
        len: usize,
        requested: usize,
        capacity: usize,
    },

    /// The operation is not legal in the buffer's current lifecycle state.
    #[error("invalid state: {0}")]
    State(&'static str),

    /// A seek or drain referenced bytes outside the valid range.
    #[error("range {offset}+{len} outside {available} available bytes")]
    Range {
        offset: usize,
        len: usize,
        available: usize,
    },

    /// The transport failed hard (not would-block).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A buffer rejected by [`OutputQueue::enqueue`](crate::OutputQueue::enqueue).
///
/// Carries the buffer back to the caller untouched.
#[derive(Debug, thiserror::Error)]
#[error("cannot enqueue: {reason}")]
pub struct EnqueueError {
    reason: &'static str,
    buffer: Buffer,
}

impl EnqueueError {
    pub(crate) fn new(reason: &'static str, buffer: Buffer) -> Self {
        Self { reason, buffer }
    }

    /// Why the buffer was rejected.
    pub fn reason(&self) -> &'static str {
        self.reason
    }

    /// Recover the rejected buffer.
    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

impl From<EnqueueError> for QueueError {
    fn from(err: EnqueueError) -> Self {
        QueueError::State(err.reason)
    }
}
