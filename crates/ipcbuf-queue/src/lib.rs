//! Message buffers and queued, non-blocking output for framed IPC.
//!
//! A producer assembles one outbound message in a [`Buffer`], optionally
//! attaches a single transferable [`Handle`](ipcbuf_transport::Handle),
//! finalizes it and hands it to the endpoint's [`OutputQueue`]. The queue's
//! [`flush`](OutputQueue::flush) makes one non-blocking send attempt that may
//! coalesce several messages, then discards exactly the bytes the transport
//! accepted.
//!
//! Nothing here blocks or schedules: call `flush` when the transport is
//! writable, and read [`queued_bytes`](OutputQueue::queued_bytes) for
//! backpressure.

pub mod buffer;
pub mod config;
pub mod error;
pub mod queue;

pub use buffer::Buffer;
pub use config::{QueueConfig, DEFAULT_MAX_BATCH};
pub use error::{EnqueueError, QueueError, Result};
pub use queue::OutputQueue;
