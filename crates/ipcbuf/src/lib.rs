//! Overflow-safe message buffers and non-blocking queued output for local IPC.
//!
//! ipcbuf lets cooperating processes (a privileged daemon and its helper,
//! say) assemble outbound messages incrementally, attach one transferable
//! descriptor per message, and drain a FIFO of such messages to a connected
//! socket without ever blocking on a slow reader.
//!
//! # Crate Structure
//!
//! - [`transport`] — Connected streams, descriptor passing, the `Transport` trait
//! - [`queue`] — `Buffer` assembly and the per-endpoint `OutputQueue`
//!
//! # Example
//!
//! ```no_run
//! use ipcbuf::queue::{Buffer, OutputQueue};
//! use ipcbuf::transport::IpcStream;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut stream, _peer) = IpcStream::pair()?;
//! stream.set_nonblocking(true)?;
//!
//! let mut msg = Buffer::allocate_growable(64, 16 * 1024)?;
//! msg.append_u32(0)?; // length, patched below
//! msg.append(b"hello")?;
//! let len = msg.len() as u32;
//! msg.write_at(0, &len.to_be_bytes())?;
//! msg.finalize()?;
//!
//! let mut queue = OutputQueue::new();
//! queue.enqueue(msg)?;
//! // Call again whenever the event loop reports the stream writable.
//! queue.flush(&mut stream)?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use ipcbuf_transport::*;
}

/// Re-export buffer and queue types.
pub mod queue {
    pub use ipcbuf_queue::*;
}
