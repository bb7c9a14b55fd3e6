//! Connected stream transports for IPC output queues.
//!
//! Provides the transmit side consumed by `ipcbuf-queue`:
//! - The [`Transport`] trait: one non-blocking, scatter-gather send attempt
//! - Unix domain socket pairs with descriptor passing (`SCM_RIGHTS`)
//!
//! This is the lowest layer of ipcbuf. Nothing here buffers or retries;
//! callers decide when a stream is writable.

pub mod error;
pub mod handle;
pub mod traits;

#[cfg(unix)]
mod scm;
#[cfg(unix)]
pub mod stream;

pub use error::{Result, TransportError};
pub use handle::Handle;
pub use traits::{Transport, WriteTransport};

#[cfg(unix)]
pub use stream::IpcStream;
