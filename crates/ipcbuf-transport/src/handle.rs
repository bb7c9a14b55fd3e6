//! Transferable resource handles.
//!
//! A [`Handle`] is an owned OS resource that can ride along with payload
//! bytes to the peer process. Dropping it closes the local copy.
//!
//! Only Unix streams can carry a handle ([`IpcStream`](crate::IpcStream));
//! on Windows the type exists so buffers and queues still build, but every
//! provided transport rejects it.

#[cfg(unix)]
pub type Handle = std::os::fd::OwnedFd;

#[cfg(windows)]
pub type Handle = std::os::windows::io::OwnedHandle;
