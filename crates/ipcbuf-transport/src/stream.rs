use std::io::{IoSlice, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::Result;
use crate::handle::Handle;
use crate::traits::Transport;

/// A connected Unix domain socket stream: `Read`, `Write` and [`Transport`].
///
/// Sends go through `sendmsg(2)` with `MSG_DONTWAIT`, so [`Transport`] use
/// never blocks regardless of the descriptor's blocking mode.
#[derive(Debug)]
pub struct IpcStream {
    inner: UnixStream,
}

impl IpcStream {
    /// Create a connected, unnamed pair of streams.
    ///
    /// Typical use is a privileged parent and the helper it spawns.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from(a), Self::from(b)))
    }

    /// Receive bytes into `buf`, plus at most one handle passed by the peer.
    ///
    /// Returns `(0, None)` at end of stream.
    pub fn recv_with_handle(&self, buf: &mut [u8]) -> Result<(usize, Option<Handle>)> {
        crate::scm::recv_with_handle(self.as_fd(), buf).map_err(Into::into)
    }

    /// Switch the underlying stream in or out of non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.inner.set_nonblocking(nonblocking).map_err(Into::into)
    }
}

impl From<UnixStream> for IpcStream {
    fn from(inner: UnixStream) -> Self {
        Self { inner }
    }
}

/// Hand the stream itself to a peer as a [`Handle`].
impl From<IpcStream> for OwnedFd {
    fn from(stream: IpcStream) -> Self {
        stream.inner.into()
    }
}

impl Transport for IpcStream {
    fn send_vectored(
        &mut self,
        bufs: &[IoSlice<'_>],
        handle: Option<&Handle>,
    ) -> std::io::Result<usize> {
        crate::scm::send_with_handle(self.as_fd(), bufs, handle.map(|h| h.as_fd()))
    }
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
        self.inner.write_vectored(bufs)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl AsFd for IpcStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
