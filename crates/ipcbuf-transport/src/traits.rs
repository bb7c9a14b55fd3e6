use std::io::{ErrorKind, IoSlice, Write};

use crate::handle::Handle;

/// A connected stream that accepts one non-blocking send attempt at a time.
///
/// Implementations must never block: when nothing can be accepted right now
/// they return an error of kind [`ErrorKind::WouldBlock`]. The optional
/// `handle` is borrowed; if any byte is accepted the transport has delivered
/// a duplicate of it to the peer, and closing the local copy is the caller's
/// responsibility.
pub trait Transport {
    /// Attempt to send `bufs` in order, returning the number of bytes accepted.
    fn send_vectored(
        &mut self,
        bufs: &[IoSlice<'_>],
        handle: Option<&Handle>,
    ) -> std::io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_vectored(
        &mut self,
        bufs: &[IoSlice<'_>],
        handle: Option<&Handle>,
    ) -> std::io::Result<usize> {
        (**self).send_vectored(bufs, handle)
    }
}

/// Adapts any [`Write`] sink into a [`Transport`] without handle support.
///
/// Whether the send blocks depends on the wrapped writer.
#[derive(Debug)]
pub struct WriteTransport<W> {
    inner: W,
}

impl<W: Write> WriteTransport<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Borrow the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutably borrow the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the adapter and return the writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Transport for WriteTransport<W> {
    fn send_vectored(
        &mut self,
        bufs: &[IoSlice<'_>],
        handle: Option<&Handle>,
    ) -> std::io::Result<usize> {
        if handle.is_some() {
            return Err(std::io::Error::new(
                ErrorKind::Unsupported,
                "writer cannot carry a transferable handle",
            ));
        }
        self.inner.write_vectored(bufs)
    }
}
