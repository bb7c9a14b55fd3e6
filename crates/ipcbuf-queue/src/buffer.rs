use bytes::{Bytes, BytesMut};
use ipcbuf_transport::Handle;
use tracing::debug;

use crate::error::{QueueError, Result};

enum Storage {
    Building(BytesMut),
    Finalized(Bytes),
}

/// One outbound message under construction.
///
/// A buffer is either fixed (capacity chosen up front) or growable up to a
/// ceiling. Bytes are appended at a monotonically advancing write cursor;
/// already-written bytes can be patched through [`seek`](Self::seek) until
/// the buffer is [finalized](Self::finalize). At most one [`Handle`] can be
/// attached; it travels with the first transmitted byte of this message.
///
/// Views returned by `reserve`/`seek` borrow the buffer mutably, so none can
/// outlive a later call that might relocate storage.
pub struct Buffer {
    storage: Storage,
    /// Allocated length; `len() <= capacity <= max`.
    capacity: usize,
    max: usize,
    growable: bool,
    handle: Option<Handle>,
}

impl Buffer {
    /// Allocate a fixed buffer of exactly `size` bytes.
    pub fn allocate(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(QueueError::InvalidArgument("fixed buffer size must be nonzero"));
        }
        Ok(Self::with_limits(size, size, false))
    }

    /// Allocate a growable buffer starting at `initial` bytes, never exceeding `max`.
    pub fn allocate_growable(initial: usize, max: usize) -> Result<Self> {
        if max == 0 {
            return Err(QueueError::InvalidArgument("growth ceiling must be nonzero"));
        }
        if initial > max {
            return Err(QueueError::InvalidArgument(
                "initial capacity exceeds growth ceiling",
            ));
        }
        Ok(Self::with_limits(initial, max, true))
    }

    fn with_limits(capacity: usize, max: usize, growable: bool) -> Self {
        Self {
            storage: Storage::Building(BytesMut::with_capacity(capacity)),
            capacity,
            max,
            growable,
            handle: None,
        }
    }

    /// Reserve `len` more bytes and return them (zeroed) for writing.
    ///
    /// The write cursor advances past the reserved region immediately.
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        if self.is_finalized() {
            return Err(QueueError::State("cannot write to a finalized buffer"));
        }

        let written = self.len();
        let total = written.checked_add(len).ok_or(QueueError::Overflow {
            len: written,
            requested: len,
            max: self.max,
        })?;
        self.ensure_capacity(written, len, total)?;

        let data = self.building_mut()?;
        data.resize(total, 0);
        Ok(&mut data[written..])
    }

    /// The only place storage grows. Leaves the buffer untouched on error.
    fn ensure_capacity(&mut self, written: usize, requested: usize, total: usize) -> Result<()> {
        if total <= self.capacity {
            return Ok(());
        }
        if !self.growable {
            return Err(QueueError::Capacity {
                len: written,
                requested,
                capacity: self.capacity,
            });
        }
        if total > self.max {
            return Err(QueueError::Overflow {
                len: written,
                requested,
                max: self.max,
            });
        }

        let new_capacity = self.capacity.saturating_mul(2).clamp(total, self.max);
        debug!(from = self.capacity, to = new_capacity, max = self.max, "growing buffer");
        let data = self.building_mut()?;
        data.reserve(new_capacity - written);
        self.capacity = new_capacity;
        Ok(())
    }

    /// Append `bytes` at the write cursor.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Append one byte.
    pub fn append_u8(&mut self, value: u8) -> Result<()> {
        self.append(&[value])
    }

    /// Append a `u16` in network byte order.
    pub fn append_u16(&mut self, value: u16) -> Result<()> {
        self.append(&value.to_be_bytes())
    }

    /// Append a `u32` in network byte order.
    pub fn append_u32(&mut self, value: u32) -> Result<()> {
        self.append(&value.to_be_bytes())
    }

    /// Append a `u64` in network byte order.
    pub fn append_u64(&mut self, value: u64) -> Result<()> {
        self.append(&value.to_be_bytes())
    }

    /// Mutable view of the already-written range `[offset, offset + len)`.
    ///
    /// A finalized buffer is read-only and yields [`QueueError::State`];
    /// a range outside the written bytes yields [`QueueError::Range`].
    pub fn seek(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        if self.is_finalized() {
            return Err(QueueError::State("cannot patch a finalized buffer"));
        }

        let available = self.len();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= available)
            .ok_or(QueueError::Range {
                offset,
                len,
                available,
            })?;

        let data = self.building_mut()?;
        Ok(&mut data[offset..end])
    }

    /// Overwrite already-written bytes starting at `offset`.
    ///
    /// Typical use is filling in a length header once the payload is known.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.seek(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Attach the message's transferable handle.
    ///
    /// On failure the rejected handle is dropped, closing it.
    pub fn attach_handle(&mut self, handle: Handle) -> Result<()> {
        if self.is_finalized() {
            return Err(QueueError::State("cannot attach a handle to a finalized buffer"));
        }
        if self.handle.is_some() {
            return Err(QueueError::State("buffer already carries a handle"));
        }
        self.handle = Some(handle);
        Ok(())
    }

    /// Freeze the contents; the buffer becomes read-only and may be queued.
    pub fn finalize(&mut self) -> Result<()> {
        match &mut self.storage {
            Storage::Building(data) => {
                let frozen = std::mem::take(data).freeze();
                self.storage = Storage::Finalized(frozen);
                Ok(())
            }
            Storage::Finalized(_) => Err(QueueError::State("buffer already finalized")),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Building(data) => data.len(),
            Storage::Finalized(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Currently allocated length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Growth ceiling (equal to `capacity` for fixed buffers).
    pub fn max(&self) -> usize {
        self.max
    }

    /// Bytes that can still be written before hitting the ceiling.
    pub fn left(&self) -> usize {
        if self.is_finalized() {
            return 0;
        }
        self.max - self.len()
    }

    pub fn is_growable(&self) -> bool {
        self.growable
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.storage, Storage::Finalized(_))
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Written contents.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Building(data) => data,
            Storage::Finalized(data) => data,
        }
    }

    pub(crate) fn into_parts(self) -> (Bytes, Option<Handle>) {
        let data = match self.storage {
            Storage::Building(data) => data.freeze(),
            Storage::Finalized(data) => data,
        };
        (data, self.handle)
    }

    fn building_mut(&mut self) -> Result<&mut BytesMut> {
        match &mut self.storage {
            Storage::Building(data) => Ok(data),
            Storage::Finalized(_) => Err(QueueError::State("buffer is finalized")),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("max", &self.max)
            .field("growable", &self.growable)
            .field("finalized", &self.is_finalized())
            .field("handle", &self.handle)
            .finish()
    }
}
