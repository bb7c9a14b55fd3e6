use std::collections::VecDeque;
use std::io::{ErrorKind, IoSlice};

use bytes::Bytes;
use ipcbuf_transport::{Handle, Transport, TransportError};
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::config::QueueConfig;
use crate::error::{EnqueueError, Result};

/// A finalized message waiting for transmission.
struct Entry {
    data: Bytes,
    /// Bytes of `data` already accepted by the transport.
    sent: usize,
    /// Cleared (closing the local copy) once any payload byte is sent.
    handle: Option<Handle>,
}

impl Entry {
    fn remaining(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    fn remaining_len(&self) -> usize {
        self.data.len() - self.sent
    }
}

/// FIFO of finalized [`Buffer`]s for one transport endpoint.
///
/// Owned by the connection object and driven by whichever task owns that
/// connection. [`flush`](Self::flush) performs exactly one non-blocking send
/// attempt; re-arming writability interest and retrying belongs to the
/// caller's event loop.
pub struct OutputQueue {
    entries: VecDeque<Entry>,
    queued_bytes: usize,
    config: QueueConfig,
}

impl OutputQueue {
    /// Create an empty queue with default configuration.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create an empty queue with explicit configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            queued_bytes: 0,
            config,
        }
    }

    /// Take ownership of a finalized buffer and append it to the tail.
    ///
    /// A rejected buffer is handed back inside the error.
    pub fn enqueue(&mut self, buffer: Buffer) -> std::result::Result<(), EnqueueError> {
        if !buffer.is_finalized() {
            return Err(EnqueueError::new("buffer is not finalized", buffer));
        }
        if buffer.is_empty() {
            return Err(EnqueueError::new("buffer has no payload to send", buffer));
        }

        let (data, handle) = buffer.into_parts();
        self.queued_bytes += data.len();
        trace!(
            len = data.len(),
            handle = handle.is_some(),
            queued_count = self.entries.len() + 1,
            queued_bytes = self.queued_bytes,
            "enqueued buffer"
        );
        self.entries.push_back(Entry {
            data,
            sent: 0,
            handle,
        });
        Ok(())
    }

    /// Make one non-blocking attempt to send pending bytes through `transport`.
    ///
    /// Consecutive messages are coalesced into one vectored send, bounded by
    /// [`QueueConfig::max_batch`]. A message carrying a handle always starts a
    /// new batch, and its handle is offered only with that batch, so the peer
    /// receives it with the first byte of its own payload.
    ///
    /// Returns the number of bytes accepted, which are drained from the
    /// queue. Would-block returns `Ok(0)`. A hard transport failure returns
    /// [`QueueError::Transport`](crate::QueueError::Transport) and leaves the queue untouched.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<usize> {
        if self.queued_bytes == 0 {
            return Ok(0);
        }

        let max_batch = self.config.max_batch.max(1);
        let mut slices = Vec::with_capacity(self.entries.len().min(max_batch));
        let mut handle = None;
        for entry in &self.entries {
            if slices.len() == max_batch {
                break;
            }
            if entry.handle.is_some() {
                if !slices.is_empty() {
                    break;
                }
                handle = entry.handle.as_ref();
            }
            slices.push(IoSlice::new(entry.remaining()));
        }
        let offered: usize = slices.iter().map(|s| s.len()).sum();
        let with_handle = handle.is_some();

        let accepted = loop {
            match transport.send_vectored(&slices, handle) {
                Ok(0) => {
                    debug!(offered, "transport accepted nothing; peer closed");
                    return Err(TransportError::Shutdown.into());
                }
                Ok(n) if n > offered => {
                    return Err(TransportError::Io(std::io::Error::new(
                        ErrorKind::InvalidData,
                        format!("transport reported {n} bytes sent of {offered} offered"),
                    ))
                    .into());
                }
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    trace!(offered, batch = slices.len(), "flush would block");
                    return Ok(0);
                }
                Err(err) => return Err(TransportError::Io(err).into()),
            }
        };

        trace!(
            accepted,
            offered,
            batch = slices.len(),
            handle = with_handle,
            "flushed"
        );
        self.drain(accepted);
        Ok(accepted)
    }

    /// Discard `n` bytes from the front, crossing message boundaries.
    ///
    /// Fully consumed messages are removed. A message loses its handle (the
    /// local copy is closed) as soon as any of its bytes are drained, since
    /// the handle travels with the first byte. Asking for more than
    /// [`queued_bytes`](Self::queued_bytes) empties the queue. Returns the
    /// number of bytes actually discarded.
    pub fn drain(&mut self, n: usize) -> usize {
        let n = n.min(self.queued_bytes);
        let mut left = n;
        while let Some(head) = self.entries.front_mut() {
            let remaining = head.remaining_len();
            if left < remaining {
                if left > 0 {
                    head.sent += left;
                    head.handle = None;
                    self.queued_bytes -= left;
                }
                break;
            }
            left -= remaining;
            self.queued_bytes -= remaining;
            self.entries.pop_front();
        }
        n
    }

    /// Number of messages with unsent bytes remaining.
    pub fn queued_count(&self) -> usize {
        self.entries.len()
    }

    /// Unsent bytes across all messages.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Drop every queued message, closing any handles that were never sent.
    pub fn teardown(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let handles = self.entries.iter().filter(|e| e.handle.is_some()).count();
        debug!(
            entries = self.entries.len(),
            bytes = self.queued_bytes,
            handles,
            "tearing down output queue"
        );
        self.entries.clear();
        self.queued_bytes = 0;
    }
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OutputQueue {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for OutputQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputQueue")
            .field("queued_count", &self.queued_count())
            .field("queued_bytes", &self.queued_bytes)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::buffer::tests::test_handle;
    use crate::error::QueueError;

    enum Step {
        Accept(usize),
        WouldBlock,
        Interrupted,
        Fail,
        Overreport,
    }

    /// Scripted transport: each call consumes one step (default: accept all).
    #[derive(Default)]
    struct MockTransport {
        script: VecDeque<Step>,
        wire: Vec<u8>,
        /// `(slice count, handle offered)` per call.
        calls: Vec<(usize, bool)>,
        handles_sent: usize,
    }

    impl MockTransport {
        fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                script: steps.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn send_vectored(
            &mut self,
            bufs: &[IoSlice<'_>],
            handle: Option<&Handle>,
        ) -> io::Result<usize> {
            self.calls.push((bufs.len(), handle.is_some()));
            let offered: usize = bufs.iter().map(|b| b.len()).sum();
            let limit = match self.script.pop_front().unwrap_or(Step::Accept(usize::MAX)) {
                Step::Accept(limit) => limit.min(offered),
                Step::WouldBlock => return Err(io::Error::from(ErrorKind::WouldBlock)),
                Step::Interrupted => return Err(io::Error::from(ErrorKind::Interrupted)),
                Step::Fail => return Err(io::Error::from(ErrorKind::BrokenPipe)),
                Step::Overreport => return Ok(offered + 1),
            };

            let mut left = limit;
            for buf in bufs {
                let take = left.min(buf.len());
                self.wire.extend_from_slice(&buf[..take]);
                left -= take;
            }
            if limit > 0 && handle.is_some() {
                self.handles_sent += 1;
            }
            Ok(limit)
        }
    }

    fn finalized(bytes: &[u8]) -> Buffer {
        let mut buf = Buffer::allocate_growable(bytes.len(), bytes.len().max(1)).unwrap();
        buf.append(bytes).unwrap();
        buf.finalize().unwrap();
        buf
    }

    fn with_handle(bytes: &[u8]) -> Buffer {
        let mut buf = Buffer::allocate(bytes.len()).unwrap();
        buf.append(bytes).unwrap();
        buf.attach_handle(test_handle()).unwrap();
        buf.finalize().unwrap();
        buf
    }

    #[test]
    fn enqueue_rejects_unfinalized_buffer_and_returns_it() {
        let mut queue = OutputQueue::new();
        let mut buf = Buffer::allocate(4).unwrap();
        buf.append(b"test").unwrap();

        let err = queue.enqueue(buf).unwrap_err();
        assert!(queue.is_empty());
        assert_eq!(queue.queued_bytes(), 0);

        let mut buf = err.into_buffer();
        assert!(!buf.is_finalized());
        assert_eq!(buf.as_bytes(), b"test");
        buf.finalize().unwrap();
        queue.enqueue(buf).unwrap();
        assert_eq!(queue.queued_count(), 1);
    }

    #[test]
    fn enqueue_error_converts_to_state_error() {
        let mut queue = OutputQueue::new();
        let err: QueueError = queue.enqueue(Buffer::allocate(1).unwrap()).unwrap_err().into();
        assert!(matches!(err, QueueError::State(_)));
    }

    #[test]
    fn enqueue_then_drain_byte_by_byte_accounting() {
        let mut queue = OutputQueue::new();
        let mut buf = Buffer::allocate(4).unwrap();
        buf.append(b"test").unwrap();
        buf.finalize().unwrap();

        queue.enqueue(buf).unwrap();
        assert_eq!(queue.queued_count(), 1);
        assert_eq!(queue.queued_bytes(), 4);

        queue.drain(1);
        assert_eq!(queue.queued_count(), 1);
        assert_eq!(queue.queued_bytes(), 3);

        queue.drain(3);
        assert_eq!(queue.queued_count(), 0);
        assert_eq!(queue.queued_bytes(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_past_remaining_empties_the_queue() {
        let mut queue = OutputQueue::new();
        let mut buf = Buffer::allocate(4).unwrap();
        buf.append(b"test").unwrap();
        buf.finalize().unwrap();
        queue.enqueue(buf).unwrap();

        assert_eq!(queue.drain(1), 1);
        assert_eq!(queue.queued_count(), 1);

        assert_eq!(queue.drain(4), 3);
        assert_eq!(queue.queued_count(), 0);
        assert_eq!(queue.queued_bytes(), 0);
        assert_eq!(queue.drain(usize::MAX), 0);
    }

    #[test]
    fn drain_everything_across_several_entries() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"abc")).unwrap();
        queue.enqueue(with_handle(b"defg")).unwrap();

        assert_eq!(queue.drain(100), 7);
        assert!(queue.is_empty());
        assert_eq!(queue.queued_bytes(), 0);
    }

    #[test]
    fn drain_crosses_entry_boundaries() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"AAAAA")).unwrap();
        queue.enqueue(finalized(b"BBBBB")).unwrap();

        queue.drain(7);
        assert_eq!(queue.queued_count(), 1);
        assert_eq!(queue.queued_bytes(), 3);
        assert_eq!(queue.entries[0].sent, 2);
        assert_eq!(queue.entries[0].remaining(), b"BBB");
    }

    #[test]
    fn drain_exactly_one_entry_removes_it() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"12")).unwrap();
        queue.enqueue(finalized(b"345")).unwrap();

        queue.drain(2);
        assert_eq!(queue.queued_count(), 1);
        assert_eq!(queue.entries[0].sent, 0);
    }

    #[test]
    fn partial_flush_resumes_with_remaining_bytes() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"AAAAA")).unwrap();
        queue.enqueue(finalized(b"BBBBB")).unwrap();
        let mut transport = MockTransport::scripted([Step::Accept(7)]);

        assert_eq!(queue.flush(&mut transport).unwrap(), 7);
        assert_eq!(queue.queued_count(), 1);
        assert_eq!(queue.entries[0].sent, 2);
        assert_eq!(transport.wire, b"AAAAABB");

        assert_eq!(queue.flush(&mut transport).unwrap(), 3);
        assert!(queue.is_empty());
        assert_eq!(transport.wire, b"AAAAABBBBB");
        assert_eq!(transport.calls, vec![(2, false), (1, false)]);
    }

    #[test]
    fn would_block_is_not_an_error() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"data")).unwrap();
        let mut transport = MockTransport::scripted([Step::WouldBlock]);

        assert_eq!(queue.flush(&mut transport).unwrap(), 0);
        assert_eq!(queue.queued_bytes(), 4);

        assert_eq!(queue.flush(&mut transport).unwrap(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn interrupted_send_is_retried_within_one_flush() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"data")).unwrap();
        let mut transport = MockTransport::scripted([Step::Interrupted]);

        assert_eq!(queue.flush(&mut transport).unwrap(), 4);
        assert_eq!(transport.calls.len(), 2);
    }

    #[test]
    fn hard_failure_leaves_queue_untouched() {
        let mut queue = OutputQueue::new();
        queue.enqueue(with_handle(b"first")).unwrap();
        queue.enqueue(finalized(b"second")).unwrap();
        let mut transport = MockTransport::scripted([Step::Fail]);

        let err = queue.flush(&mut transport).unwrap_err();
        assert!(matches!(err, QueueError::Transport(TransportError::Io(_))));
        assert_eq!(queue.queued_count(), 2);
        assert_eq!(queue.queued_bytes(), 11);
        assert!(queue.entries[0].handle.is_some());
    }

    #[test]
    fn zero_bytes_accepted_means_peer_closed() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"data")).unwrap();
        let mut transport = MockTransport::scripted([Step::Accept(0)]);

        let err = queue.flush(&mut transport).unwrap_err();
        assert!(matches!(err, QueueError::Transport(TransportError::Shutdown)));
        assert_eq!(queue.queued_bytes(), 4);
    }

    #[test]
    fn overreporting_transport_is_rejected() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"data")).unwrap();
        let mut transport = MockTransport::scripted([Step::Overreport]);

        assert!(matches!(
            queue.flush(&mut transport),
            Err(QueueError::Transport(_))
        ));
        assert_eq!(queue.queued_bytes(), 4);
    }

    #[test]
    fn handle_is_sent_exactly_once_with_first_byte() {
        let mut queue = OutputQueue::new();
        queue.enqueue(with_handle(b"hello")).unwrap();
        let mut transport = MockTransport::scripted([Step::Accept(2)]);

        assert_eq!(queue.flush(&mut transport).unwrap(), 2);
        assert!(queue.entries[0].handle.is_none());

        assert_eq!(queue.flush(&mut transport).unwrap(), 3);
        assert_eq!(transport.calls, vec![(1, true), (1, false)]);
        assert_eq!(transport.handles_sent, 1);
        assert_eq!(transport.wire, b"hello");
    }

    #[test]
    fn handle_survives_would_block() {
        let mut queue = OutputQueue::new();
        queue.enqueue(with_handle(b"x")).unwrap();
        let mut transport = MockTransport::scripted([Step::WouldBlock]);

        assert_eq!(queue.flush(&mut transport).unwrap(), 0);
        assert!(queue.entries[0].handle.is_some());

        assert_eq!(queue.flush(&mut transport).unwrap(), 1);
        assert_eq!(transport.calls, vec![(1, true), (1, true)]);
        assert_eq!(transport.handles_sent, 1);
    }

    #[test]
    fn handle_entry_starts_its_own_batch() {
        let mut queue = OutputQueue::new();
        queue.enqueue(finalized(b"plain")).unwrap();
        queue.enqueue(with_handle(b"fd")).unwrap();
        queue.enqueue(finalized(b"tail")).unwrap();
        let mut transport = MockTransport::default();

        assert_eq!(queue.flush(&mut transport).unwrap(), 5);
        assert_eq!(queue.flush(&mut transport).unwrap(), 6);
        assert!(queue.is_empty());
        assert_eq!(transport.calls, vec![(1, false), (2, true)]);
        assert_eq!(transport.wire, b"plainfdtail");
    }

    #[test]
    fn direct_drain_consumes_handle() {
        let mut queue = OutputQueue::new();
        queue.enqueue(with_handle(b"abc")).unwrap();

        queue.drain(0);
        assert!(queue.entries[0].handle.is_some());

        queue.drain(1);
        assert!(queue.entries[0].handle.is_none());
    }

    #[test]
    fn batch_size_is_bounded_by_config() {
        let mut queue = OutputQueue::with_config(QueueConfig { max_batch: 2 });
        for chunk in [b"a", b"b", b"c"] {
            queue.enqueue(finalized(chunk)).unwrap();
        }
        let mut transport = MockTransport::default();

        assert_eq!(queue.flush(&mut transport).unwrap(), 2);
        assert_eq!(queue.flush(&mut transport).unwrap(), 1);
        assert_eq!(transport.calls, vec![(2, false), (1, false)]);
    }

    #[test]
    fn zero_length_buffers_are_rejected() {
        let mut queue = OutputQueue::new();
        let mut empty = Buffer::allocate(1).unwrap();
        empty.finalize().unwrap();

        let err = queue.enqueue(empty).unwrap_err();
        assert!(err.reason().contains("no payload"));
        assert!(err.into_buffer().is_finalized());
        assert_eq!(queue.queued_count(), 0);

        let mut with_fd = Buffer::allocate(1).unwrap();
        with_fd.attach_handle(test_handle()).unwrap();
        with_fd.finalize().unwrap();
        let err = queue.enqueue(with_fd).unwrap_err();
        assert!(err.into_buffer().has_handle());
        assert!(queue.is_empty());
    }

    /// One end of a socket pair as the handle; the other end sees EOF once
    /// every copy of the handle is closed.
    #[cfg(unix)]
    fn watched_handle() -> (Handle, std::os::unix::net::UnixStream) {
        let (attached, watcher) = std::os::unix::net::UnixStream::pair().unwrap();
        watcher.set_nonblocking(true).unwrap();
        (Handle::from(attached), watcher)
    }

    #[cfg(unix)]
    fn assert_closed(watcher: &mut std::os::unix::net::UnixStream) {
        use std::io::Read;

        let mut buf = [0u8; 1];
        assert_eq!(watcher.read(&mut buf).unwrap(), 0, "handle should be closed");
    }

    #[cfg(unix)]
    fn carrying(bytes: &[u8], handle: Handle) -> Buffer {
        let mut buf = Buffer::allocate(bytes.len()).unwrap();
        buf.append(bytes).unwrap();
        buf.attach_handle(handle).unwrap();
        buf.finalize().unwrap();
        buf
    }

    #[test]
    #[cfg(unix)]
    fn teardown_closes_unsent_handle() {
        let (handle, mut watcher) = watched_handle();
        let mut queue = OutputQueue::new();
        queue.enqueue(carrying(b"pending", handle)).unwrap();

        let mut buf = [0u8; 1];
        let err = std::io::Read::read(&mut watcher, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        queue.teardown();
        assert_closed(&mut watcher);
    }

    #[test]
    #[cfg(unix)]
    fn partial_drain_closes_handle() {
        let (handle, mut watcher) = watched_handle();
        let mut queue = OutputQueue::new();
        queue.enqueue(carrying(b"abc", handle)).unwrap();

        queue.drain(1);
        assert_eq!(queue.queued_count(), 1);
        assert_closed(&mut watcher);
    }

    #[test]
    #[cfg(unix)]
    fn flushed_handle_local_copy_is_closed() {
        let (handle, mut watcher) = watched_handle();
        let mut queue = OutputQueue::new();
        queue.enqueue(carrying(b"abc", handle)).unwrap();
        let mut transport = MockTransport::scripted([Step::Accept(1)]);

        assert_eq!(queue.flush(&mut transport).unwrap(), 1);
        assert_closed(&mut watcher);
    }

    #[test]
    fn teardown_releases_everything() {
        let mut queue = OutputQueue::new();
        queue.enqueue(with_handle(b"one")).unwrap();
        queue.enqueue(finalized(b"two")).unwrap();

        queue.teardown();
        assert!(queue.is_empty());
        assert_eq!(queue.queued_bytes(), 0);

        let mut transport = MockTransport::default();
        assert_eq!(queue.flush(&mut transport).unwrap(), 0);
        assert!(transport.calls.is_empty());
    }

    #[test]
    fn flush_on_empty_queue_is_a_no_op() {
        let mut queue = OutputQueue::default();
        let mut transport = MockTransport::default();
        assert_eq!(queue.flush(&mut transport).unwrap(), 0);
        assert!(transport.calls.is_empty());
        assert_eq!(queue.config().max_batch, crate::DEFAULT_MAX_BATCH);
    }
}
