/// Errors that can occur in IPC transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A send or receive on the stream failed hard (not would-block).
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer accepted zero bytes of a non-empty send; the connection is gone.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
