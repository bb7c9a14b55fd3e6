/// Default upper bound on messages coalesced into one send: the common `IOV_MAX`.
pub const DEFAULT_MAX_BATCH: usize = 1024;

/// Configuration for an [`OutputQueue`](crate::OutputQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of queued messages handed to the transport in one
    /// flush. Values below 1 are treated as 1. Default: 1024.
    pub max_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}
