//! Error Module - VMGC Error Types
//!
//! Defines all error types used by the executor, heap and mailbox.
//! Every fatal condition in §7 of the runtime contract is represented here
//! so unit tests can assert on the kind of failure without scraping stderr;
//! only the process-facing edge (`vmgc-runtime`) converts a fatal error into
//! the stderr message + exit code the contract specifies.

use thiserror::Error;

/// Main error type for all VMGC operations.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("out of heap: requested {requested} bytes, {available} available after collection")]
    OutOfHeap { requested: usize, available: usize },

    #[error("stack overflow: frame needs {needed} slots, {available} available below max")]
    StackOverflow { needed: usize, available: usize },

    #[error("inbox full: executor {executor_id} mailbox has reached capacity {capacity}")]
    InboxFull { executor_id: u64, capacity: usize },

    #[error("receive claimed a message but the mailbox was empty for executor {executor_id}")]
    SpuriousReceive { executor_id: u64 },

    #[error("unexpected closure tag {tag} during {operation}")]
    BadTag { tag: u8, operation: &'static str },

    #[error("forward marker observed outside of a collection cycle at {address:#x}")]
    UnexpectedForward { address: usize },

    #[error("allocation lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, VmError>;

impl VmError {
    /// Whether this error represents one of the fatal, process-terminating
    /// conditions from §7, as opposed to a condition a caller might recover
    /// from (there currently are none of the latter, but the distinction is
    /// kept so a future recoverable variant does not silently become fatal).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::OutOfHeap { .. }
                | VmError::StackOverflow { .. }
                | VmError::InboxFull { .. }
                | VmError::SpuriousReceive { .. }
                | VmError::BadTag { .. }
                | VmError::UnexpectedForward { .. }
        )
    }
}
