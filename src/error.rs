//! Error types for the peercore runtime.

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the scheduler core.
///
/// `Killed` doubles as the reason code delivered over a task's
/// termination channel, which is why the whole enum is `Clone` and
/// comparable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-range argument
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// Pool exhausted or per-task timer table full
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// Name or group does not exist, or the handle is stale
    #[error("not found: {0}")]
    NotFound(String),

    /// Name collision at creation
    #[error("duplicated name: {0}")]
    Duplicated(String),

    /// Operation invalid in the current run-state
    #[error("run-state mismatch: {0}")]
    Mismatched(String),

    /// Termination reason delivered to a handler loop
    #[error("killed")]
    Killed,

    /// Task created but left dormant
    #[error("task created suspended")]
    Suspended,

    /// Invariant violation in pool or list bookkeeping (a bug; diagnosed,
    /// never masked)
    #[error("internal error: {0}")]
    Internal(String),

    /// Aggregate failure in a group fan-out; carries the failed count
    #[error("group fan-out failed for {0} member(s)")]
    Unknown(usize),
}

impl Error {
    /// Create a parameter error
    pub fn parameter<S: Into<String>>(msg: S) -> Self {
        Error::Parameter(msg.into())
    }

    /// Create a resource-exhaustion error
    pub fn resource<S: Into<String>>(msg: S) -> Self {
        Error::Resource(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a run-state mismatch error
    pub fn mismatched<S: Into<String>>(msg: S) -> Self {
        Error::Mismatched(msg.into())
    }

    /// Create an internal bookkeeping error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }
}
