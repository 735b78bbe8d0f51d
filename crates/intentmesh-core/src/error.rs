use thiserror::Error;

/// Convenience alias for `Result<T, MeshError>`.
pub type MeshResult<T> = Result<T, MeshError>;

/// Top-level error type shared by every intentmesh crate.
///
/// Timeouts are ordinary failures: callers that race an operation against a
/// deadline treat [`MeshError::Timeout`] exactly like a refusal.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Rejected input (missing title, field too long). Never reaches the network.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An invitation's direct peers were reachable, but the store could not be opened.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// An invitation without a live direct peer could not be resolved through discovery.
    #[error("Discovery timed out: {0}")]
    DiscoveryTimeout(String),

    /// A join was requested while another join run is still in flight.
    #[error("A join is already in progress for this session")]
    JoinInProgress,

    /// The store holds no record with the requested ID.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error reported by the replicated store.
    #[error("Store error: {0}")]
    Store(String),

    /// An error reported by the peer transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An error reading or writing the local cache or persisted state.
    #[error("Cache error: {0}")]
    Cache(String),

    /// An error from the embedding capability.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Two vectors that must share a dimensionality do not.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected vector length.
        expected: usize,
        /// Actual vector length.
        actual: usize,
    },

    /// An error from the signing capability.
    #[error("Signing error: {0}")]
    Signing(String),

    /// A background task panicked or was aborted.
    #[error("Task error: {0}")]
    Task(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    /// Whether this error came from a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MeshError::Timeout(_))
    }
}
