//! Crate-wide error taxonomy.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TapsError>;

/// Errors produced by the TAPS core.
///
/// Runtime errors (everything except construction-time misuse) are normally
/// observed as a [`crate::connection::ConnectionEvent`] or
/// [`crate::listener::ListenerEvent`] rather than an `Err` return — see the
/// crate-level error handling design.
#[derive(Debug, Error)]
pub enum TapsError {
    /// The candidate selector produced an empty protocol list.
    #[error("no protocol satisfies the given transport properties")]
    Selection,

    /// No racing candidate reached Established.
    #[error("failed to establish a connection: {0}")]
    Initiate(String),

    /// No local bind succeeded for any (protocol, address) candidate.
    #[error("failed to start listening: {0}")]
    Listen(String),

    /// A send attempt failed or was made on a non-Established connection.
    #[error("send failed: {0}")]
    Send(String),

    /// A framer permanently failed to make progress, or a post-EOF read
    /// errored.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The underlying transport reported an error after establishment
    /// (reset, refused, or otherwise lost).
    #[error("connection error: {0}")]
    Connection(String),

    /// A per-message deadline passed before the message could be written.
    #[error("message {0} expired before it could be sent")]
    Expired(u64),

    /// Invalid arguments supplied during pre-establishment.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The operation is not valid for the connection's/listener's current
    /// state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A TLS/DTLS or other security collaborator error.
    #[error("security error: {0}")]
    Security(String),

    /// A feature was requested that this build does not implement (e.g. a
    /// protocol with no compiled-in adapter, or multicast send).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A caller-imposed or internal timeout elapsed.
    #[error("operation timed out")]
    Timeout,

    /// An underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
