/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tcprims_transport::TransportError),

    /// Codec-level error.
    #[error("codec error: {0}")]
    Codec(#[from] tcprims_codec::CodecError),

    /// Handshake could not run.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server answered the handshake with AUTH_FAILED, or the presented
    /// digest did not match.
    #[error("authentication rejected")]
    AuthRejected,

    /// The server answered the handshake with an unknown status byte.
    #[error("protocol violation: unexpected auth status byte {0:#04x}")]
    ProtocolViolation(u8),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// No destination is registered or active.
    #[error("no active destination")]
    NoDestination,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The accept loop stopped on an unrecoverable listening-socket error.
    #[error("listener failed: {0}")]
    ListenerFailed(String),

    /// Graceful shutdown failed.
    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
