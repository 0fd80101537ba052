/// Errors that can occur while reading or writing through a codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The active endpoint has no open streams.
    #[error("endpoint is not connected")]
    NotConnected,

    /// The peer closed the stream before the value was complete.
    #[error("connection closed (incomplete value)")]
    ConnectionClosed,

    /// An I/O error occurred on the underlying stream.
    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
