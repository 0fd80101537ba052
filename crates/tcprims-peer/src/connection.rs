use bytes::Bytes;
use tcprims_codec::{ActiveStream, Codec};

use crate::error::{PeerError, Result};

/// Capability shared by client connections and server-side peer handles.
pub trait Connection {
    type Stream: ActiveStream;

    /// Codec over this connection's active endpoint.
    fn codec(&self) -> &Codec<Self::Stream>;

    fn is_connected(&self) -> bool {
        self.codec().is_connected()
    }

    /// Flush buffered output.
    fn send(&self) -> Result<()> {
        self.codec().send().map_err(Into::into)
    }

    /// Write one frame, flush, and read one frame back.
    ///
    /// A frame the stream did not take in full is reported as a disconnect.
    fn request_line(&self, line: &[u8]) -> Result<Bytes> {
        if !self.is_connected() {
            return Err(PeerError::Disconnected("not connected".to_string()));
        }
        let framed = self.codec().frame(line);
        let written = self.codec().write_bytes(&framed);
        if written < framed.len() {
            return Err(PeerError::Disconnected(format!(
                "request cut short after {written} of {} bytes",
                framed.len()
            )));
        }
        self.send()?;

        let reply = self.codec().readline();
        if reply.is_empty() && !self.is_connected() {
            return Err(PeerError::Disconnected(
                "connection closed before reply".to_string(),
            ));
        }
        Ok(reply)
    }
}
