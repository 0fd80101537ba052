use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::lock::DEFAULT_LOCK_INTERVAL;

/// Default frame delimiter: `\n`.
pub const DEFAULT_EOL: u8 = b'\n';

/// Width of the raw digest-sized transfer used by `read128`/`write128`.
pub const WIDE_LEN: usize = 16;

/// Configuration for a [`Codec`](crate::Codec).
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Frame delimiter byte. Default: `\n`.
    pub eol: u8,
    /// Pause between attempts to take the stream lock.
    pub lock_interval: Duration,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            eol: DEFAULT_EOL,
            lock_interval: DEFAULT_LOCK_INTERVAL,
        }
    }
}

/// Split one delimiter-terminated frame off the front of `src`.
///
/// The delimiter stays in the returned frame. Returns `None` when `src` does
/// not hold a delimiter yet.
pub fn decode_line(src: &mut BytesMut, eol: u8) -> Option<Bytes> {
    let pos = src.iter().position(|&byte| byte == eol)?;
    Some(src.split_to(pos + 1).freeze())
}

/// Append `line` and, unless already present, the delimiter.
///
/// The wire format is:
/// ```text
/// ┌────────────────────────────┬─────┐
/// │ Payload (any bytes != EOL) │ EOL │
/// └────────────────────────────┴─────┘
/// ```
pub fn encode_line(line: &[u8], eol: u8, dst: &mut BytesMut) {
    dst.reserve(line.len() + 1);
    dst.put_slice(line);
    if !is_complete(line, eol) {
        dst.put_u8(eol);
    }
}

/// True when `line` ends with the delimiter.
pub fn is_complete(line: &[u8], eol: u8) -> bool {
    line.last() == Some(&eol)
}

/// `tokio_util` codec speaking the same delimiter framing as `readline`.
///
/// At end-of-stream a trailing partial frame is yielded as-is, without a
/// delimiter, instead of being reported as an error.
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct LineCodec {
    eol: u8,
    next_index: usize,
}

#[cfg(feature = "async")]
impl LineCodec {
    /// Codec using `\n` as delimiter.
    pub fn new() -> Self {
        Self::with_eol(DEFAULT_EOL)
    }

    /// Codec using an explicit delimiter.
    pub fn with_eol(eol: u8) -> Self {
        Self { eol, next_index: 0 }
    }

    pub fn eol(&self) -> u8 {
        self.eol
    }
}

#[cfg(feature = "async")]
impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for LineCodec {
    type Item = Bytes;
    type Error = crate::error::CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        // Resume scanning where the last call stopped.
        let found = src[self.next_index..]
            .iter()
            .position(|&byte| byte == self.eol);
        match found {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                Ok(Some(src.split_to(end).freeze()))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split().freeze()))
        }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Bytes> for LineCodec {
    type Error = crate::error::CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_line(&item, self.eol, dst);
        Ok(())
    }
}
