//! Typed byte and line access over TCP endpoints.
//!
//! A [`Codec`] wraps anything that can name an active [`Endpoint`] and
//! gives it:
//! - fixed-width reads and writes (8/16/32/64 bit, native byte order, plus a
//!   raw 16-byte value)
//! - bulk byte transfer
//! - delimiter-terminated line framing (default `\n`)
//! - explicit flush of either direction
//!
//! Writes on one codec are serialized by a [`SpinLock`]; reads take only the
//! endpoint's read-stream lock, so a blocked reader never stalls a writer.
//!
//! [`Endpoint`]: tcprims_transport::Endpoint

pub mod codec;
pub mod error;
pub mod lock;
pub mod stream;

#[cfg(feature = "async")]
pub use codec::LineCodec;
pub use codec::{decode_line, encode_line, is_complete, CodecConfig, DEFAULT_EOL, WIDE_LEN};
pub use error::{CodecError, Result};
pub use lock::{SpinLock, DEFAULT_LOCK_INTERVAL};
pub use stream::{ActiveStream, Codec, LineRead};
