//! TCP transport primitives.
//!
//! Owns the operating-system side of a connection:
//! - name resolution behind the [`Resolver`] capability
//! - [`Endpoint`], one physical link with buffered read and write streams
//! - [`TcpBinding`], a listening socket with a polling accept
//! - raw socket options (`SO_REUSEADDR`, buffer sizes, backlog)
//!
//! This is the lowest layer of tcprims. Everything else builds on top of
//! the [`Endpoint`] type provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod resolve;
pub mod sockopt;

pub use endpoint::{Direction, Endpoint, Fingerprint, DEFAULT_BUFFER_SIZE};
pub use error::{Result, TransportError};
pub use listener::{Accepted, TcpBinding, DEFAULT_BACKLOG};
pub use resolve::{Resolver, SystemResolver};
