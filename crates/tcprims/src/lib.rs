//! Embeddable TCP transport with line framing, shared-secret auth and failover.
//!
//! tcprims gives an application one logical TCP connection that can be
//! backed by several redundant servers, typed and line-delimited access to
//! the byte stream, an optional digest handshake, and a thread-per-connection
//! server driven by a single frame callback.
//!
//! # Crate Structure
//!
//! - [`transport`]: Endpoints, name resolution, listening sockets
//! - [`codec`]: Spin-locked fixed-width and line access to an endpoint
//! - [`peer`]: Client with failover, server, auth handshake (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use tcprims_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use tcprims_codec::*;
}

/// Re-export client and server types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use tcprims_peer::*;
}
