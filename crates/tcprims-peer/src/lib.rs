//! Authenticated TCP clients with failover, and a thread-per-connection server.
//!
//! This is the "just works" layer. A [`Client`] keeps a [`Registry`] of
//! redundant destinations and can fail over between them; a [`Server`]
//! accepts connections and feeds each delimiter-terminated frame to a
//! callback. Both sides can agree on a shared secret through a one-shot
//! digest [handshake](handshake).

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod retry;
pub mod server;

pub use auth::{digest, AuthConfig, AuthMode, AuthStatus, AUTH_FAILED, AUTH_OK, DIGEST_LEN};
pub use client::Client;
pub use config::SocketConfig;
pub use connection::Connection;
pub use error::{PeerError, Result};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeState, DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use registry::Registry;
pub use retry::RetryPolicy;
pub use server::{ReadCallback, Server};
