use std::net::{SocketAddr, ToSocketAddrs};

use tracing::debug;

use crate::error::{Result, TransportError};

/// Turns a `host:port` destination into an ordered list of candidate addresses.
///
/// Candidates are tried in the order returned. Implementations must be safe to
/// call from any thread.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo` on unix).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(TransportError::NoAddresses {
                host: host.to_string(),
                port,
            });
        }

        debug!(host, port, count = candidates.len(), "resolved destination");
        Ok(candidates)
    }
}

impl<F> Resolver for F
where
    F: Fn(&str, u16) -> Result<Vec<SocketAddr>> + Send + Sync,
{
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        self(host, port)
    }
}
