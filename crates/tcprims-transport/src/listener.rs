use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::resolve::Resolver;
use crate::sockopt;

/// Default accept queue length.
pub const DEFAULT_BACKLOG: u32 = 5;

/// Outcome of a single accept attempt on a non-blocking binding.
#[derive(Debug)]
pub enum Accepted {
    /// A peer connected.
    Stream(TcpStream, SocketAddr),
    /// Nothing pending right now.
    Idle,
}

/// A bound, listening TCP socket.
pub struct TcpBinding {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpBinding {
    /// Bind to the first candidate address that accepts the bind.
    pub fn bind(candidates: &[SocketAddr], backlog: u32) -> Result<Self> {
        let mut last_err = None;
        for addr in candidates {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    if let Err(err) = sockopt::set_listen_backlog(&listener, backlog) {
                        debug!(backlog, error = %err, "backlog hint not applied");
                    }
                    let local_addr = listener.local_addr()?;
                    info!(%local_addr, backlog, "listening on tcp socket");
                    return Ok(Self {
                        listener,
                        local_addr,
                    });
                }
                Err(source) => {
                    debug!(%addr, error = %source, "bind attempt failed");
                    last_err = Some(TransportError::Bind {
                        addr: *addr,
                        source,
                    });
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            TransportError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "no candidate addresses to bind",
            ))
        }))
    }

    /// Resolve `host:port` and bind the first usable local address.
    pub fn bind_host(host: &str, port: u16, backlog: u32, resolver: &dyn Resolver) -> Result<Self> {
        let candidates = resolver.resolve(host, port)?;
        Self::bind(&candidates, backlog)
    }

    /// Switch the listening socket between blocking and polling accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// Accept an incoming connection.
    ///
    /// Accepted sockets are always blocking and get `TCP_NODELAY` and
    /// `SO_REUSEADDR`. On a non-blocking binding an empty queue yields
    /// [`Accepted::Idle`].
    pub fn accept(&self) -> Result<Accepted> {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Accepted::Idle),
            Err(err) => return Err(TransportError::Accept(err)),
        };

        stream.set_nonblocking(false)?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%peer, error = %err, "TCP_NODELAY not applied");
        }
        if let Err(err) = sockopt::set_reuse_addr(&stream) {
            debug!(%peer, error = %err, "SO_REUSEADDR not applied");
        }

        debug!(%peer, "accepted connection");
        Ok(Accepted::Stream(stream, peer))
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for TcpBinding {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.listener.as_raw_fd()
    }
}

impl std::fmt::Debug for TcpBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBinding")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// True when an accept error means the listening socket cannot continue.
pub fn is_fatal(err: &TransportError) -> bool {
    match err {
        TransportError::Accept(io) => sockopt::is_fatal_accept_error(io),
        TransportError::Io(io) => sockopt::is_fatal_accept_error(io),
        _ => false,
    }
}
