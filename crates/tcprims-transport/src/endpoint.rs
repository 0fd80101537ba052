use std::fmt;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::resolve::Resolver;
use crate::sockopt;

/// Default per-endpoint stream buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stream direction for buffer hints and flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Inbound (read) side.
    Rx,
    /// Outbound (write) side.
    Tx,
}

/// Deterministic identity of a logical `host:port` destination.
///
/// FNV-1a over the host bytes, a NUL separator and the decimal port, so the
/// value is identical across processes and builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of a destination.
    pub fn of(host: &str, port: u16) -> Self {
        let port = port.to_string();
        let hash = host
            .bytes()
            .chain(std::iter::once(0u8))
            .chain(port.bytes())
            .fold(FNV_OFFSET_BASIS, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
            });
        Self(hash)
    }

    /// Raw 64-bit value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One physical TCP link and its buffered duplex streams.
///
/// A connected endpoint holds a control handle to the socket plus independent
/// read and write streams over the same descriptor. Each stream sits behind
/// its own lock, so a reader blocked on the read stream never holds up a
/// writer, and the end-of-stream state is an atomic flag readable by anyone.
/// Dropping the endpoint closes it.
pub struct Endpoint {
    host: String,
    port: u16,
    fingerprint: Fingerprint,
    socket: Option<TcpStream>,
    rx: Option<Mutex<BufReader<TcpStream>>>,
    tx: Option<Mutex<BufWriter<TcpStream>>>,
    peer_addr: Option<SocketAddr>,
    rx_buffer_size: usize,
    tx_buffer_size: usize,
    connect_timeout: Option<Duration>,
    eof: AtomicBool,
}

impl Endpoint {
    /// Create an unopened endpoint for a destination.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let fingerprint = Fingerprint::of(&host, port);
        Self {
            host,
            port,
            fingerprint,
            socket: None,
            rx: None,
            tx: None,
            peer_addr: None,
            rx_buffer_size: DEFAULT_BUFFER_SIZE,
            tx_buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: None,
            eof: AtomicBool::new(false),
        }
    }

    /// Override the buffer size hints applied on open.
    pub fn with_buffer_sizes(mut self, rx: usize, tx: usize) -> Self {
        self.rx_buffer_size = rx;
        self.tx_buffer_size = tx;
        self
    }

    /// Bound each connect attempt. `None` blocks until the OS gives up.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Wrap an already connected stream, e.g. one returned by `accept`.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let mut endpoint = Self::new(peer.ip().to_string(), peer.port());
        endpoint.attach(stream, peer)?;
        Ok(endpoint)
    }

    /// Resolve this endpoint's destination and open it.
    ///
    /// The resolved candidates are released before returning, whatever the
    /// outcome.
    pub fn connect(&mut self, resolver: &dyn Resolver) -> Result<()> {
        let candidates = resolver.resolve(&self.host, self.port)?;
        self.open(&candidates)
    }

    /// Try each candidate in order and keep the first that connects.
    ///
    /// Any existing connection is closed first. On failure the endpoint is
    /// left fully closed.
    pub fn open(&mut self, candidates: &[SocketAddr]) -> Result<()> {
        self.close();

        let mut last_err = None;
        for addr in candidates {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    self.attach(stream, *addr)?;
                    debug!(host = %self.host, port = self.port, %addr, "connection established");
                    return Ok(());
                }
                Err(source) => {
                    debug!(%addr, error = %source, "connect attempt failed");
                    last_err = Some(TransportError::Connect { addr: *addr, source });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::NoAddresses {
            host: self.host.clone(),
            port: self.port,
        }))
    }

    fn attach(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if let Err(err) = sockopt::set_reuse_addr(&stream) {
            debug!(error = %err, "SO_REUSEADDR not applied");
        }

        let streams = stream
            .try_clone()
            .and_then(|rx| stream.try_clone().map(|tx| (rx, tx)));
        let (rx, tx) = match streams {
            Ok(pair) => pair,
            Err(err) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(TransportError::Io(err));
            }
        };

        for (direction, size) in [
            (Direction::Rx, self.rx_buffer_size),
            (Direction::Tx, self.tx_buffer_size),
        ] {
            if let Err(err) = sockopt::set_buffer_size(&stream, direction, size) {
                debug!(?direction, size, error = %err, "buffer size hint not applied");
            }
        }

        self.rx = Some(Mutex::new(BufReader::with_capacity(self.rx_buffer_size, rx)));
        self.tx = Some(Mutex::new(BufWriter::with_capacity(self.tx_buffer_size, tx)));
        self.socket = Some(stream);
        self.peer_addr = Some(peer);
        *self.eof.get_mut() = false;
        Ok(())
    }

    /// Close the descriptor and both streams. Safe to call repeatedly.
    pub fn close(&mut self) {
        // Dropping the writer flushes whatever it still buffers.
        self.tx.take();
        self.rx.take();
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
            debug!(host = %self.host, port = self.port, "endpoint closed");
        }
        self.peer_addr = None;
        *self.eof.get_mut() = false;
    }

    /// Shut the link down in both directions without releasing the streams.
    ///
    /// Needs only shared access: a reader blocked on this endpoint wakes with
    /// end-of-stream. [`Endpoint::close`] still releases the descriptor.
    pub fn shutdown(&self) {
        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(Shutdown::Both);
            debug!(host = %self.host, port = self.port, "endpoint shut down");
        }
        self.mark_eof();
    }

    /// True while both streams are open and the peer has not closed.
    ///
    /// End-of-stream is probed on the socket, never through the read stream,
    /// so a reader blocked on this endpoint cannot stall the check. A link
    /// that broke a moment ago may still read as connected.
    pub fn is_connected(&self) -> bool {
        let (Some(socket), Some(rx), Some(_)) = (&self.socket, &self.rx, &self.tx) else {
            return false;
        };
        if self.eof.load(Ordering::Acquire) {
            return false;
        }
        // Bytes already buffered count as live; a busy read stream is skipped.
        let buffered = rx
            .try_lock()
            .is_ok_and(|reader| !reader.buffer().is_empty());
        buffered || !sockopt::peer_closed(socket)
    }

    /// Record a socket buffer size hint and apply it if connected.
    ///
    /// A failed hint leaves the endpoint untouched.
    pub fn set_buffer_size(&mut self, direction: Direction, bytes: usize) -> Result<()> {
        if let Some(socket) = &self.socket {
            sockopt::set_buffer_size(socket, direction, bytes).map_err(|source| {
                TransportError::SocketOption {
                    option: match direction {
                        Direction::Rx => "SO_RCVBUF",
                        Direction::Tx => "SO_SNDBUF",
                    },
                    source,
                }
            })?;
        }
        match direction {
            Direction::Rx => self.rx_buffer_size = bytes,
            Direction::Tx => self.tx_buffer_size = bytes,
        }
        Ok(())
    }

    /// Current buffer size hint.
    pub fn buffer_size(&self, direction: Direction) -> usize {
        match direction {
            Direction::Rx => self.rx_buffer_size,
            Direction::Tx => self.tx_buffer_size,
        }
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        socket.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        socket.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Record that the link hit end-of-stream or broke.
    pub fn mark_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    /// Lock the read stream, if open. Never contends with [`Endpoint::writer`].
    pub fn reader(&self) -> Option<MutexGuard<'_, BufReader<TcpStream>>> {
        self.rx
            .as_ref()
            .map(|rx| rx.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Lock the write stream, if open.
    pub fn writer(&self) -> Option<MutexGuard<'_, BufWriter<TcpStream>>> {
        self.tx
            .as_ref()
            .map(|tx| tx.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("fingerprint", &self.fingerprint)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.socket.is_some())
            .finish()
    }
}
