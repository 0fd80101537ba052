use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tcprims_codec::{Codec, CodecConfig, LineRead};
use tcprims_transport::{listener, Accepted, Endpoint, Resolver, SystemResolver, TcpBinding};
use tracing::{debug, error, info, warn};

use crate::auth::AuthConfig;
use crate::config::SocketConfig;
use crate::connection::Connection;
use crate::error::{PeerError, Result};
use crate::handshake::{handshake_server, HandshakeConfig};

/// Frame handler: receives one frame, delimiter included, and returns the
/// reply. An empty reply sends nothing.
///
/// Runs on every connection's own thread, so it must tolerate concurrent
/// calls.
pub type ReadCallback = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Accepts TCP connections and serves each on its own thread.
///
/// Configuration and the read callback are captured when [`Server::listen`]
/// starts the accept loop; later changes apply to the next `listen`.
/// Shutdown is cooperative: loops observe the flag at their next check
/// point and in-flight connections are never cut.
pub struct Server {
    config: SocketConfig,
    auth: AuthConfig,
    callback: Option<ReadCallback>,
    resolver: Arc<dyn Resolver>,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            auth: config.auth_config(),
            config,
            callback: None,
            resolver: Arc::new(SystemResolver),
            shared: Arc::new(Shared::default()),
            accept_thread: None,
            local_addr: None,
        }
    }

    /// Set the frame handler.
    pub fn with_read_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.set_read_callback(callback);
        self
    }

    pub fn set_read_callback<F>(&mut self, callback: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Replace the resolver used for bind addresses.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Bind `host:port` and start accepting. Returns false if nothing could
    /// be bound.
    pub fn listen(&mut self, host: &str, port: u16) -> bool {
        match self.try_listen(host, port) {
            Ok(_) => true,
            Err(err) => {
                warn!(host, port, error = %err, "listen failed");
                false
            }
        }
    }

    /// Bind `host:port` and start the accept loop on its own thread.
    ///
    /// Returns once the socket is bound, with the bound address.
    pub fn try_listen(&mut self, host: &str, port: u16) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(PeerError::Config("server is already listening".to_string()));
        }

        let binding = TcpBinding::bind_host(
            host,
            port,
            self.config.max_buffered_connections,
            self.resolver.as_ref(),
        )?;
        self.start(binding)
    }

    /// Run the accept loop over an already bound socket.
    fn start(&mut self, binding: TcpBinding) -> Result<SocketAddr> {
        binding.set_nonblocking(true)?;
        let local_addr = binding.local_addr();

        self.shared = Arc::new(Shared::default());
        let ctx = Arc::new(HandlerContext {
            auth: self.auth.clone(),
            callback: self.callback.clone(),
            codec: self.config.codec_config(),
            handshake: self.config.handshake_config(),
            read_timeout: self.config.read_timeout(),
            poll_interval: self.config.accept_poll_interval(),
            shared: Arc::clone(&self.shared),
        });

        let handle = thread::Builder::new()
            .name("tcprims-accept".to_string())
            .spawn(move || accept_loop(binding, ctx))
            .map_err(|err| PeerError::ListenerFailed(format!("cannot spawn accept loop: {err}")))?;

        self.accept_thread = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Ask the accept loop and every handler to stop at their next check point.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            info!(addr = ?self.local_addr, "shutdown requested");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// True while the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.accept_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Connection handlers still alive.
    pub fn active_connections(&self) -> usize {
        *self.shared.lock_handlers()
    }

    /// Wait until every handler has exited. Returns false on timeout.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.shared.lock_handlers();
        while *live > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            live = match self.shared.drained.wait_timeout(live, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Wait for the accept loop to finish.
    ///
    /// Does not signal shutdown by itself. Returns the fatal listener error
    /// if the loop stopped because of one.
    pub fn join(&mut self) -> Result<()> {
        if let Some(handle) = self.accept_thread.take() {
            handle
                .join()
                .map_err(|_| PeerError::ShutdownFailed("accept loop panicked".to_string()))?;
        }
        match self.listener_error() {
            Some(message) => Err(PeerError::ListenerFailed(message)),
            None => Ok(()),
        }
    }

    /// Error that stopped the accept loop, if any.
    pub fn listener_error(&self) -> Option<String> {
        match self.shared.fatal.lock() {
            Ok(fatal) => fatal.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .field("has_callback", &self.callback.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Default)]
struct Shared {
    shutdown: AtomicBool,
    handlers: Mutex<usize>,
    drained: Condvar,
    fatal: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn lock_handlers(&self) -> MutexGuard<'_, usize> {
        match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record_fatal(&self, message: String) {
        match self.fatal.lock() {
            Ok(mut fatal) => *fatal = Some(message),
            Err(poisoned) => *poisoned.into_inner() = Some(message),
        }
    }
}

/// Counts one live handler; released when the handler thread ends.
struct HandlerSlot(Arc<Shared>);

impl HandlerSlot {
    fn enter(shared: &Arc<Shared>) -> Self {
        *shared.lock_handlers() += 1;
        Self(Arc::clone(shared))
    }
}

impl Drop for HandlerSlot {
    fn drop(&mut self) {
        let mut live = self.0.lock_handlers();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// Read-only state handed to the accept loop and every handler.
struct HandlerContext {
    auth: AuthConfig,
    callback: Option<ReadCallback>,
    codec: CodecConfig,
    handshake: HandshakeConfig,
    read_timeout: Option<Duration>,
    poll_interval: Duration,
    shared: Arc<Shared>,
}

fn accept_loop(binding: TcpBinding, ctx: Arc<HandlerContext>) {
    let addr = binding.local_addr();
    debug!(%addr, "accept loop started");

    while !ctx.shared.is_shutdown() {
        match binding.accept() {
            Ok(Accepted::Stream(stream, peer)) => spawn_handler(stream, peer, &ctx),
            Ok(Accepted::Idle) => thread::sleep(ctx.poll_interval),
            Err(err) if listener::is_fatal(&err) => {
                error!(%addr, error = %err, "listening socket failed");
                ctx.shared.record_fatal(err.to_string());
                break;
            }
            Err(err) => {
                warn!(%addr, error = %err, "accept failed");
                thread::sleep(ctx.poll_interval);
            }
        }
    }

    info!(%addr, "accept loop stopped");
}

fn spawn_handler(stream: TcpStream, peer: SocketAddr, ctx: &Arc<HandlerContext>) {
    let id = ctx.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let slot = HandlerSlot::enter(&ctx.shared);
    let handler_ctx = Arc::clone(ctx);

    let spawned = thread::Builder::new()
        .name(format!("tcprims-conn-{id}"))
        .spawn(move || {
            let _slot = slot;
            run_handler(id, stream, peer, &handler_ctx);
        });
    if let Err(err) = spawned {
        warn!(peer_id = id, %peer, error = %err, "cannot spawn connection handler");
    }
}

/// Outcome of the handshake for one accepted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Authorization {
    /// Auth mode is off.
    Skipped,
    Granted,
    Denied,
}

/// Server-side handle for one accepted peer.
pub(crate) struct PeerConnection {
    id: u64,
    peer: SocketAddr,
    codec: Codec<Endpoint>,
    authorization: Authorization,
}

impl PeerConnection {
    fn new(id: u64, peer: SocketAddr, endpoint: Endpoint, config: &CodecConfig) -> Self {
        Self {
            id,
            peer,
            codec: Codec::with_config(endpoint, config),
            authorization: Authorization::Skipped,
        }
    }

    fn authorize(&mut self, ctx: &HandlerContext) -> bool {
        if !ctx.auth.is_enabled() {
            if let Err(err) = self.codec.get_ref().set_read_timeout(ctx.read_timeout) {
                debug!(peer_id = self.id, error = %err, "read timeout not applied");
            }
            return true;
        }

        match handshake_server(&self.codec, &ctx.auth, &ctx.handshake) {
            Ok(()) => {
                self.authorization = Authorization::Granted;
                debug!(peer_id = self.id, peer = %self.peer, "peer authenticated");
                true
            }
            Err(err) => {
                self.authorization = Authorization::Denied;
                warn!(peer_id = self.id, peer = %self.peer, error = %err, "peer rejected");
                false
            }
        }
    }

    /// Read frames and answer each through `callback`, strictly in order.
    fn serve(&self, callback: &ReadCallback, shared: &Shared) {
        let mut frame = Vec::new();
        while !shared.is_shutdown() {
            match self.codec.read_line_into(&mut frame) {
                LineRead::Complete => {
                    let reply = callback(&frame);
                    frame.clear();
                    if reply.is_empty() {
                        continue;
                    }
                    let written = self.codec.write_bytes(&reply);
                    if written < reply.len() || self.send().is_err() {
                        debug!(peer_id = self.id, "reply not delivered");
                        break;
                    }
                }
                LineRead::TimedOut => continue,
                LineRead::Closed => {
                    if !frame.is_empty() {
                        debug!(peer_id = self.id, bytes = frame.len(), "dropping partial frame");
                    }
                    break;
                }
            }
        }
    }

    /// No callback: read nothing and wait for the peer to leave.
    fn idle(&self, ctx: &HandlerContext) {
        while !ctx.shared.is_shutdown() && self.is_connected() {
            thread::sleep(ctx.poll_interval);
        }
    }

    fn close(&mut self) {
        self.codec.get_mut().close();
    }
}

impl Connection for PeerConnection {
    type Stream = Endpoint;

    fn codec(&self) -> &Codec<Endpoint> {
        &self.codec
    }
}

fn run_handler(id: u64, stream: TcpStream, peer: SocketAddr, ctx: &HandlerContext) {
    let endpoint = match Endpoint::from_stream(stream) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            warn!(peer_id = id, %peer, error = %err, "cannot wrap accepted stream");
            return;
        }
    };
    let mut conn = PeerConnection::new(id, peer, endpoint, &ctx.codec);
    debug!(peer_id = id, %peer, "connection handler started");

    if conn.authorize(ctx) {
        match &ctx.callback {
            Some(callback) => conn.serve(callback, &ctx.shared),
            None => conn.idle(ctx),
        }
    }

    conn.close();
    debug!(
        peer_id = id,
        %peer,
        authorization = ?conn.authorization,
        "connection handler finished"
    );
}
