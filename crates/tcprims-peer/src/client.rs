use std::sync::Arc;

use tcprims_codec::Codec;
use tcprims_transport::{Fingerprint, Resolver, SystemResolver};
use tracing::{debug, info, warn};

use crate::auth::AuthConfig;
use crate::config::SocketConfig;
use crate::connection::Connection;
use crate::error::{PeerError, Result};
use crate::handshake::handshake_client;
use crate::registry::Registry;
use crate::retry::RetryPolicy;

/// One logical connection backed by any number of redundant destinations.
///
/// Reads and writes go through [`Client::codec`] to whichever destination is
/// active. When it fails, [`Client::failover`] moves to another.
pub struct Client {
    codec: Codec<Registry>,
    auth: AuthConfig,
    config: SocketConfig,
    resolver: Arc<dyn Resolver>,
}

impl Client {
    pub fn new(config: SocketConfig) -> Self {
        let registry = Registry::new()
            .with_buffer_sizes(config.rx_buffer_size, config.tx_buffer_size)
            .with_connect_timeout(config.connect_timeout());
        Self {
            codec: Codec::with_config(registry, &config.codec_config()),
            auth: config.auth_config(),
            config,
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Replace the name resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    /// Register a redundant destination without connecting to it.
    pub fn add_destination(&mut self, host: &str, port: u16) -> Fingerprint {
        self.codec
            .get_mut()
            .resolve_or_create(host, port)
            .fingerprint()
    }

    /// Connect to `host:port` without a handshake and make it active.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        match self.try_connect(host, port) {
            Ok(()) => true,
            Err(err) => {
                warn!(host, port, error = %err, "connect failed");
                false
            }
        }
    }

    pub fn try_connect(&mut self, host: &str, port: u16) -> Result<()> {
        let fingerprint = self.add_destination(host, port);
        self.codec.get_mut().set_active(fingerprint);
        self.open_active()
    }

    /// Connect to `host:port`, make it active and run the client handshake.
    ///
    /// Returns false without touching the network when auth is off or no
    /// key is configured.
    pub fn authenticate(&mut self, host: &str, port: u16) -> bool {
        match self.try_authenticate(host, port) {
            Ok(()) => true,
            Err(err) => {
                warn!(host, port, error = %err, "authentication failed");
                false
            }
        }
    }

    pub fn try_authenticate(&mut self, host: &str, port: u16) -> Result<()> {
        self.require_digest()?;
        self.try_connect(host, port)?;
        self.handshake_active()?;
        info!(host, port, "authenticated");
        Ok(())
    }

    /// Move to another destination after the active one failed.
    ///
    /// The active endpoint is closed first. An already connected alternate
    /// wins; otherwise each other destination is tried once, in registration
    /// order, with a handshake when auth is on. Never loops: retrying is the
    /// caller's decision, see [`Client::failover_with_retry`].
    pub fn failover(&mut self) -> bool {
        let registry = self.codec.get_mut();
        let previous = registry.active_fingerprint();
        if let Some(endpoint) = registry.active_endpoint_mut() {
            endpoint.close();
        }

        if let Some(fingerprint) = registry.failover_candidate() {
            registry.set_active(fingerprint);
            debug!(%fingerprint, "failed over to connected destination");
            return self.is_connected();
        }

        for fingerprint in registry.alternates() {
            match self.establish(fingerprint) {
                Ok(()) => {
                    info!(%fingerprint, "failed over to destination");
                    return true;
                }
                Err(err) => debug!(%fingerprint, error = %err, "failover candidate unusable"),
            }
        }

        if let Some(fingerprint) = previous {
            self.codec.get_mut().set_active(fingerprint);
        }
        warn!("no destination available for failover");
        false
    }

    /// Repeat [`Client::failover`] under `policy`.
    pub fn failover_with_retry(&mut self, policy: &RetryPolicy) -> bool {
        policy.run(|_| self.failover())
    }

    /// True when the active destination is connected.
    pub fn connected(&self) -> bool {
        self.codec.is_connected()
    }

    /// Host and port of the active destination.
    pub fn active_destination(&self) -> Option<(String, u16)> {
        self.codec
            .get_ref()
            .active_endpoint()
            .map(|endpoint| (endpoint.host().to_string(), endpoint.port()))
    }

    /// Close the active destination. Other destinations stay as they are.
    pub fn disconnect(&mut self) {
        if let Some(endpoint) = self.codec.get_mut().active_endpoint_mut() {
            endpoint.close();
        }
    }

    fn require_digest(&self) -> Result<()> {
        if !self.auth.is_enabled() {
            return Err(PeerError::Config("auth mode is off".to_string()));
        }
        if self.auth.digest_bytes().is_none() {
            return Err(PeerError::Config("no shared key configured".to_string()));
        }
        Ok(())
    }

    fn establish(&mut self, fingerprint: Fingerprint) -> Result<()> {
        self.codec.get_mut().set_active(fingerprint);
        self.open_active()?;
        if self.auth.is_enabled() {
            self.handshake_active()?;
        }
        Ok(())
    }

    /// Run the client handshake; on failure the active endpoint is released.
    fn handshake_active(&mut self) -> Result<()> {
        let result = handshake_client(&self.codec, &self.auth, &self.config.handshake_config());
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    /// Open the active destination. Fails with the endpoint fully closed.
    fn open_active(&mut self) -> Result<()> {
        let resolver = Arc::clone(&self.resolver);
        let read_timeout = self.config.read_timeout();
        let endpoint = self
            .codec
            .get_mut()
            .active_endpoint_mut()
            .ok_or(PeerError::NoDestination)?;

        endpoint.connect(resolver.as_ref())?;
        if read_timeout.is_some() {
            if let Err(err) = endpoint.set_read_timeout(read_timeout) {
                endpoint.close();
                return Err(err.into());
            }
        }
        debug!(
            host = endpoint.host(),
            port = endpoint.port(),
            peer = ?endpoint.peer_addr(),
            "destination connected"
        );
        Ok(())
    }
}

impl Connection for Client {
    type Stream = Registry;

    fn codec(&self) -> &Codec<Registry> {
        &self.codec
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("auth", &self.auth)
            .field("active", &self.active_destination())
            .finish()
    }
}
