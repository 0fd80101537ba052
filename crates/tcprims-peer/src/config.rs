use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tcprims_codec::CodecConfig;
use tcprims_transport::{DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE};

use crate::auth::{AuthConfig, AuthMode};
use crate::error::{PeerError, Result};
use crate::handshake::HandshakeConfig;

/// Construction-time settings shared by [`Client`](crate::Client) and
/// [`Server`](crate::Server).
///
/// Every field has a default, so a partial JSON document is valid:
///
/// ```json
/// { "key": "k1", "auth_mode": "digest", "eol_byte": 10 }
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Shared secret. Never logged.
    pub key: String,
    pub auth_mode: AuthMode,
    /// Listen backlog.
    pub max_buffered_connections: u32,
    /// Frame delimiter.
    pub eol_byte: u8,
    pub rx_buffer_size: usize,
    pub tx_buffer_size: usize,
    /// Pause between stream-lock attempts, in nanoseconds.
    pub lock_interval_ns: u64,
    /// Read timeout during the handshake. `None` blocks indefinitely.
    pub handshake_timeout_ms: Option<u64>,
    /// Read timeout for ordinary traffic. `None` blocks indefinitely.
    pub read_timeout_ms: Option<u64>,
    /// Bound on each connect attempt.
    pub connect_timeout_ms: Option<u64>,
    /// How often the accept loop checks for shutdown.
    pub accept_poll_interval_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            auth_mode: AuthMode::Off,
            max_buffered_connections: DEFAULT_BACKLOG,
            eol_byte: b'\n',
            rx_buffer_size: DEFAULT_BUFFER_SIZE,
            tx_buffer_size: DEFAULT_BUFFER_SIZE,
            lock_interval_ns: 10,
            handshake_timeout_ms: Some(5_000),
            read_timeout_ms: None,
            connect_timeout_ms: None,
            accept_poll_interval_ms: 10,
        }
    }
}

impl SocketConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            PeerError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.rx_buffer_size == 0 || self.tx_buffer_size == 0 {
            return Err(PeerError::Config(
                "buffer sizes must be greater than zero".to_string(),
            ));
        }
        if self.accept_poll_interval_ms == 0 {
            return Err(PeerError::Config(
                "accept_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if [
            self.read_timeout_ms,
            self.handshake_timeout_ms,
            self.connect_timeout_ms,
        ]
        .contains(&Some(0))
        {
            return Err(PeerError::Config(
                "timeouts must be greater than zero; use null to disable".to_string(),
            ));
        }
        Ok(())
    }

    /// Digest mode with `key`.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self.auth_mode = AuthMode::Digest;
        self
    }

    pub fn with_auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    pub fn with_eol(mut self, eol: u8) -> Self {
        self.eol_byte = eol;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.max_buffered_connections = backlog;
        self
    }

    pub fn with_buffer_sizes(mut self, rx: usize, tx: usize) -> Self {
        self.rx_buffer_size = rx;
        self.tx_buffer_size = tx;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout_ms = timeout.map(duration_ms);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout_ms = timeout.map(duration_ms);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout_ms = timeout.map(duration_ms);
        self
    }

    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval_ms = duration_ms(interval).max(1);
        self
    }

    /// Auth configuration; the digest is computed here, once.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.auth_mode, self.key.clone())
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            eol: self.eol_byte,
            lock_interval: Duration::from_nanos(self.lock_interval_ns),
        }
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            timeout: self.handshake_timeout(),
            read_timeout: self.read_timeout(),
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms.max(1))
    }
}

/// Whole milliseconds, rounding any non-zero duration up to at least 1.
fn duration_ms(duration: Duration) -> u64 {
    let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if duration.is_zero() {
        ms
    } else {
        ms.max(1)
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfig")
            .field("key", &format_args!("<redacted:{} bytes>", self.key.len()))
            .field("auth_mode", &self.auth_mode)
            .field("max_buffered_connections", &self.max_buffered_connections)
            .field("eol_byte", &self.eol_byte)
            .field("rx_buffer_size", &self.rx_buffer_size)
            .field("tx_buffer_size", &self.tx_buffer_size)
            .field("lock_interval_ns", &self.lock_interval_ns)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("accept_poll_interval_ms", &self.accept_poll_interval_ms)
            .finish()
    }
}
