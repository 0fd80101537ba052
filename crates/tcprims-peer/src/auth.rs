use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Length of the digest exchanged during the handshake.
pub const DIGEST_LEN: usize = 16;

/// Status byte: the presented digest matched.
pub const AUTH_OK: u8 = 0x00;
/// Status byte: the presented digest did not match.
pub const AUTH_FAILED: u8 = 0x01;

/// Whether connections run the shared-secret handshake.
///
/// Both sides must agree out of band; nothing is negotiated on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Off,
    Digest,
}

/// Server verdict carried by the handshake status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthStatus {
    Ok = AUTH_OK,
    Failed = AUTH_FAILED,
}

impl AuthStatus {
    /// Decode a status byte. Unknown values return `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            AUTH_OK => Some(Self::Ok),
            AUTH_FAILED => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Digest of a shared secret: MD5, always 16 bytes.
pub fn digest(key: &[u8]) -> [u8; DIGEST_LEN] {
    let hash = Md5::digest(key);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hash);
    out
}

/// Compare two digests without an early exit on the first mismatch.
pub fn digest_eq(left: &[u8; DIGEST_LEN], right: &[u8; DIGEST_LEN]) -> bool {
    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Shared-secret configuration for one client or server.
///
/// The digest is derived once, at construction, and never changes.
#[derive(Clone, Default)]
pub struct AuthConfig {
    mode: AuthMode,
    key: String,
    digest: Option<[u8; DIGEST_LEN]>,
}

impl AuthConfig {
    /// Handshake disabled.
    pub fn off() -> Self {
        Self::default()
    }

    /// Digest mode with `key` as the shared secret.
    ///
    /// An empty key yields no digest: clients refuse to authenticate and
    /// servers reject every peer.
    pub fn digest(key: impl Into<String>) -> Self {
        Self::new(AuthMode::Digest, key)
    }

    pub fn new(mode: AuthMode, key: impl Into<String>) -> Self {
        let key = key.into();
        let digest = match mode {
            AuthMode::Digest if !key.is_empty() => Some(digest(key.as_bytes())),
            _ => None,
        };
        Self { mode, key, digest }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// True when connections must run the handshake.
    pub fn is_enabled(&self) -> bool {
        self.mode == AuthMode::Digest
    }

    /// Precomputed digest, if digest mode is on and a key is set.
    pub fn digest_bytes(&self) -> Option<&[u8; DIGEST_LEN]> {
        self.digest.as_ref()
    }

    /// True when `candidate` matches the configured digest.
    pub fn verify(&self, candidate: &[u8; DIGEST_LEN]) -> bool {
        self.digest
            .as_ref()
            .is_some_and(|expected| digest_eq(expected, candidate))
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("key", &format_args!("<redacted:{} bytes>", self.key.len()))
            .field("has_digest", &self.digest.is_some())
            .finish()
    }
}
