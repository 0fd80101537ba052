use std::io::ErrorKind;
use std::time::Duration;

use tcprims_codec::{ActiveStream, Codec, CodecError};
use tracing::{debug, warn};

use crate::auth::{AuthConfig, AuthStatus};
use crate::error::{PeerError, Result};

/// Default bound on each blocking handshake read.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress of one side of the handshake.
///
/// ```text
/// Idle -> ChallengeSent (client) / ChallengeExpected (server) -> Decided
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    ChallengeSent,
    ChallengeExpected,
    Decided(AuthStatus),
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Decided(_))
    }
}

/// Timeouts applied around the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Read timeout while waiting for the peer. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
    /// Read timeout restored once the handshake finishes.
    pub read_timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            read_timeout: None,
        }
    }
}

/// Client side: present the key digest and wait for the verdict.
///
/// Returns `Ok(())` only on `AUTH_OK`. On any failure the active endpoint is
/// shut down before returning; the owner releases it with
/// [`Endpoint::close`](tcprims_transport::Endpoint::close).
pub fn handshake_client<S: ActiveStream>(
    codec: &Codec<S>,
    auth: &AuthConfig,
    config: &HandshakeConfig,
) -> Result<()> {
    let Some(digest) = auth.digest_bytes() else {
        return Err(PeerError::HandshakeFailed(
            "digest auth requires a non-empty key".to_string(),
        ));
    };

    let result = with_timeout(codec, config, |state| {
        codec.write128(digest)?;
        codec.send()?;
        *state = HandshakeState::ChallengeSent;

        let byte = codec.read8().map_err(|err| read_failure(err, config))?;
        match AuthStatus::from_byte(byte) {
            Some(status) => {
                *state = HandshakeState::Decided(status);
                match status {
                    AuthStatus::Ok => Ok(()),
                    AuthStatus::Failed => Err(PeerError::AuthRejected),
                }
            }
            None => {
                *state = HandshakeState::Decided(AuthStatus::Failed);
                Err(PeerError::ProtocolViolation(byte))
            }
        }
    });

    if let Err(err) = &result {
        warn!(error = %err, "client handshake failed");
        if let Some(endpoint) = codec.get_ref().active_ref() {
            endpoint.shutdown();
        }
    }
    result
}

/// Server side: read the presented digest, compare, answer with one status byte.
///
/// The status byte is sent even on mismatch, so the client always gets a
/// verdict. Returns [`PeerError::AuthRejected`] on mismatch; closing the
/// connection is left to the caller.
pub fn handshake_server<S: ActiveStream>(
    codec: &Codec<S>,
    auth: &AuthConfig,
    config: &HandshakeConfig,
) -> Result<()> {
    with_timeout(codec, config, |state| {
        *state = HandshakeState::ChallengeExpected;
        let presented = codec
            .read128()
            .map_err(|err| read_failure(err, config))?;

        let status = if auth.verify(&presented) {
            AuthStatus::Ok
        } else {
            AuthStatus::Failed
        };
        codec.write8(status.as_byte())?;
        codec.send()?;
        *state = HandshakeState::Decided(status);

        match status {
            AuthStatus::Ok => Ok(()),
            AuthStatus::Failed => {
                warn!("peer presented a non-matching digest");
                Err(PeerError::AuthRejected)
            }
        }
    })
}

fn with_timeout<S: ActiveStream, T>(
    codec: &Codec<S>,
    config: &HandshakeConfig,
    body: impl FnOnce(&mut HandshakeState) -> Result<T>,
) -> Result<T> {
    set_read_timeout(codec, config.timeout)?;
    let mut state = HandshakeState::Idle;
    let result = body(&mut state);
    debug!(?state, ok = result.is_ok(), "handshake finished");

    if let Err(err) = set_read_timeout(codec, config.read_timeout) {
        debug!(error = %err, "read timeout not restored after handshake");
    }
    result
}

fn set_read_timeout<S: ActiveStream>(codec: &Codec<S>, timeout: Option<Duration>) -> Result<()> {
    let endpoint = codec
        .get_ref()
        .active_ref()
        .ok_or(PeerError::NoDestination)?;
    if !endpoint.is_connected() {
        return Err(PeerError::Disconnected(
            "not connected before handshake".to_string(),
        ));
    }
    endpoint.set_read_timeout(timeout)?;
    Ok(())
}

fn read_failure(err: CodecError, config: &HandshakeConfig) -> PeerError {
    match err {
        CodecError::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            PeerError::Timeout(config.timeout.unwrap_or_default())
        }
        CodecError::ConnectionClosed => {
            PeerError::Disconnected("connection closed during handshake".to_string())
        }
        other => PeerError::Codec(other),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use tcprims_transport::{Endpoint, SystemResolver};

    use super::*;
    use crate::auth::{digest, AUTH_FAILED, AUTH_OK};

    fn connect_pair() -> (Codec<Endpoint>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut endpoint = Endpoint::new("127.0.0.1", port);
        endpoint.connect(&SystemResolver).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        (Codec::new(endpoint), accepted)
    }

    fn codec_pair() -> (Codec<Endpoint>, Codec<Endpoint>) {
        let (client, accepted) = connect_pair();
        (client, Codec::new(Endpoint::from_stream(accepted).unwrap()))
    }

    #[test]
    fn matching_keys_authenticate() {
        let (client, server) = codec_pair();
        let server_thread = thread::spawn(move || {
            let result = handshake_server(
                &server,
                &AuthConfig::digest("k1"),
                &HandshakeConfig::default(),
            );
            (result, server)
        });

        handshake_client(&client, &AuthConfig::digest("k1"), &HandshakeConfig::default())
            .expect("handshake should succeed");
        let (result, _server) = server_thread.join().expect("server thread should finish");
        assert!(result.is_ok());
        assert!(client.is_connected());
    }

    #[test]
    fn mismatched_keys_are_rejected_and_client_disconnects() {
        let (client, server) = codec_pair();
        let server_thread = thread::spawn(move || {
            handshake_server(
                &server,
                &AuthConfig::digest("k1"),
                &HandshakeConfig::default(),
            )
        });

        let result = handshake_client(&client, &AuthConfig::digest("k2"), &HandshakeConfig::default());
        assert!(matches!(result, Err(PeerError::AuthRejected)));
        assert!(!client.is_connected());
        assert!(matches!(
            server_thread.join().expect("server thread should finish"),
            Err(PeerError::AuthRejected)
        ));
    }

    #[test]
    fn server_sends_exact_wire_bytes() {
        let (mut raw, accepted) = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            let (accepted, _) = listener.accept().unwrap();
            (raw, accepted)
        };
        let server = Codec::new(Endpoint::from_stream(accepted).unwrap());
        let server_thread = thread::spawn(move || {
            handshake_server(
                &server,
                &AuthConfig::digest("k1"),
                &HandshakeConfig::default(),
            )
        });

        raw.write_all(&digest(b"k1")).unwrap();
        let mut status = [0xFFu8; 1];
        raw.read_exact(&mut status).unwrap();
        assert_eq!(status[0], AUTH_OK);
        assert!(server_thread.join().unwrap().is_ok());
    }

    #[test]
    fn failure_byte_is_sent_before_rejecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let server = Codec::new(Endpoint::from_stream(accepted).unwrap());
        let server_thread = thread::spawn(move || {
            handshake_server(&server, &AuthConfig::digest(""), &HandshakeConfig::default())
        });

        // An empty server key rejects even the digest of the empty string.
        raw.write_all(&digest(b"")).unwrap();
        let mut status = [0u8; 1];
        raw.read_exact(&mut status).unwrap();
        assert_eq!(status[0], AUTH_FAILED);
        assert!(matches!(
            server_thread.join().unwrap(),
            Err(PeerError::AuthRejected)
        ));
    }

    #[test]
    fn unknown_status_byte_is_a_protocol_violation() {
        let (client, mut raw) = connect_pair();
        let fake_server = thread::spawn(move || {
            let mut presented = [0u8; 16];
            raw.read_exact(&mut presented).unwrap();
            raw.write_all(&[0x07]).unwrap();
            raw
        });

        let result = handshake_client(&client, &AuthConfig::digest("k1"), &HandshakeConfig::default());
        assert!(matches!(result, Err(PeerError::ProtocolViolation(0x07))));
        assert!(!client.is_connected());
        drop(fake_server.join().unwrap());
    }

    #[test]
    fn silent_server_times_out() {
        let (client, raw) = connect_pair();
        let config = HandshakeConfig {
            timeout: Some(Duration::from_millis(50)),
            read_timeout: None,
        };

        let result = handshake_client(&client, &AuthConfig::digest("k1"), &config);
        assert!(matches!(result, Err(PeerError::Timeout(_))));
        drop(raw);
    }

    #[test]
    fn peer_closing_mid_handshake_is_a_disconnect() {
        let (client, raw) = connect_pair();
        drop(raw);

        let result = handshake_client(&client, &AuthConfig::digest("k1"), &HandshakeConfig::default());
        assert!(matches!(
            result,
            Err(PeerError::Disconnected(_)) | Err(PeerError::Codec(_))
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn client_without_digest_refuses() {
        let (client, _raw) = connect_pair();
        let result = handshake_client(&client, &AuthConfig::digest(""), &HandshakeConfig::default());
        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn terminal_state() {
        assert!(!HandshakeState::Idle.is_terminal());
        assert!(!HandshakeState::ChallengeSent.is_terminal());
        assert!(HandshakeState::Decided(AuthStatus::Failed).is_terminal());
    }
}
