use std::collections::HashMap;
use std::time::Duration;

use tcprims_codec::ActiveStream;
use tcprims_transport::{Endpoint, Fingerprint, DEFAULT_BUFFER_SIZE};
use tracing::debug;

/// Redundant endpoints behind one logical connection.
///
/// Entries are keyed by [`Fingerprint`] and remembered in insertion order.
/// The first destination ever registered becomes active; after that only
/// [`Registry::set_active`] and failover move the active pointer. Entries
/// are never removed.
#[derive(Debug)]
pub struct Registry {
    entries: HashMap<Fingerprint, Endpoint>,
    order: Vec<Fingerprint>,
    active: Option<Fingerprint>,
    rx_buffer_size: usize,
    tx_buffer_size: usize,
    connect_timeout: Option<Duration>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            active: None,
            rx_buffer_size: DEFAULT_BUFFER_SIZE,
            tx_buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: None,
        }
    }

    /// Buffer-size hints given to endpoints created from now on.
    pub fn with_buffer_sizes(mut self, rx: usize, tx: usize) -> Self {
        self.rx_buffer_size = rx;
        self.tx_buffer_size = tx;
        self
    }

    /// Connect timeout given to endpoints created from now on.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Look up the endpoint for `host:port`, creating an unopened one if new.
    ///
    /// The returned endpoint is not necessarily the active one.
    pub fn resolve_or_create(&mut self, host: &str, port: u16) -> &mut Endpoint {
        let fingerprint = Fingerprint::of(host, port);
        let order = &mut self.order;
        let active = &mut self.active;
        let (rx, tx, connect_timeout) =
            (self.rx_buffer_size, self.tx_buffer_size, self.connect_timeout);

        self.entries.entry(fingerprint).or_insert_with(|| {
            debug!(host, port, %fingerprint, "registering destination");
            order.push(fingerprint);
            if active.is_none() {
                *active = Some(fingerprint);
            }
            Endpoint::new(host, port)
                .with_buffer_sizes(rx, tx)
                .with_connect_timeout(connect_timeout)
        })
    }

    /// Make `fingerprint` active. Unknown fingerprints are ignored.
    pub fn set_active(&mut self, fingerprint: Fingerprint) {
        if self.entries.contains_key(&fingerprint) {
            self.active = Some(fingerprint);
        } else {
            debug!(%fingerprint, "ignoring set_active for unknown destination");
        }
    }

    /// First connected endpoint other than the active one, in insertion order.
    ///
    /// Makes no connection attempts and does not move the active pointer.
    pub fn failover(&mut self) -> Option<&mut Endpoint> {
        let candidate = self.failover_candidate()?;
        self.entries.get_mut(&candidate)
    }

    /// Fingerprint [`Registry::failover`] would return.
    pub fn failover_candidate(&self) -> Option<Fingerprint> {
        self.order
            .iter()
            .copied()
            .filter(|fingerprint| Some(*fingerprint) != self.active)
            .find(|fingerprint| {
                self.entries
                    .get(fingerprint)
                    .is_some_and(Endpoint::is_connected)
            })
    }

    /// Registered destinations other than the active one, in insertion order.
    pub fn alternates(&self) -> Vec<Fingerprint> {
        self.order
            .iter()
            .copied()
            .filter(|fingerprint| Some(*fingerprint) != self.active)
            .collect()
    }

    pub fn active_fingerprint(&self) -> Option<Fingerprint> {
        self.active
    }

    pub fn active_endpoint(&self) -> Option<&Endpoint> {
        self.active.and_then(|fingerprint| self.entries.get(&fingerprint))
    }

    pub fn active_endpoint_mut(&mut self) -> Option<&mut Endpoint> {
        let fingerprint = self.active?;
        self.entries.get_mut(&fingerprint)
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<&Endpoint> {
        self.entries.get(&fingerprint)
    }

    pub fn get_mut(&mut self, fingerprint: Fingerprint) -> Option<&mut Endpoint> {
        self.entries.get_mut(&fingerprint)
    }

    /// Known fingerprints in insertion order.
    pub fn fingerprints(&self) -> &[Fingerprint] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Close every endpoint. Entries and the active pointer are kept.
    pub fn close_all(&mut self) {
        for endpoint in self.entries.values_mut() {
            endpoint.close();
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveStream for Registry {
    fn active(&mut self) -> Option<&mut Endpoint> {
        self.active_endpoint_mut()
    }

    fn active_ref(&self) -> Option<&Endpoint> {
        self.active_endpoint()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use tcprims_transport::SystemResolver;

    use super::*;

    #[test]
    fn first_registration_becomes_active() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());
        assert!(registry.active_fingerprint().is_none());

        registry.resolve_or_create("127.0.0.1", 7000);
        registry.resolve_or_create("127.0.0.1", 7001);

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.active_fingerprint(),
            Some(Fingerprint::of("127.0.0.1", 7000))
        );
    }

    #[test]
    fn resolve_or_create_is_idempotent() {
        let mut registry = Registry::new();
        registry.resolve_or_create("localhost", 9000);
        let endpoint = registry.resolve_or_create("localhost", 9000);
        assert_eq!(endpoint.port(), 9000);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.fingerprints(), &[Fingerprint::of("localhost", 9000)]);
    }

    #[test]
    fn new_endpoints_inherit_hints() {
        let mut registry = Registry::new().with_buffer_sizes(1024, 2048);
        let endpoint = registry.resolve_or_create("localhost", 9000);
        assert_eq!(endpoint.buffer_size(tcprims_transport::Direction::Rx), 1024);
        assert_eq!(endpoint.buffer_size(tcprims_transport::Direction::Tx), 2048);
    }

    #[test]
    fn set_active_ignores_unknown() {
        let mut registry = Registry::new();
        registry.resolve_or_create("a", 1);
        registry.resolve_or_create("b", 2);

        registry.set_active(Fingerprint::of("zzz", 9));
        assert_eq!(registry.active_fingerprint(), Some(Fingerprint::of("a", 1)));

        registry.set_active(Fingerprint::of("b", 2));
        assert_eq!(registry.active_fingerprint(), Some(Fingerprint::of("b", 2)));
        assert_eq!(registry.alternates(), vec![Fingerprint::of("a", 1)]);
    }

    #[test]
    fn failover_returns_none_when_nothing_connected() {
        let mut registry = Registry::new();
        registry.resolve_or_create("a", 1);
        registry.resolve_or_create("b", 2);
        assert!(registry.failover().is_none());
        assert_eq!(registry.active_fingerprint(), Some(Fingerprint::of("a", 1)));
    }

    #[test]
    fn failover_skips_active_and_picks_first_connected() {
        let first = TcpListener::bind("127.0.0.1:0").unwrap();
        let second = TcpListener::bind("127.0.0.1:0").unwrap();
        let first_port = first.local_addr().unwrap().port();
        let second_port = second.local_addr().unwrap().port();

        let mut registry = Registry::new();
        registry.resolve_or_create("127.0.0.1", first_port);
        registry.resolve_or_create("127.0.0.1", 1);
        registry.resolve_or_create("127.0.0.1", second_port);

        registry
            .resolve_or_create("127.0.0.1", first_port)
            .connect(&SystemResolver)
            .unwrap();
        registry
            .resolve_or_create("127.0.0.1", second_port)
            .connect(&SystemResolver)
            .unwrap();
        let _accepted = (first.accept().unwrap(), second.accept().unwrap());

        let endpoint = registry.failover().expect("a connected alternate exists");
        assert_eq!(endpoint.port(), second_port);
        assert_eq!(
            registry.failover_candidate(),
            Some(Fingerprint::of("127.0.0.1", second_port))
        );
    }

    #[test]
    fn active_stream_follows_active_pointer() {
        let mut registry = Registry::new();
        assert!(registry.active().is_none());
        registry.resolve_or_create("a", 1);
        registry.resolve_or_create("b", 2);
        assert_eq!(registry.active_ref().map(Endpoint::port), Some(1));
        registry.set_active(Fingerprint::of("b", 2));
        assert_eq!(registry.active().map(|endpoint| endpoint.port()), Some(2));
        registry.close_all();
        assert_eq!(registry.len(), 2);
    }
}
