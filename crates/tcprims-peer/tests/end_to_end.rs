use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tcprims_codec::Codec;
use tcprims_peer::{Client, Connection, RetryPolicy, Server, SocketConfig};
use tcprims_transport::Endpoint;

fn upper_server(config: SocketConfig) -> (Server, SocketAddr) {
    let mut server = Server::new(config).with_read_callback(|frame| frame.to_ascii_uppercase());
    let addr = server
        .try_listen("127.0.0.1", 0)
        .expect("server should bind");
    (server, addr)
}

fn echo_server(config: SocketConfig) -> (Server, SocketAddr) {
    let mut server = Server::new(config).with_read_callback(|frame| frame.to_vec());
    let addr = server
        .try_listen("127.0.0.1", 0)
        .expect("server should bind");
    (server, addr)
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("probe should bind");
    listener.local_addr().expect("probe has address").port()
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < timeout, "condition not met in {timeout:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn matching_key_authenticates() {
    let (_server, addr) = echo_server(SocketConfig::default().with_key("k1"));

    let mut client = Client::new(SocketConfig::default().with_key("k1"));
    assert!(client.authenticate("127.0.0.1", addr.port()));
    assert!(client.connected());
}

#[test]
fn wrong_key_is_rejected() {
    let (_server, addr) = echo_server(SocketConfig::default().with_key("k1"));

    let mut client = Client::new(SocketConfig::default().with_key("k2"));
    assert!(!client.authenticate("127.0.0.1", addr.port()));
    assert!(!client.connected());
}

#[test]
fn lines_round_trip_unmodified() {
    let (_server, addr) = echo_server(SocketConfig::default().with_key("k1"));
    let mut client = Client::new(SocketConfig::default().with_key("k1"));
    assert!(client.authenticate("127.0.0.1", addr.port()));

    let samples: [&[u8]; 5] = [
        b"hello world",
        b"",
        b"\x00\x01\x02\xff binary",
        b"tabs\tand\rcarriage returns",
        &[b'x'; 10_000],
    ];
    for sample in samples {
        let mut expected = sample.to_vec();
        expected.push(b'\n');
        let reply = client.request_line(sample).expect("request should succeed");
        assert_eq!(reply.as_ref(), expected.as_slice());
    }
}

#[test]
fn custom_delimiter_round_trip() {
    let (_server, addr) = echo_server(SocketConfig::default().with_eol(b';'));
    let mut client = Client::new(SocketConfig::default().with_eol(b';'));
    assert!(client.connect("127.0.0.1", addr.port()));

    let reply = client
        .request_line(b"line one\nstill one")
        .expect("request should succeed");
    assert_eq!(reply.as_ref(), b"line one\nstill one;");
}

#[test]
fn fixed_width_values_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let port = listener.local_addr().expect("listener has address").port();

    let mut client = Client::new(SocketConfig::default());
    assert!(client.connect("127.0.0.1", port));
    let (accepted, _) = listener.accept().expect("accept should succeed");
    let peer = Codec::new(Endpoint::from_stream(accepted).expect("stream should wrap"));

    let values = [0u32, 1, 0x0102_0304, 0xDEAD_BEEF, u32::MAX];
    for value in values {
        client.codec().write32(value).expect("write should succeed");
    }
    client.send().expect("flush should succeed");

    for value in values {
        assert_eq!(peer.read32().expect("read should succeed"), value);
    }
}

#[test]
fn failover_reaches_second_destination() {
    let (_server, addr) = upper_server(SocketConfig::default().with_key("k1"));
    let unreachable = closed_port();

    let mut client = Client::new(SocketConfig::default().with_key("k1"));
    client.add_destination("127.0.0.1", unreachable);
    client.add_destination("127.0.0.1", addr.port());

    assert!(!client.authenticate("127.0.0.1", unreachable));
    assert!(!client.connected());

    assert!(client.failover());
    assert!(client.connected());
    assert_eq!(
        client.active_destination(),
        Some(("127.0.0.1".to_string(), addr.port()))
    );

    let reply = client.request_line(b"after failover").expect("request should succeed");
    assert_eq!(reply.as_ref(), b"AFTER FAILOVER\n");
}

#[test]
fn failover_rejected_by_every_destination_gives_up() {
    let (_server, addr) = echo_server(SocketConfig::default().with_key("k1"));

    let mut client = Client::new(SocketConfig::default().with_key("wrong"));
    client.add_destination("127.0.0.1", closed_port());
    client.add_destination("127.0.0.1", addr.port());

    let policy = RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20));
    let start = Instant::now();
    assert!(!client.failover_with_retry(&policy));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!client.connected());
}

#[test]
fn fifty_concurrent_clients_get_their_own_replies() {
    const CLIENTS: usize = 50;
    let (server, addr) = upper_server(SocketConfig::default().with_key("k1").with_backlog(128));
    let barrier = Arc::new(Barrier::new(CLIENTS));

    let workers: Vec<_> = (0..CLIENTS)
        .map(|id| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut client = Client::new(SocketConfig::default().with_key("k1"));
                barrier.wait();
                assert!(client.authenticate("127.0.0.1", addr.port()));

                for round in 0..3 {
                    let frame = format!("client-{id}-round-{round}");
                    let reply = client
                        .request_line(frame.as_bytes())
                        .expect("request should succeed");
                    assert_eq!(reply.as_ref(), format!("{}\n", frame.to_uppercase()).as_bytes());
                }
                client
            })
        })
        .collect();

    let clients: Vec<Client> = workers
        .into_iter()
        .map(|worker| worker.join().expect("client thread should finish"))
        .collect();
    assert_eq!(server.active_connections(), CLIENTS);

    // The accept loop is still responsive after the burst.
    let mut late = Client::new(SocketConfig::default().with_key("k1"));
    assert!(late.authenticate("127.0.0.1", addr.port()));
    assert_eq!(
        late.request_line(b"late").expect("request should succeed").as_ref(),
        b"LATE\n"
    );

    drop(clients);
    drop(late);
    assert!(server.wait_for_drain(Duration::from_secs(5)));
}

#[test]
fn shutdown_stops_accepting_but_keeps_live_handlers() {
    let config = SocketConfig::default().with_accept_poll_interval(Duration::from_millis(10));
    let (mut server, addr) = echo_server(config);

    let mut client = Client::new(SocketConfig::default());
    assert!(client.connect("127.0.0.1", addr.port()));
    wait_until(Duration::from_secs(2), || server.active_connections() == 1);

    server.shutdown();
    wait_until(Duration::from_millis(500), || !server.is_running());
    server.join().expect("accept loop should stop cleanly");

    // The established handler was not cut: it answers the frame it was
    // blocked on, then observes the flag and exits.
    let reply = client.request_line(b"still here").expect("request should succeed");
    assert_eq!(reply.as_ref(), b"still here\n");
    assert!(server.wait_for_drain(Duration::from_secs(2)));

    // Nothing accepts on the old address any more.
    let mut newcomer = Client::new(SocketConfig::default());
    let accepted = newcomer.connect("127.0.0.1", addr.port())
        && newcomer.request_line(b"hello").is_ok_and(|reply| !reply.is_empty());
    assert!(!accepted);
}

#[test]
fn config_file_drives_both_sides() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file should be creatable");
    std::io::Write::write_all(
        &mut file,
        br#"{ "key": "from-file", "auth_mode": "digest", "read_timeout_ms": 1000 }"#,
    )
    .expect("config should be writable");

    let config = SocketConfig::from_file(file.path()).expect("config should load");
    let (_server, addr) = echo_server(config.clone());

    let mut client = Client::new(config);
    assert!(client.authenticate("127.0.0.1", addr.port()));
    assert_eq!(
        client.request_line(b"ping").expect("request should succeed").as_ref(),
        b"ping\n"
    );
}
