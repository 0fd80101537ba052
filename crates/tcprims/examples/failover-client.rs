//! Client with two redundant servers: the first is never started, so the
//! client fails over to the second.
//!
//! Run with:
//!   cargo run --example failover-client --features peer

use std::time::Duration;

use tcprims::peer::{Client, Connection, RetryPolicy, Server, SocketConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SocketConfig::default().with_key("example");

    let mut backup = Server::new(config.clone()).with_read_callback(|frame| {
        let mut reply = b"backup: ".to_vec();
        reply.extend_from_slice(frame);
        reply
    });
    let backup_addr = backup.try_listen("127.0.0.1", 0)?;

    let mut client = Client::new(config.with_connect_timeout(Some(Duration::from_secs(1))));
    client.add_destination("127.0.0.1", 1);
    client.add_destination("127.0.0.1", backup_addr.port());

    if !client.authenticate("127.0.0.1", 1) {
        eprintln!("primary unavailable, failing over");
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
        if !client.failover_with_retry(&policy) {
            return Err("no destination reachable".into());
        }
    }

    let reply = client.request_line(b"hello")?;
    print!("{}", String::from_utf8_lossy(&reply));
    eprintln!("active destination: {:?}", client.active_destination());

    backup.shutdown();
    Ok(())
}
