//! Minimal echo server: answers every line with the same line.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1 7878 --key example --data hello

use std::thread;
use std::time::Duration;

use tcprims::peer::{Server, SocketConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SocketConfig::default().with_key("example");
    let mut server = Server::new(config).with_read_callback(|frame| {
        eprintln!("Received {} bytes", frame.len());
        frame.to_vec()
    });

    let addr = server.try_listen("127.0.0.1", 7878)?;
    eprintln!("Listening on {addr}");

    // Serve for a minute, then stop accepting and let open connections finish.
    thread::sleep(Duration::from_secs(60));
    server.shutdown();
    if !server.wait_for_drain(Duration::from_secs(5)) {
        eprintln!("{} connections still open", server.active_connections());
    }
    server.join()?;
    Ok(())
}
