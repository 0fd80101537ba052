//! Talk to a blocking tcprims server from tokio using the line codec.
//!
//! Run with:
//!   cargo run --example async-line-client --features peer,async

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tcprims::codec::LineCodec;
use tcprims::peer::{Server, SocketConfig};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::new(SocketConfig::default())
        .with_read_callback(|frame| frame.to_ascii_uppercase());
    let addr = server.try_listen("127.0.0.1", 0)?;

    let stream = TcpStream::connect(addr).await?;
    let mut lines = Framed::new(stream, LineCodec::new());

    for word in ["alpha", "beta", "gamma"] {
        lines.send(Bytes::from(word)).await?;
        match lines.next().await {
            Some(reply) => print!("{}", String::from_utf8_lossy(&reply?)),
            None => break,
        }
    }

    server.shutdown();
    Ok(())
}
