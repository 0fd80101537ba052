use std::fs;

use tcprims_peer::{Client, Connection, RetryPolicy};
use tracing::warn;

use crate::cmd::{parse_destination, parse_duration, SendArgs};
use crate::exit::{io_error, peer_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let config = args
        .socket
        .to_config()?
        .with_connect_timeout(Some(connect_timeout));
    let payload = resolve_payload(&args)?;

    let mut client = Client::new(config);
    for destination in &args.failover {
        let (host, port) = parse_destination(destination)?;
        client.add_destination(&host, port);
    }

    let primary = if client.auth().is_enabled() {
        client.try_authenticate(&args.host, args.port)
    } else {
        client.try_connect(&args.host, args.port)
    };

    if let Err(err) = primary {
        if args.failover.is_empty() {
            return Err(peer_error("connect failed", err));
        }
        warn!(error = %err, "primary destination failed, trying failover");
        let policy = RetryPolicy {
            max_attempts: args.retries.max(1),
            ..RetryPolicy::default()
        };
        if !client.failover_with_retry(&policy) {
            return Err(peer_error("failover exhausted", err));
        }
    }

    let reply = client
        .request_line(&payload)
        .map_err(|err| peer_error("request failed", err))?;
    let destination = client
        .active_destination()
        .map(|(host, port)| format!("{host}:{port}"))
        .unwrap_or_default();
    print_reply(&destination, &reply, format);

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
