use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tcprims_peer::{AuthMode, Server};
use tracing::info;

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, print_stopped, OutputFormat};

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.socket.to_config()?;
    let drain_timeout = parse_duration(&args.drain_timeout)?;
    let auth = match config.auth_mode {
        AuthMode::Off => "off",
        AuthMode::Digest => "digest",
    };

    let reply = args.reply;
    let mut server = Server::new(config).with_read_callback(move |frame| reply.apply(frame));
    let addr = server
        .try_listen(&args.host, args.port)
        .map_err(|err| peer_error("listen failed", err))?;
    print_listening(addr, auth, format);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) && server.is_running() {
        thread::sleep(WATCH_INTERVAL);
    }

    info!(
        connections = server.active_connections(),
        "stopping server"
    );
    server.shutdown();
    let drained = server.wait_for_drain(drain_timeout);
    server
        .join()
        .map_err(|err| peer_error("listener failed", err))?;

    print_stopped(drained, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
