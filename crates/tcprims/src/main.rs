mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "tcprims", version, about = "TCP line transport test driver")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_failover_list() {
        let cli = Cli::try_parse_from([
            "tcprims",
            "send",
            "127.0.0.1",
            "9000",
            "--data",
            "hello",
            "--failover",
            "127.0.0.1:9001,127.0.0.1:9002",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.failover.len(), 2);
        assert_eq!(args.port, 9000);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "tcprims",
            "send",
            "127.0.0.1",
            "9000",
            "--data",
            "hello",
            "--file",
            "/tmp/payload",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_serve_with_reply_mode() {
        let cli = Cli::try_parse_from([
            "tcprims",
            "serve",
            "127.0.0.1",
            "0",
            "--reply",
            "upper",
            "--key",
            "k1",
        ])
        .expect("serve args should parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.reply, cmd::ReplyMode::Upper);
        assert_eq!(args.socket.key.as_deref(), Some("k1"));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(Cli::try_parse_from(["tcprims", "serve", "127.0.0.1", "70000"]).is_err());
    }
}
