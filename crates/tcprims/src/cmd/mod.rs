use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use tcprims_peer::SocketConfig;

use crate::exit::{peer_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and answer every line through a built-in callback.
    Serve(ServeArgs),
    /// Send one line and print the reply.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Settings shared by `serve` and `send`.
#[derive(Args, Debug, Clone)]
pub struct SocketArgs {
    /// JSON configuration file; flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Shared secret; enables digest auth.
    #[arg(long, env = "TCPRIMS_KEY", hide_env_values = true)]
    pub key: Option<String>,
    /// Frame delimiter: one ASCII character, or \n, \r, \t, \0.
    #[arg(long, value_name = "CHAR")]
    pub eol: Option<String>,
    /// Read timeout for ordinary traffic (e.g. 500ms, 2s).
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
}

impl SocketArgs {
    pub fn to_config(&self) -> CliResult<SocketConfig> {
        let mut config = match &self.config {
            Some(path) => SocketConfig::from_file(path)
                .map_err(|err| peer_error("config load failed", err))?,
            None => SocketConfig::default(),
        };
        if let Some(key) = &self.key {
            config = config.with_key(key.clone());
        }
        if let Some(eol) = &self.eol {
            config = config.with_eol(parse_eol(eol)?);
        }
        if let Some(timeout) = &self.read_timeout {
            config = config.with_read_timeout(Some(parse_duration(timeout)?));
        }
        Ok(config)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReplyMode {
    /// Return each frame unchanged.
    Echo,
    /// Return each frame in ASCII upper case.
    Upper,
}

impl ReplyMode {
    pub fn apply(self, frame: &[u8]) -> Vec<u8> {
        match self {
            ReplyMode::Echo => frame.to_vec(),
            ReplyMode::Upper => frame.to_ascii_uppercase(),
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host or address to bind.
    pub host: String,
    /// Port to bind; 0 picks a free port.
    pub port: u16,
    #[command(flatten)]
    pub socket: SocketArgs,
    /// How to answer each frame.
    #[arg(long, value_enum, default_value = "echo")]
    pub reply: ReplyMode,
    /// How long to wait for open connections after Ctrl-C.
    #[arg(long, default_value = "5s")]
    pub drain_timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Destination host.
    pub host: String,
    /// Destination port.
    pub port: u16,
    #[command(flatten)]
    pub socket: SocketArgs,
    /// Line to send.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the line from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Redundant destinations (host:port, comma-separated) tried when the
    /// primary fails.
    #[arg(long, value_delimiter = ',', value_name = "HOST:PORT")]
    pub failover: Vec<String>,
    /// Failover passes before giving up.
    #[arg(long, default_value = "1")]
    pub retries: u32,
    /// Bound on each connect attempt.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_eol(input: &str) -> CliResult<u8> {
    match input {
        "\\n" => Ok(b'\n'),
        "\\r" => Ok(b'\r'),
        "\\t" => Ok(b'\t'),
        "\\0" => Ok(0),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => Err(CliError::new(
            USAGE,
            format!("--eol must be a single ASCII character, got {other:?}"),
        )),
    }
}

/// Split `host:port`; IPv6 hosts may be bracketed.
pub fn parse_destination(input: &str) -> CliResult<(String, u16)> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("expected host:port, got {input:?}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(CliError::new(USAGE, format!("missing host in {input:?}")));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| CliError::new(USAGE, format!("invalid port in {input:?}")))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn delimiters() {
        assert_eq!(parse_eol("\\n").unwrap(), b'\n');
        assert_eq!(parse_eol(";").unwrap(), b';');
        assert_eq!(parse_eol("\\0").unwrap(), 0);
        assert_eq!(parse_eol("ab").unwrap_err().code, USAGE);
    }

    #[test]
    fn destinations() {
        assert_eq!(
            parse_destination("127.0.0.1:9000").unwrap(),
            ("127.0.0.1".to_string(), 9000)
        );
        assert_eq!(parse_destination("[::1]:80").unwrap(), ("::1".to_string(), 80));
        assert!(parse_destination("no-port").is_err());
        assert!(parse_destination(":80").is_err());
        assert!(parse_destination("host:99999").is_err());
    }

    #[test]
    fn reply_modes() {
        assert_eq!(ReplyMode::Echo.apply(b"abc\n"), b"abc\n");
        assert_eq!(ReplyMode::Upper.apply(b"abc\n"), b"ABC\n");
    }

    #[test]
    fn flags_override_defaults() {
        let args = SocketArgs {
            config: None,
            key: Some("k1".to_string()),
            eol: Some(";".to_string()),
            read_timeout: Some("200ms".to_string()),
        };
        let config = args.to_config().unwrap();
        assert!(config.auth_config().is_enabled());
        assert_eq!(config.eol_byte, b';');
        assert_eq!(config.read_timeout(), Some(Duration::from_millis(200)));
    }
}
