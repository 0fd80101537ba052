use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    addr: String,
    port: u16,
    auth: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    event: &'static str,
    destination: &'a str,
    size: usize,
    reply: String,
    timestamp: String,
}

#[derive(Serialize)]
struct StoppedOutput {
    event: &'static str,
    drained: bool,
    timestamp: String,
}

/// First stdout line of `serve`: scripts read the bound port from it.
pub fn print_listening(addr: SocketAddr, auth: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            event: "listening",
            addr: addr.to_string(),
            port: addr.port(),
            auth,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LISTENING", "PORT", "AUTH"])
                .add_row(vec![addr.to_string(), addr.port().to_string(), auth.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("listening on {addr} (auth={auth})");
        }
    }
    let _ = std::io::stdout().flush();
}

pub fn print_reply(destination: &str, reply: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ReplyOutput {
            event: "reply",
            destination,
            size: reply.len(),
            reply: payload_preview(reply),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DESTINATION", "SIZE", "REPLY"])
                .add_row(vec![
                    destination.to_string(),
                    reply.len().to_string(),
                    payload_preview(reply),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "destination={} size={} reply={}",
                destination,
                reply.len(),
                payload_preview(reply)
            );
        }
        OutputFormat::Raw => print_raw(reply),
    }
}

pub fn print_stopped(drained: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StoppedOutput {
            event: "stopped",
            drained,
            timestamp: now_unix_seconds(),
        }),
        _ => println!("stopped (drained={drained})"),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Reply text without its delimiter, or a size marker for binary data.
fn payload_preview(payload: &[u8]) -> String {
    let trimmed = payload.strip_suffix(b"\n").unwrap_or(payload);
    match std::str::from_utf8(trimmed) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
