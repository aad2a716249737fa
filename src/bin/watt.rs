//! Wattcher query client
//!
//! One-shot client for the wattcher daemon: connects to the query
//! socket, reads the single response line, and prints the reading.
//!
//! # Usage
//!
//! ```bash
//! watt           # human-readable reading
//! watt --json    # machine-readable reading
//! WATTD_SOCKET=/run/wattcher.sock watt
//! ```

use std::env;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;

use wattcher_protocol::parse_reading;
use wattcherd::server::DEFAULT_SOCKET_PATH;

/// Query the wattcher daemon for the current power reading
#[derive(Parser, Debug)]
#[command(name = "watt", version, about)]
struct Args {
    /// Print the reading as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let socket_path =
        env::var("WATTD_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string());

    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("failed to connect to {socket_path} (is wattd running?)"))?;

    let mut line = String::new();
    BufReader::new(stream)
        .read_line(&mut line)
        .await
        .context("failed to read reading from daemon")?;

    let reading = parse_reading(&line)
        .with_context(|| format!("daemon sent a malformed reading: {line:?}"))?;

    if args.json {
        println!("{}", serde_json::to_string(&reading)?);
    } else {
        let trend = if reading.decelerating { ", falling" } else { "" };
        println!(
            "{}  {} W ({} pulses{trend})",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            reading.watts,
            reading.pulses,
        );
    }

    Ok(())
}
