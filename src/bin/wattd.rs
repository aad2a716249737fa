//! Wattcher Daemon - meter pulse watcher and query server
//!
//! This binary watches the utility meter's pulse output on a GPIO pin
//! and serves the current power estimate to local clients over a Unix
//! socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! wattd start
//!
//! # Start the daemon (background/daemonized)
//! wattd start -d
//!
//! # Stop the daemon
//! wattd stop
//!
//! # Check daemon status
//! wattd status
//!
//! # Start with custom socket path
//! WATTD_SOCKET=/run/wattcher.sock wattd start
//!
//! # Enable debug logging
//! RUST_LOG=wattcherd=debug wattd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGHUP/SIGINT/SIGQUIT/SIGTERM: graceful shutdown
//! - SIGPIPE: ignored (a disconnected client must not kill the daemon)

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wattcherd::gpio::{self, EdgePin, GpioChip};
use wattcherd::server::{DaemonServer, DEFAULT_SOCKET_PATH};
use wattcherd::signals::spawn_signal_listener;

/// Wattcher daemon - utility meter pulse watcher
#[derive(Parser, Debug)]
#[command(name = "wattd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("wattcher");
    state_dir.join("wattd.pid")
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("wattcher");
    state_dir.join("wattd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    // /proc/{pid} check; this daemon is Linux-only anyway
    PathBuf::from(format!("/proc/{}", pid)).exists()
}

/// Checks if the daemon is already running.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file - remove it
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {}", pid);
    }
    Ok(())
}

/// Returns the socket path, honoring the environment override.
fn socket_path() -> String {
    env::var("WATTD_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Default to 'start' if no subcommand given
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            // Check if already running
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {})", pid);
                eprintln!("Use 'wattd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting the tokio runtime
                daemonize()?;
            }

            // Write PID file
            write_pid()?;

            // Run the async main
            let result = run_daemon();

            // Clean up PID file on exit
            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {})...", pid);
                stop_daemon(pid)?;

                // Wait for the process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {})", pid);

                // Also check the socket
                let socket = socket_path();
                if PathBuf::from(&socket).exists() {
                    println!("Socket: {}", socket);
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    // Ensure the log directory exists
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
///
/// Single-threaded on purpose: the dispatch loop is the only place that
/// touches the rate state, and the current-thread flavor keeps every
/// handler strictly serialized with no locks.
#[tokio::main(flavor = "current_thread")]
async fn run_daemon() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wattd=info".parse()?)
                .add_directive("wattcherd=info".parse()?)
                .add_directive("wattcher_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "wattcher daemon starting"
    );

    let socket = socket_path();

    // Create the cancellation token and wire termination signals into it
    let cancel_token = CancellationToken::new();
    let _signal_task = spawn_signal_listener(cancel_token.clone())
        .context("Failed to register signal handlers")?;

    // Configure the pulse pin; whatever happens afterwards, give the pin
    // back to the kernel on the way out.
    let chip = GpioChip::new();
    let result = run_server(&chip, &socket, cancel_token).await;

    if let Err(e) = chip.unexport(gpio::PULSE_PIN) {
        warn!(error = %e, "failed to unexport pulse pin");
    }

    info!("wattcher daemon stopped");
    result
}

/// Sets up the pulse pin and runs the dispatch loop until shutdown.
async fn run_server(chip: &GpioChip, socket: &str, cancel_token: CancellationToken) -> Result<()> {
    let pin = EdgePin::configure(chip, gpio::PULSE_PIN, gpio::TRIGGER_EDGE)
        .await
        .context("Failed to configure pulse pin")?;

    // The sysfs interface cannot enable the internal pull-up
    gpio::enable_pullup(gpio::PULSE_PIN).context("Failed to enable internal pull-up")?;

    let server = DaemonServer::new(socket, pin, cancel_token);

    info!(socket = %socket, "starting query server");

    server.run().await.context("Server error")?;

    Ok(())
}
