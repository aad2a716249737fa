//! The dispatch loop and query server.
//!
//! One `select!` loop owns everything the daemon reacts to: the
//! cancellation token, the pulse pin's priority readiness, and the query
//! socket. Both kinds of work are handled inline on the loop's thread -
//! nothing is spawned per event - so pulse updates and query snapshots
//! are strictly serialized: a query answered after an edge always
//! observes that edge.
//!
//! A query is a bare connect: the client sends nothing, receives one
//! line, and the connection is closed.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection write failures are logged and isolated; failures of
//!   core operations unwind the loop through cleanup instead of crashing

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt as _;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wattcher_core::RateState;
use wattcher_protocol::encode_reading;

/// Default socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/wattcher.sock";

/// Socket mode: any local user may query the meter.
const SOCKET_MODE: u32 = 0o777;

/// Bound on one response write; a local client that stalls longer is
/// dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Readiness seam between the dispatcher and the pulse hardware.
///
/// `edge_ready` suspends until the underlying descriptor reports an edge;
/// `rearm` clears the level condition so the next wait can fire again.
/// Re-arming after every wake - and once before the first wait - is part
/// of the protocol, not optional cleanup: a never-cleared condition
/// re-fires immediately.
#[allow(async_fn_in_trait)]
pub trait EdgeSource {
    /// Suspends until the edge descriptor signals a transition.
    async fn edge_ready(&mut self) -> io::Result<()>;

    /// Clears the level-ready condition after a notification.
    fn rearm(&mut self) -> io::Result<()>;
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to set up socket at {}: {source}", path.display())]
    SocketSetup { path: PathBuf, source: io::Error },

    #[error("failed to accept connection: {0}")]
    Accept(io::Error),

    #[error("edge descriptor wait failed: {0}")]
    EdgeWait(io::Error),

    #[error("failed to re-arm edge descriptor: {0}")]
    EdgeRearm(io::Error),
}

/// The daemon's reactor: owns the rate state, the edge source and the
/// query socket, and dispatches between them until shutdown.
pub struct DaemonServer<E> {
    /// Path of the Unix socket served to clients
    socket_path: PathBuf,

    /// Pulse hardware (or a test double)
    edges: E,

    /// Exclusive rate state; mutated only from the dispatch loop
    state: RateState,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl<E: EdgeSource> DaemonServer<E> {
    /// Creates a new server.
    ///
    /// # Arguments
    ///
    /// * `socket_path` - Path where the Unix socket will be created
    /// * `edges` - The configured edge source for the pulse pin
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        socket_path: impl Into<PathBuf>,
        edges: E,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            edges,
            state: RateState::new(),
            cancel_token,
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the dispatch loop until cancellation or an I/O failure.
    ///
    /// The socket path is removed on the way out in both cases; the
    /// returned result distinguishes a requested shutdown (`Ok`) from one
    /// forced by a failed core operation (`Err`), and the process exit
    /// code should follow it.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let listener = self.bind()?;

        // An edge recorded before the loop starts would make the first
        // wait return immediately; drain it up front.
        self.edges.rearm().map_err(ServerError::EdgeRearm)?;

        info!(socket = %self.socket_path.display(), "query server listening");

        let result = self.dispatch(&listener).await;

        self.cleanup();
        result
    }

    /// Binds the listener, replacing any socket a previous run left
    /// behind, and opens it up to all local users.
    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup = |source| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            source,
        };

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path).map_err(setup)?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(setup)?;

        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(setup)?;

        Ok(listener)
    }

    async fn dispatch(&mut self, listener: &UnixListener) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                }

                ready = self.edges.edge_ready() => {
                    ready.map_err(ServerError::EdgeWait)?;
                    // Re-arm before touching state; the condition is
                    // level-triggered and must be cleared either way.
                    self.edges.rearm().map_err(ServerError::EdgeRearm)?;
                    self.state.record_pulse(Instant::now());
                    debug!(
                        pulses = self.state.pulse_count(),
                        watts = self.state.watts(),
                        "pulse recorded"
                    );
                }

                accepted = listener.accept() => {
                    let (stream, _addr) = accepted.map_err(ServerError::Accept)?;
                    self.answer_query(stream).await;
                }
            }
        }
    }

    /// Writes one reading to the client and closes the connection.
    ///
    /// A write failure is this client's problem only: it never touches
    /// the rate state and never brings the loop down.
    async fn answer_query(&self, mut stream: UnixStream) {
        let reading = self.state.reading_at(Instant::now());
        let line = encode_reading(&reading);

        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        };

        match timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => debug!(
                pulses = reading.pulses,
                watts = reading.watts,
                decelerating = reading.decelerating,
                "query answered"
            ),
            Ok(Err(e)) => warn!(error = %e, "failed to write reading to client"),
            Err(_) => warn!("client write timed out"),
        }
    }

    /// Releases the socket path on the way out.
    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
            }
        }
        info!("server cleanup complete");
    }
}
