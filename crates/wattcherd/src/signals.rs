//! Termination-signal plumbing.
//!
//! SIGHUP, SIGINT, SIGQUIT and SIGTERM all mean "stop"; whichever
//! arrives first cancels the shutdown token and the dispatch loop winds
//! down on its next wake. SIGPIPE needs no handler here: the Rust
//! runtime installs SIG_IGN before `main`, and a disconnected client
//! surfaces as an ordinary write error on the query path.

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Registered handlers for every signal that requests shutdown.
struct TerminationSignals {
    hangup: Signal,
    interrupt: Signal,
    quit: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    fn register() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Spawns a task that cancels `token` on the first termination signal.
///
/// Registration happens before the task is spawned, so a failure to
/// install a handler is reported to the caller as a setup error rather
/// than silently losing shutdown delivery.
pub fn spawn_signal_listener(
    token: CancellationToken,
) -> io::Result<tokio::task::JoinHandle<()>> {
    let mut signals = TerminationSignals::register()?;

    Ok(tokio::spawn(async move {
        let name = signals.recv().await;
        info!(signal = name, "termination signal received");
        token.cancel();
    }))
}
