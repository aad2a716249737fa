//! Wattcher Daemon - GPIO pulse dispatcher and query server
//!
//! This crate provides the infrastructure for the wattd daemon:
//! - `gpio` - sysfs access to the meter's pulse pin (setup, edge
//!   readiness, re-arming)
//! - `server` - the single-threaded dispatch loop and query server
//! - `signals` - termination-signal plumbing into the cancellation token
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     wattd daemon                         │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  hardware edge          client connect                   │
//! │       │                      │                           │
//! │       ▼                      ▼                           │
//! │  ┌─────────┐          ┌──────────────┐                   │
//! │  │ EdgePin │          │ UnixListener │                   │
//! │  └────┬────┘          └──────┬───────┘                   │
//! │       │ priority-ready       │ accept                    │
//! │       ▼                      ▼                           │
//! │  ┌────────────────────────────────────┐                  │
//! │  │    DaemonServer (select loop)      │                  │
//! │  │  edge → re-arm → record pulse      │                  │
//! │  │  query → snapshot → one line       │                  │
//! │  └─────────────────┬──────────────────┘                  │
//! │                    │                                     │
//! │                    ▼                                     │
//! │              ┌───────────┐                               │
//! │              │ RateState │  (single owner, no locks)     │
//! │              └───────────┘                               │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything the daemon reacts to funnels through one select loop on one
//! thread, so pulse updates and query snapshots are strictly serialized.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`

pub mod gpio;
pub mod server;
pub mod signals;
