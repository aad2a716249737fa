//! Wattcher Core - domain types for pulse-rate monitoring
//!
//! This crate provides the types shared between the daemon (wattcherd)
//! and the query client:
//! - `rate` - the pulse-rate state and the fixed-point power computation
//! - `error` - domain error types
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()` outside of tests.

pub mod error;
pub mod rate;

// Re-exports for convenience
pub use error::{RateError, RateResult};
pub use rate::{watts_from_gap, RateState, Reading, METER_C_VALUE};
