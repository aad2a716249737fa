//! Wattcher Protocol - wire format for the query socket
//!
//! A client connects, sends nothing, and receives exactly one line before
//! the daemon closes the connection:
//!
//! ```text
//! <pulses>;<watts>\n     steady or accelerating
//! <pulses>;<<watts>\n    decelerating (live estimate below last stored)
//! ```
//!
//! There are no other message types and no handshake.

pub mod line;

pub use line::{encode_reading, parse_reading, ProtocolError, MAX_LINE_BYTES};
pub use wattcher_core::Reading;
