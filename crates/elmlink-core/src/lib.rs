//! # ElmLink Core Library
//!
//! Session layer for ELM327-compatible OBD-II interpreter chips over a
//! serial link.

#![warn(missing_docs)]

//!
//! This library provides:
//! - Baud rate auto-detection against the chip's candidate rates
//! - The AT-command initialization handshake (reset, echo, headers,
//!   linefeeds)
//! - Command framing and line-oriented response parsing/validation
//! - Candidate-port connection establishment
//!
//! Interpreting the OBD-II payloads carried in the validated responses is
//! left to the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use elmlink_core::protocol::{establish_connection, AtCommand, EstablishOptions};
//!
//! // Find an adapter on any port, auto-detecting the baud rate
//! let mut conn = establish_connection(&EstablishOptions::default())?;
//!
//! // Session is configured; talk to the chip
//! let lines = conn.send("0100", None)?;
//! println!("supported PIDs: {:?}", lines);
//!
//! conn.close()?;
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        establish_connection, AtCommand, Connection, ConnectionConfig, ConnectionState,
        EstablishOptions, ProtocolError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
