//! ELM327 AT-command session protocol
//!
//! Implements the text-based AT-command session with an ELM327-compatible
//! OBD-II interpreter: baud-rate negotiation, the initialization handshake,
//! command framing, and line-oriented response parsing/validation.
//!
//! The core stops once a validated line-based response has been received;
//! interpreting OBD-II PID payloads is up to the caller.

pub mod commands;
mod connection;
mod error;
pub mod establish;
mod negotiate;
mod response;
pub mod serial;
mod stream;

pub use commands::AtCommand;
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::ProtocolError;
pub use establish::{establish_connection, EstablishOptions};
pub use response::parse_response;
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{SerialLink, SerialPortLink};

/// Two-character prefix carried by every command on the wire
pub const AT_PREFIX: &str = "AT";

/// Single byte the interpreter emits when it is ready for the next command
pub const ELM_PROMPT: u8 = b'>';

/// Success token returned by configuration commands
pub const RESPONSE_OK: &str = "OK";

/// Candidate baud rates for auto-detection, in priority order.
/// The chip default (38400) is tried first.
pub const BAUD_RATE_CANDIDATES: [u32; 6] = [38_400, 9_600, 230_400, 115_200, 57_600, 19_200];

/// Default timeout for read cycles and per-candidate negotiation attempts,
/// in milliseconds.
///
/// This is the single configuration surface for link timing; override per
/// connection via [`ConnectionConfig::timeout_ms`].
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Maximum number of bytes captured in one read cycle
pub const MAX_RESPONSE_BYTES: usize = 4096;

/// Sleep between polls while waiting for the interpreter to produce data
pub(crate) const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(2);
