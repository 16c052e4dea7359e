//! Connection establishment
//!
//! Walks candidate ports until one accepts a session. All cross-port retry
//! policy lives here; the connection core itself never retries.

use tracing::{info, warn};

use super::connection::{Connection, ConnectionConfig};
use super::serial::list_ports;
use super::{ProtocolError, DEFAULT_TIMEOUT_MS};

/// Options for [`establish_connection`]
#[derive(Debug, Clone)]
pub struct EstablishOptions {
    /// Explicit port to use; `None` enumerates candidates
    pub port: Option<String>,
    /// Explicit baud rate; `None` auto-detects per port
    pub baud_rate: Option<u32>,
    /// Read/negotiation timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for EstablishOptions {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Try each candidate port in order and return the first connection that
/// reaches Ready.
///
/// With an explicit port only that one is tried. Per-port failures are
/// logged and the next candidate is attempted; no candidates at all, or
/// exhausting them, yields [`ProtocolError::PortUnavailable`].
pub fn establish_connection(options: &EstablishOptions) -> Result<Connection, ProtocolError> {
    let candidates: Vec<String> = match &options.port {
        Some(port) => vec![port.clone()],
        None => list_ports().into_iter().map(|p| p.name).collect(),
    };

    if candidates.is_empty() {
        return Err(ProtocolError::PortUnavailable(
            "no candidate serial ports found".to_string(),
        ));
    }

    for port_name in &candidates {
        let config = ConnectionConfig {
            port_name: port_name.clone(),
            baud_rate: options.baud_rate,
            timeout_ms: options.timeout_ms,
        };

        let mut connection = Connection::new(config);
        match connection.connect() {
            Ok(()) => {
                info!(port = %port_name, "successfully connected");
                return Ok(connection);
            }
            Err(e) => {
                warn!(port = %port_name, error = %e, "connection attempt failed");
            }
        }
    }

    Err(ProtocolError::PortUnavailable(format!(
        "failed to establish a connection on all {} candidate port(s)",
        candidates.len()
    )))
}
