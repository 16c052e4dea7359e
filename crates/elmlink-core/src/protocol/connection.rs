//! Connection management
//!
//! Owns the session lifecycle with the interpreter: baud selection, the
//! configuration handshake, validated command exchange, and teardown.

use serde::{Deserialize, Serialize};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::commands::AtCommand;
use super::negotiate::negotiate_baud_rate;
use super::response::parse_response;
use super::serial::open_port;
use super::stream::{SerialLink, SerialPortLink};
use super::{
    ProtocolError, BAUD_RATE_CANDIDATES, DEFAULT_TIMEOUT_MS, ELM_PROMPT, MAX_RESPONSE_BYTES,
    POLL_INTERVAL, RESPONSE_OK,
};

/// Settle delay after the reset command while the chip reboots
const RESET_SETTLE: Duration = Duration::from_secs(1);

/// Connection state, observed by callers and owned by [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Probing candidate baud rates
    NegotiatingBaud,
    /// Issuing the setup command sequence
    Configuring,
    /// Configured and ready for commands
    Ready,
    /// A setup step or mid-session command failed
    Faulted,
    /// Explicitly closed; the handle has been released
    Closed,
}

/// Connection configuration, immutable once `connect()` begins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port identifier (e.g. "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Explicit baud rate; `None` auto-detects
    pub baud_rate: Option<u32>,
    /// Timeout for read cycles and per-candidate negotiation attempts, in
    /// milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// A session with an ELM327-compatible interpreter.
///
/// Single-threaded and blocking; not reentrant. The serial handle is
/// exclusively owned: acquired in [`connect`](Connection::connect) and
/// released exactly once, on [`close`](Connection::close) or on a fatal
/// setup failure.
pub struct Connection {
    /// Serial link, present only while a handle is open
    link: Option<Box<dyn SerialLink>>,
    /// Current connection state
    state: ConnectionState,
    /// Connection configuration
    config: ConnectionConfig,
    /// Baud rate in effect, fixed for the lifetime of the connection
    baud_rate: Option<u32>,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            link: None,
            state: ConnectionState::Disconnected,
            config,
            baud_rate: None,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the configuration this connection was created with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Baud rate in effect, once supplied or negotiated
    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    /// Open the port and bring the session to [`ConnectionState::Ready`].
    ///
    /// Determines the baud rate (explicit value short-circuits negotiation
    /// entirely), then issues the setup sequence: reset, echo off, headers
    /// on, linefeeds off. Any failure releases the handle and lands in
    /// [`ConnectionState::Faulted`].
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.link.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }

        // When auto-detecting, the port still has to open at some rate;
        // negotiation re-targets it per candidate.
        let initial_baud = self.config.baud_rate.unwrap_or(BAUD_RATE_CANDIDATES[0]);
        let port = open_port(&self.config.port_name, initial_baud)?;

        self.attach(Box::new(SerialPortLink::new(port)))
    }

    /// Run setup over an already-open link
    pub(crate) fn attach(&mut self, link: Box<dyn SerialLink>) -> Result<(), ProtocolError> {
        self.link = Some(link);

        match self.setup() {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                info!(
                    port = %self.config.port_name,
                    baud_rate = self.baud_rate,
                    "connection ready"
                );
                Ok(())
            }
            Err(e) => {
                warn!(port = %self.config.port_name, error = %e, "connection setup failed");
                self.link = None;
                self.state = ConnectionState::Faulted;
                Err(e)
            }
        }
    }

    fn setup(&mut self) -> Result<(), ProtocolError> {
        let baud_rate = match self.config.baud_rate {
            Some(rate) => {
                debug!(baud_rate = rate, "using explicit baud rate");
                rate
            }
            None => {
                self.state = ConnectionState::NegotiatingBaud;
                let attempt_timeout = self.timeout();
                let link = self.link.as_deref_mut().ok_or(ProtocolError::NoResponse)?;
                negotiate_baud_rate(link, attempt_timeout)?
            }
        };
        self.baud_rate = Some(baud_rate);

        self.state = ConnectionState::Configuring;
        self.configure()
            .map_err(|e| ProtocolError::ConfigurationFailed(Box::new(e)))
    }

    fn configure(&mut self) -> Result<(), ProtocolError> {
        // The chip may be mid-reboot after reset, so its output is ignored;
        // the echo of E0 arrives before the setting takes effect.
        self.send_command(&AtCommand::reset().with_settle(RESET_SETTLE))?;
        self.send_command(&AtCommand::set_echo(false))?;
        self.send_command(&AtCommand::set_headers(true))?;
        self.send_command(&AtCommand::set_linefeed(false))?;
        Ok(())
    }

    /// Send an AT command and validate the response against its
    /// expectation policy.
    ///
    /// Commands not requiring "OK" return their lines unvalidated, and a
    /// read cycle that produced nothing counts as an empty response for
    /// them. With echo expected, some line must contain the success token;
    /// otherwise the response must be exactly one "OK" line.
    pub fn send_command(&mut self, command: &AtCommand) -> Result<Vec<String>, ProtocolError> {
        let lines = match self.send_inner(&command.wire_payload(), command.settle) {
            Ok(lines) => lines,
            Err(ProtocolError::NoResponse) if !command.ok_required && self.link.is_some() => {
                Vec::new()
            }
            Err(e) => return Err(self.fault(e)),
        };

        if !command.ok_required {
            return Ok(lines);
        }

        let accepted = if command.echo_expected {
            lines.iter().any(|line| line.contains(RESPONSE_OK))
        } else {
            lines.len() == 1 && lines[0] == RESPONSE_OK
        };

        if accepted {
            Ok(lines)
        } else {
            Err(self.fault(ProtocolError::UnexpectedResponse(lines)))
        }
    }

    /// Send a raw payload and return the parsed response lines.
    ///
    /// Frames the payload with CR-LF, optionally waits `settle`, then reads
    /// until the prompt, the byte cap, or the timeout. An empty capture is
    /// [`ProtocolError::NoResponse`], as is a channel that was never opened.
    pub fn send(
        &mut self,
        payload: &str,
        settle: Option<Duration>,
    ) -> Result<Vec<String>, ProtocolError> {
        self.send_inner(payload, settle).map_err(|e| self.fault(e))
    }

    fn send_inner(
        &mut self,
        payload: &str,
        settle: Option<Duration>,
    ) -> Result<Vec<String>, ProtocolError> {
        let timeout = self.timeout();
        let link = self.link.as_deref_mut().ok_or(ProtocolError::NoResponse)?;

        trace!(payload, "sending command");
        link.clear_input_buffer()?;
        link.write_all(payload.as_bytes())?;
        link.write_all(b"\r\n")?;
        link.flush()?;

        if let Some(delay) = settle {
            std::thread::sleep(delay);
        }

        let raw = read_until_prompt(link, timeout)?;
        if raw.is_empty() {
            return Err(ProtocolError::NoResponse);
        }

        let lines = parse_response(&raw);
        trace!(?lines, "response received");
        Ok(lines)
    }

    /// Release the serial handle after a best-effort reset.
    ///
    /// The handle is guaranteed released once this returns; a reset failure
    /// is reported as [`ProtocolError::CloseFailed`] but never prevents
    /// release. Calling before any successful connect is a no-op.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        if self.link.is_none() {
            self.state = ConnectionState::Closed;
            return Ok(());
        }

        debug!(port = %self.config.port_name, "closing connection");
        let reset = self.send_command(&AtCommand::reset());

        self.link = None;
        self.state = ConnectionState::Closed;

        match reset {
            Ok(_) => Ok(()),
            Err(e) => Err(ProtocolError::CloseFailed(Box::new(e))),
        }
    }

    /// Mark the session faulted when a command fails mid-session
    fn fault(&mut self, error: ProtocolError) -> ProtocolError {
        if self.state == ConnectionState::Ready {
            warn!(error = %error, "command failed, connection faulted");
            self.state = ConnectionState::Faulted;
        }
        error
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }
}

/// Accumulate bytes until a prompt byte is seen, the byte cap is reached,
/// or the deadline elapses. Termination is guaranteed by the deadline and
/// cap regardless of the transport's own blocking semantics.
fn read_until_prompt(link: &mut dyn SerialLink, timeout: Duration) -> io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut buffer = [0u8; 256];
    let start = Instant::now();

    while start.elapsed() < timeout && captured.len() < MAX_RESPONSE_BYTES {
        let available = link.bytes_to_read()? as usize;
        if available == 0 {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        let to_read = available.min(buffer.len());
        match link.read(&mut buffer[..to_read]) {
            Ok(0) => break,
            Ok(n) => {
                captured.extend_from_slice(&buffer[..n]);
                if buffer[..n].contains(&ELM_PROMPT) {
                    trace!(total = captured.len(), "prompt seen");
                    break;
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::stream::scripted::{LinkState, ScriptedLink};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    const RESET_REPLY: &[u8] = b"ELM327 v1.5\r\r>";
    const ECHO_REPLY: &[u8] = b"ATE0\rOK\r\r>";
    const OK_REPLY: &[u8] = b"OK\r\r>";
    const PROBE_REPLY: &[u8] = b"?\r>";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn test_config(baud_rate: Option<u32>) -> ConnectionConfig {
        ConnectionConfig {
            port_name: "scripted".to_string(),
            baud_rate,
            timeout_ms: 50,
        }
    }

    /// Bring a connection to Ready over a scripted link, with `extra`
    /// replies queued after the setup sequence
    fn ready_connection(extra: &[&[u8]]) -> (Connection, Arc<Mutex<LinkState>>) {
        let mut responses: Vec<&[u8]> = vec![RESET_REPLY, ECHO_REPLY, OK_REPLY, OK_REPLY];
        responses.extend_from_slice(extra);
        let (link, state) = ScriptedLink::with_responses(&responses);

        let mut conn = Connection::new(test_config(Some(38_400)));
        conn.attach(Box::new(link)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        (conn, state)
    }

    #[test]
    fn test_new_connection_is_disconnected() {
        let conn = Connection::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.baud_rate(), None);
        assert_eq!(conn.config().timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_explicit_baud_skips_negotiation() {
        init_tracing();
        let (conn, state) = ready_connection(&[]);

        assert_eq!(conn.baud_rate(), Some(38_400));
        let state = state.lock().unwrap();
        // The negotiator never ran and the setup sequence went out in order
        assert!(state.bauds_tried.is_empty());
        assert_eq!(state.written, b"ATZ\r\nATE0\r\nATH1\r\nATL0\r\n".to_vec());
    }

    #[test]
    fn test_auto_negotiation_then_setup() {
        init_tracing();
        let (link, state) = ScriptedLink::responsive_at(
            9_600,
            &[PROBE_REPLY, RESET_REPLY, ECHO_REPLY, OK_REPLY, OK_REPLY],
        );

        let mut conn = Connection::new(test_config(None));
        conn.attach(Box::new(link)).unwrap();

        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.baud_rate(), Some(9_600));
        assert_eq!(state.lock().unwrap().bauds_tried, vec![38_400, 9_600]);
    }

    #[test]
    fn test_negotiation_failure_faults() {
        let (link, _state) = ScriptedLink::responsive_at(0, &[]);

        let mut conn = Connection::new(test_config(None));
        let result = conn.attach(Box::new(link));

        assert!(matches!(result, Err(ProtocolError::BaudDetectionFailed)));
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert!(conn.link.is_none());
    }

    #[test]
    fn test_silent_reset_still_configures() {
        // Reset produces nothing mid-reboot; setup must proceed anyway
        let (link, _state) = ScriptedLink::with_responses(&[b"", ECHO_REPLY, OK_REPLY, OK_REPLY]);

        let mut conn = Connection::new(test_config(Some(38_400)));
        conn.attach(Box::new(link)).unwrap();

        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_setup_command_failure_faults() {
        // Headers-on answers garbage; setup must wrap the cause and release
        // the handle
        let (link, _state) =
            ScriptedLink::with_responses(&[RESET_REPLY, ECHO_REPLY, b"?\r\r>", OK_REPLY]);

        let mut conn = Connection::new(test_config(Some(38_400)));
        let result = conn.attach(Box::new(link));

        match result {
            Err(ProtocolError::ConfigurationFailed(inner)) => {
                assert!(matches!(
                    *inner,
                    ProtocolError::UnexpectedResponse(ref lines) if lines == &["?".to_string()]
                ));
            }
            other => panic!("expected ConfigurationFailed, got {:?}", other.err()),
        }
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert!(conn.link.is_none());
    }

    #[test]
    fn test_strict_ok_rejects_extra_lines() {
        let (mut conn, _state) = ready_connection(&[b"SEARCHING...\rOK\r\r>"]);

        let result = conn.send_command(&AtCommand::new("SP0"));

        match result {
            Err(ProtocolError::UnexpectedResponse(lines)) => {
                assert_eq!(lines, vec!["SEARCHING...".to_string(), "OK".to_string()]);
            }
            other => panic!("expected UnexpectedResponse, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[test]
    fn test_echo_expected_accepts_echo_then_ok() {
        let (mut conn, _state) = ready_connection(&[b"ATE1\rOK\r\r>"]);

        let lines = conn
            .send_command(&AtCommand::set_echo(true))
            .unwrap();

        assert_eq!(lines, vec!["ATE1".to_string(), "OK".to_string()]);
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_unvalidated_command_returns_raw_lines() {
        let (mut conn, _state) = ready_connection(&[b"ELM327 v1.5\r\r>"]);

        let lines = conn.send_command(&AtCommand::reset()).unwrap();

        assert_eq!(lines, vec!["ELM327 v1.5".to_string()]);
    }

    #[test]
    fn test_send_without_link_is_no_response() {
        let mut conn = Connection::new(ConnectionConfig::default());
        let result = conn.send("ATZ", None);
        assert!(matches!(result, Err(ProtocolError::NoResponse)));
    }

    #[test]
    fn test_close_before_connect_is_noop() {
        let mut conn = Connection::new(ConnectionConfig::default());
        assert!(conn.close().is_ok());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_sends_reset_and_releases() {
        let (mut conn, state) = ready_connection(&[RESET_REPLY]);

        conn.close().unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.link.is_none());
        let state = state.lock().unwrap();
        assert!(state.written.ends_with(b"ATZ\r\n"));
    }

    #[test]
    fn test_close_with_silent_device_still_releases() {
        let (mut conn, _state) = ready_connection(&[]);

        // No reply scripted for the closing reset; still Ok, still released
        conn.close().unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.link.is_none());
    }
}
