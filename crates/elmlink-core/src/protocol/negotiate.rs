//! Baud rate negotiation
//!
//! Probes the candidate baud rates in priority order until the interpreter
//! answers with its prompt.

use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::stream::SerialLink;
use super::{ProtocolError, BAUD_RATE_CANDIDATES, ELM_PROMPT, POLL_INTERVAL};

/// Probe payload byte. 0x7F matches no valid AT command, so the chip
/// reliably answers with an error followed by its prompt regardless of how
/// it is currently configured.
const PROBE_BYTE: u8 = 0x7F;

/// Upper bound on bytes captured per probe attempt
const PROBE_CAPTURE_LIMIT: usize = 1024;

/// Try each candidate in [`BAUD_RATE_CANDIDATES`] until one elicits a
/// prompt, returning the first that does. Transport errors on a candidate
/// skip to the next one; exhausting the list fails with
/// [`ProtocolError::BaudDetectionFailed`].
pub(crate) fn negotiate_baud_rate(
    link: &mut dyn SerialLink,
    attempt_timeout: Duration,
) -> Result<u32, ProtocolError> {
    for &baud_rate in BAUD_RATE_CANDIDATES.iter() {
        match probe_baud_rate(link, baud_rate, attempt_timeout) {
            Ok(true) => {
                debug!(baud_rate, "baud rate accepted");
                return Ok(baud_rate);
            }
            Ok(false) => trace!(baud_rate, "no prompt at candidate rate"),
            Err(e) => debug!(baud_rate, error = %e, "probe failed, trying next candidate"),
        }
    }

    Err(ProtocolError::BaudDetectionFailed)
}

/// Probe a single candidate rate: switch the link over, flush both buffers,
/// write the two-byte probe framed with CR-LF, then capture until the
/// prompt, the byte cap, or the timeout.
///
/// Acceptance requires the capture to *end with* the prompt byte. A capture
/// that picks up trailing bytes after a prompt (possible if read granularity
/// spans more than one prompt sequence) therefore rejects the candidate;
/// in practice the probe elicits a single error-then-prompt sequence.
fn probe_baud_rate(
    link: &mut dyn SerialLink,
    baud_rate: u32,
    timeout: Duration,
) -> io::Result<bool> {
    link.set_baud_rate(baud_rate)?;
    link.clear_input_buffer()?;
    link.clear_output_buffer()?;

    link.write_all(&[PROBE_BYTE, PROBE_BYTE])?;
    link.write_all(b"\r\n")?;
    link.flush()?;

    let mut captured = Vec::new();
    let mut buffer = [0u8; 256];
    let start = Instant::now();

    while start.elapsed() < timeout && captured.len() < PROBE_CAPTURE_LIMIT {
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
                if captured.ends_with(&[ELM_PROMPT]) {
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

    Ok(captured.ends_with(&[ELM_PROMPT]))
}
