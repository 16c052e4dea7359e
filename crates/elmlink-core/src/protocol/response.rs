//! Response parsing
//!
//! Turns the raw byte buffer captured during one read cycle into a clean
//! ordered sequence of text lines.

use super::ELM_PROMPT;

/// Parse a raw response buffer into trimmed, non-empty lines.
///
/// Stray NUL bytes are discarded, a single trailing prompt byte is dropped,
/// and the remainder is decoded lossily so that line noise during
/// negotiation can never turn into a decode error. Line boundaries are any
/// run of CR and/or LF; empty segments are dropped and order is preserved.
pub fn parse_response(raw: &[u8]) -> Vec<String> {
    let mut buffer: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();

    if buffer.last() == Some(&ELM_PROMPT) {
        buffer.pop();
    }

    let text = String::from_utf8_lossy(&buffer);

    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
