//! AT commands
//!
//! Defines the AT command value type and the configuration mnemonics used
//! during session setup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::AT_PREFIX;

/// Reset the interpreter ('ATZ')
pub const RESET: &str = "Z";

/// Command echo flag ('ATE0' / 'ATE1')
pub const ECHO_FLAG: &str = "E";

/// Header display flag ('ATH0' / 'ATH1')
pub const HEADER_FLAG: &str = "H";

/// Linefeed emission flag ('ATL0' / 'ATL1')
pub const LINEFEED_FLAG: &str = "L";

/// An AT command together with its response expectation policy.
///
/// `ok_required` and `echo_expected` drive validation in
/// [`Connection::send_command`](super::Connection::send_command); `settle`
/// is an optional post-write delay for commands that leave the chip busy
/// (reset takes on the order of a second to reboot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtCommand {
    /// Command mnemonic without the AT prefix (e.g. "Z", "E0")
    pub mnemonic: String,
    /// Whether the device is expected to echo the command before the
    /// success token
    pub echo_expected: bool,
    /// Whether the response must carry the success token at all
    pub ok_required: bool,
    /// Optional delay between writing the command and reading the response
    pub settle: Option<Duration>,
}

impl AtCommand {
    /// Create a command that requires a plain "OK" response
    pub fn new(mnemonic: impl Into<String>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            echo_expected: false,
            ok_required: true,
            settle: None,
        }
    }

    /// Create a flag command, encoding the state as a trailing '0'/'1'
    pub fn flag(flag: &str, state: bool) -> Self {
        Self::new(format!("{}{}", flag, if state { '1' } else { '0' }))
    }

    /// Reset command ('ATZ'); the chip reboots, so its output is not
    /// validated
    pub fn reset() -> Self {
        Self::new(RESET).without_ok()
    }

    /// Enable or disable command echo ('ATE1'/'ATE0'). The device still
    /// echoes this one command before honoring it, so the echo is expected
    /// in the response.
    pub fn set_echo(enabled: bool) -> Self {
        Self::flag(ECHO_FLAG, enabled).with_echo()
    }

    /// Enable or disable header display ('ATH1'/'ATH0')
    pub fn set_headers(enabled: bool) -> Self {
        Self::flag(HEADER_FLAG, enabled)
    }

    /// Enable or disable linefeed emission ('ATL1'/'ATL0')
    pub fn set_linefeed(enabled: bool) -> Self {
        Self::flag(LINEFEED_FLAG, enabled)
    }

    /// Expect the device to echo the command back in the response
    pub fn with_echo(mut self) -> Self {
        self.echo_expected = true;
        self
    }

    /// Return the response unvalidated instead of requiring "OK"
    pub fn without_ok(mut self) -> Self {
        self.ok_required = false;
        self
    }

    /// Wait this long after writing before reading the response
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = Some(settle);
        self
    }

    /// Build the wire payload: AT prefix plus mnemonic
    pub fn wire_payload(&self) -> String {
        format!("{}{}", AT_PREFIX, self.mnemonic)
    }
}
