//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the interpreter
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No candidate ports exist or the port could not be opened
    #[error("Serial port unavailable: {0}")]
    PortUnavailable(String),

    /// No candidate baud rate produced a prompt
    #[error("Baud rate detection failed: no candidate produced a prompt")]
    BaudDetectionFailed,

    /// A setup command failed; wraps the underlying cause
    #[error("Connection setup failed")]
    ConfigurationFailed(#[source] Box<ProtocolError>),

    /// A read cycle produced nothing before timeout, or the channel was
    /// never opened
    #[error("No response from interpreter")]
    NoResponse,

    /// Response shape did not match the command's expectation policy;
    /// carries the raw lines for diagnostics
    #[error("Unexpected response from interpreter: {0:?}")]
    UnexpectedResponse(Vec<String>),

    /// Best-effort reset during close failed; the handle is still released
    #[error("Reset during close failed")]
    CloseFailed(#[source] Box<ProtocolError>),

    /// `connect()` called on a connection that already holds a handle
    #[error("Already connected")]
    AlreadyConnected,

    /// Transport-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
