/*!
 * @file error.rs
 * @brief Driver error taxonomy
 */

use std::sync::OnceLock;
use thiserror::Error;

/// Top-level driver error. Carries an optional server-reported error code
/// so callers can classify retryability without re-parsing the message.
#[derive(Error, Debug, Clone)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// Whether this error should be retried exactly once per the driver's
    /// retry discipline (writes with retryWrites, transaction commit/abort,
    /// monitor probes on unknown/possible_primary).
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::Network(_) | ErrorKind::NetworkTimeout => true,
            ErrorKind::Command(cmd) => {
                RETRYABLE_CODES.contains(&cmd.code) || not_master_pattern().is_match(&cmd.message)
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ErrorKind {
    #[error("network error: {0}")]
    Network(String),

    #[error("network operation timed out")]
    NetworkTimeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("command error {}: {}", .0.code, .0.message)]
    Command(CommandError),

    #[error("write error at index {}, code {}: {}", .0.index, .0.code, .0.message)]
    Write(WriteError),

    #[error("write concern error {}: {}", .0.code, .0.message)]
    WriteConcern(WriteConcernError),

    #[error("server cursor was lost")]
    CursorLost,

    #[error("no suitable server found before the selection deadline")]
    SelectionTimeout,

    #[error("incompatible wire version: {0}")]
    IncompatibleWireVersion(String),

    #[error("malformed BSON: {0}")]
    MalformedBson(String),

    #[error("malformed wire message: {0}")]
    MalformedWireMessage(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    pub index: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    pub code: i32,
    pub message: String,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Error::new(ErrorKind::NetworkTimeout)
        } else {
            Error::new(ErrorKind::Network(e.to_string()))
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::new(ErrorKind::NetworkTimeout)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mandatory retryable server codes per the driver's retryable-writes contract.
pub const RETRYABLE_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    9001,  // SocketException
    10107, // NotMaster
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotMasterNoSlaveOk
    13436, // NotMasterOrSecondary
];

fn not_master_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)not master|node is recovering").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_network_error() {
        let e = Error::new(ErrorKind::NetworkTimeout);
        assert!(e.is_retryable());
    }

    #[test]
    fn retryable_command_code() {
        let e = Error::new(ErrorKind::Command(CommandError {
            code: 189,
            message: "PrimarySteppedDown".into(),
        }));
        assert!(e.is_retryable());
    }

    #[test]
    fn retryable_not_master_message() {
        let e = Error::new(ErrorKind::Command(CommandError {
            code: 10009,
            message: "not master or secondary; cannot currently read from this replSet member"
                .into(),
        }));
        assert!(e.is_retryable());
    }

    #[test]
    fn non_retryable_command() {
        let e = Error::new(ErrorKind::Command(CommandError {
            code: 2,
            message: "bad value".into(),
        }));
        assert!(!e.is_retryable());
    }
}
