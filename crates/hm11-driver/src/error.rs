//! Error types for the driver.

use hm11_protocol::{BaudRate, ProtocolError};
use thiserror::Error;

/// Errors that can occur while driving the module.
#[derive(Debug, Error)]
pub enum Hm11Error {
    /// No complete reply arrived within the command timeout.
    #[error("timeout waiting for response to {command:?}")]
    Timeout {
        /// The command that went unanswered.
        command: String,
    },

    /// Beacon parameters were rejected before any I/O.
    #[error("invalid beacon descriptor: {0}")]
    Validation(#[from] BeaconValidationError),

    /// The host and module could not agree on a baud rate.
    #[error("baud negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Module output did not follow the expected format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The operation needs an enabled module.
    #[error("module is not enabled")]
    NotEnabled,

    /// The module answered, but not with what the command calls for.
    #[error("unexpected response to {command:?}: {response:?}")]
    UnexpectedResponse {
        /// The command sent.
        command: String,
        /// What came back.
        response: String,
    },

    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why a baud negotiation step failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// No candidate rate produced an `OK`.
    #[error("module did not answer at any supported baud rate")]
    NoResponse,

    /// The factory renew needed to leave a non-default rate was not acknowledged.
    #[error("factory renew at {from} baud was not acknowledged")]
    RenewNotAcknowledged {
        /// Rate the module was found at.
        from: BaudRate,
    },

    /// The module did not accept the new rate.
    #[error("switch to {target} baud was not acknowledged")]
    SwitchNotAcknowledged {
        /// Requested rate.
        target: BaudRate,
    },

    /// The reset that applies the new rate was not acknowledged.
    #[error("reset after baud switch was not acknowledged")]
    ResetNotAcknowledged,

    /// The host line did not become ready after reopening it.
    #[error("line not ready at {baud} baud")]
    LineNotReady {
        /// Rate the line was opened at.
        baud: BaudRate,
    },

    /// The module did not confirm the new rate after reopening the line.
    #[error("module did not confirm {target} baud: {response:?}")]
    VerificationFailed {
        /// Requested rate.
        target: BaudRate,
        /// Reply to the verification query.
        response: String,
    },
}

/// Beacon descriptor fields that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconValidationError {
    /// Name longer than 12 characters.
    #[error("name is {len} characters, at most 12 allowed")]
    NameTooLong {
        /// Actual length.
        len: usize,
    },

    /// UUID is not 32 hex digits.
    #[error("uuid must be 32 hex digits, got {0:?}")]
    InvalidUuid(String),

    /// Major outside 1..=0xFFFD.
    #[error("major must be between 1 and 65533, got {0}")]
    MajorOutOfRange(u16),

    /// Minor outside 1..=0xFFFD.
    #[error("minor must be between 1 and 65533, got {0}")]
    MinorOutOfRange(u16),

    /// Advertising interval index above 9.
    #[error("advertising interval index must be 0..=9, got {0}")]
    IntervalOutOfRange(u8),
}

/// Result type alias for driver operations.
pub type Hm11Result<T> = Result<T, Hm11Error>;
