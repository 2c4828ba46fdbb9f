//! Error types for the AT-command protocol.

use thiserror::Error;

/// Errors that can occur when interpreting module output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A discovery record does not follow the fixed field layout.
    #[error("discovery record at offset {offset} has unexpected layout: {reason}")]
    FormatMismatch {
        /// Byte offset of the record base within the accumulated text.
        offset: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// A field expected to be uppercase hex contained something else.
    #[error("invalid hex field: {0:?}")]
    InvalidHex(String),

    /// The module answered with something other than the expected reply.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
