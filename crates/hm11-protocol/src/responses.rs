//! Response classification.
//!
//! Replies from the module are not framed. After the driver has decided a reply
//! is complete it hands the trimmed text to [`Response::parse`]:
//! - `OK` for a bare probe
//! - `OK+Set:<value>` after a configuration write
//! - `OK+Get:<value>` after a query
//! - `OK+<NAME>` or `OK+<NAME>:<value>` for everything else

use crate::error::{ProtocolError, ProtocolResult};

/// Literal that marks success in any reply.
pub const OK: &str = "OK";

/// Acknowledgement that a discovery scan started.
pub const DISCOVERY_STARTED: &str = "OK+DISIS";

/// Prefix of every discovered record.
pub const DISCOVERY_RECORD: &str = "OK+DISC:";

/// Marker the module emits when a discovery scan ends.
pub const DISCOVERY_ENDED: &str = "OK+DISCE";

/// Text the command engine reports when an exchange times out.
pub const TIMEOUT_TEXT: &str = "error";

/// Parsed reply from the module.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Plain `OK`.
    Ok,

    /// `OK+Set:<value>`.
    Set(String),

    /// `OK+Get:<value>`.
    Get(String),

    /// `OK+ADDR:<mac>`.
    Address(String),

    /// `OK+DISIS`, discovery started.
    DiscoveryStarted,

    /// `OK+DISCE`, discovery finished.
    DiscoveryEnded,

    /// `OK+<NAME>` or `OK+<NAME>:<value>` not covered above.
    Named {
        /// Name after `OK+`.
        name: String,
        /// Value after the colon, if any.
        value: Option<String>,
    },

    /// The engine gave up waiting (`error`).
    TimedOut,

    /// Unknown/unrecognized response.
    Unknown(String),
}

impl Response {
    /// Parse a complete, trimmed reply.
    pub fn parse(text: &str) -> Response {
        let text = text.trim();

        if text == OK {
            return Response::Ok;
        }

        if text == TIMEOUT_TEXT {
            return Response::TimedOut;
        }

        if let Some(value) = text.strip_prefix("OK+Set:") {
            return Response::Set(value.to_string());
        }

        if let Some(value) = text.strip_prefix("OK+Get:") {
            return Response::Get(value.to_string());
        }

        if let Some(value) = text.strip_prefix("OK+ADDR:") {
            return Response::Address(value.to_string());
        }

        if text.starts_with(DISCOVERY_STARTED) {
            return Response::DiscoveryStarted;
        }

        if text.starts_with(DISCOVERY_ENDED) {
            return Response::DiscoveryEnded;
        }

        if let Some(rest) = text.strip_prefix("OK+") {
            return match rest.split_once(':') {
                Some((name, value)) => Response::Named {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                },
                None => Response::Named {
                    name: rest.to_string(),
                    value: None,
                },
            };
        }

        Response::Unknown(text.to_string())
    }

    /// Check if this reply acknowledges the command.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::TimedOut | Response::Unknown(_))
    }

    /// The value carried by a `Set`, `Get`, `Address` or named reply.
    pub fn value(&self) -> Option<&str> {
        match self {
            Response::Set(v) | Response::Get(v) | Response::Address(v) => Some(v),
            Response::Named { value, .. } => value.as_deref(),
            _ => None,
        }
    }

    /// Interpret a `Get`/`Set` value as a small integer index.
    pub fn index(&self) -> ProtocolResult<u8> {
        let value = self
            .value()
            .ok_or_else(|| ProtocolError::UnexpectedResponse(format!("{:?}", self)))?;
        value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::UnexpectedResponse(value.to_string()))
    }
}

/// Check whether any part of `text` contains the success literal.
///
/// This is a substring search on purpose: `OK+DISCE` counts as success.
pub fn contains_ok(text: &str) -> bool {
    text.contains(OK)
}
