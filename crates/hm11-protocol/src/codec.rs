//! Byte accumulation for replies and discovery streams.
//!
//! The module sends replies without any framing, so the host accumulates bytes
//! and decides completion from the content:
//! - [`ResponseBuffer`] collects a single command reply
//! - [`ScanBuffer`] collects a discovery stream under a hard size ceiling

use bytes::BytesMut;

use crate::responses::{DISCOVERY_ENDED, OK};

/// Typical reply length, used as the initial buffer capacity.
pub const DEFAULT_RESPONSE_LENGTH: usize = 8;

/// Encoder for outgoing commands.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl CommandCodec {
    /// Encode a command for transmission.
    ///
    /// The module takes commands without a terminator.
    pub fn encode_command(cmd: &str) -> Vec<u8> {
        cmd.as_bytes().to_vec()
    }
}

/// Find `needle` in `haystack` starting at `from`.
pub fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Accumulator for one command reply.
#[derive(Debug)]
pub struct ResponseBuffer {
    buffer: BytesMut,
    saw_plus: bool,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    /// Create an empty reply buffer.
    pub fn new() -> Self {
        ResponseBuffer {
            buffer: BytesMut::with_capacity(DEFAULT_RESPONSE_LENGTH),
            saw_plus: false,
        }
    }

    /// Append one received byte.
    pub fn push(&mut self, byte: u8) {
        if byte == b'+' {
            self.saw_plus = true;
        }
        self.buffer.extend_from_slice(&[byte]);
    }

    /// Whether the success literal has arrived anywhere in the reply.
    pub fn has_ok(&self) -> bool {
        find_bytes(&self.buffer, OK.as_bytes(), 0).is_some()
    }

    /// Whether any `+` has arrived.
    pub fn has_plus(&self) -> bool {
        self.saw_plus
    }

    /// Completion test for the reply content.
    ///
    /// The caller adds the transport side of the condition (nothing more is
    /// currently available). A command containing `+` is answered with a
    /// structured `OK+...` reply, so a bare `OK` is not enough for it.
    pub fn is_complete(&self, expects_structured: bool) -> bool {
        self.has_ok() && (!expects_structured || self.has_plus())
    }

    /// Whether the reply received so far ends with `marker`.
    pub fn ends_with(&self, marker: &[u8]) -> bool {
        self.buffer.ends_with(marker)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the buffer and return the reply with surrounding whitespace trimmed.
    pub fn into_trimmed(self) -> String {
        String::from_utf8_lossy(&self.buffer).trim().to_string()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.saw_plus = false;
    }
}

/// Outcome of pushing a byte into a [`ScanBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The byte was stored.
    Stored,
    /// The ceiling was already reached; the byte was counted and dropped.
    Dropped,
}

/// Accumulator for a discovery stream with a hard memory ceiling.
///
/// The buffer never holds more than `limit` bytes. Once full, further bytes are
/// counted as discarded but not stored.
#[derive(Debug)]
pub struct ScanBuffer {
    buffer: BytesMut,
    limit: usize,
    discarded: usize,
}

impl ScanBuffer {
    /// Create a buffer that stores at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        ScanBuffer {
            // Grows on demand up to `limit`.
            buffer: BytesMut::with_capacity(limit.min(256)),
            limit,
            discarded: 0,
        }
    }

    /// Offer one byte to the buffer.
    pub fn push(&mut self, byte: u8) -> PushOutcome {
        if self.is_full() {
            self.discarded += 1;
            return PushOutcome::Dropped;
        }
        self.buffer.extend_from_slice(&[byte]);
        PushOutcome::Stored
    }

    /// Whether the ceiling has been reached.
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.limit
    }

    /// Whether the stored data ends with the discovery terminator.
    ///
    /// Bytes arrive one at a time, so checking the tail after each push is
    /// equivalent to searching the whole buffer.
    pub fn ends_with_terminator(&self) -> bool {
        self.buffer.ends_with(DISCOVERY_ENDED.as_bytes())
    }

    /// Whether the terminator appears anywhere in the stored data.
    pub fn contains_terminator(&self) -> bool {
        find_bytes(&self.buffer, DISCOVERY_ENDED.as_bytes(), 0).is_some()
    }

    /// Stored bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Stored data as text (for logging).
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }

    /// Number of stored bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The ceiling.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of bytes offered after the ceiling was reached.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}
