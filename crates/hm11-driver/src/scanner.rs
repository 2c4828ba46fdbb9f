//! iBeacon discovery scans.
//!
//! A scan sends `AT+DISI?`, collects the streamed records into a bounded
//! [`ScanBuffer`] and then looks for the requested beacon. Accumulation stops
//! at the first of:
//! - the `OK+DISCE` end marker
//! - the search deadline, after which the module is hardware reset because it
//!   can get stuck without ever sending the end marker
//! - the memory budget; the rest of the stream is drained unstored

use hm11_metrics::{metric_defs, metrics};
use hm11_protocol::{
    count_records, find_match, BeaconFilter, Command, PushOutcome, ScanBuffer,
    ScanMatch, DISCOVERY_STARTED,
};
use tracing::{debug, trace, warn};

use crate::error::Hm11Result;
use crate::hal::{Clock, ControlPins, Transport};
use crate::lifecycle::Hm11;

/// What to scan for and how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Target UUID, 32 hex digits.
    pub uuid: String,
    /// Required major, if any.
    pub major: Option<u16>,
    /// Required minor, if any.
    pub minor: Option<u16>,
    /// Search deadline; `None` uses the configured default.
    pub max_search_ms: Option<u64>,
    /// Buffer ceiling; `None` uses the configured default.
    pub memory_budget_bytes: Option<usize>,
}

impl ScanRequest {
    /// Scan for any beacon advertising `uuid`.
    pub fn for_uuid(uuid: impl Into<String>) -> Self {
        ScanRequest {
            uuid: uuid.into(),
            major: None,
            minor: None,
            max_search_ms: None,
            memory_budget_bytes: None,
        }
    }

    /// Additionally require major and minor.
    pub fn with_ids(mut self, major: u16, minor: u16) -> Self {
        self.major = Some(major);
        self.minor = Some(minor);
        self
    }

    /// Set the search deadline.
    pub fn with_max_search_ms(mut self, ms: u64) -> Self {
        self.max_search_ms = Some(ms);
        self
    }

    /// Set the buffer ceiling.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    fn filter(&self) -> BeaconFilter {
        BeaconFilter {
            uuid: self.uuid.to_ascii_uppercase(),
            major: self.major,
            minor: self.minor,
        }
    }
}

/// Why accumulation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// The module did not acknowledge `AT+DISI?`.
    NotStarted,
    /// The end marker arrived.
    Terminator,
    /// The search deadline passed.
    Timeout,
    /// The buffer reached its ceiling.
    BudgetExhausted,
}

/// Everything a scan observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// The first matching record, if any.
    pub found: Option<ScanMatch>,
    /// Why accumulation stopped.
    pub stop: ScanStop,
    /// `OK+DISC:` records in the buffer.
    pub records_seen: usize,
    /// Bytes stored in the buffer.
    pub stored_bytes: usize,
    /// Bytes read after the ceiling and thrown away.
    pub discarded_bytes: usize,
}

impl ScanReport {
    fn not_started() -> Self {
        ScanReport {
            found: None,
            stop: ScanStop::NotStarted,
            records_seen: 0,
            stored_bytes: 0,
            discarded_bytes: 0,
        }
    }
}

impl<T: Transport, P: ControlPins, C: Clock> Hm11<T, P, C> {
    /// Scan for a beacon. `None` if no record matched.
    pub fn scan(&mut self, request: &ScanRequest) -> Hm11Result<Option<ScanMatch>> {
        Ok(self.scan_with_report(request)?.found)
    }

    /// Scan for a beacon and report how the scan went.
    pub fn scan_with_report(&mut self, request: &ScanRequest) -> Hm11Result<ScanReport> {
        self.ensure_enabled()?;
        let max_search_ms = request
            .max_search_ms
            .unwrap_or(self.config.default_detection_ms);
        let budget = request
            .memory_budget_bytes
            .unwrap_or(self.config.default_memory_budget);

        self.engine.flush();
        // Records follow the acknowledgement immediately; reading stops at the
        // marker so every record byte goes through the bounded buffer.
        let timeout_ms = self.engine.command_timeout_ms();
        let ack = self.engine.send_until(
            &Command::StartDiscovery.to_command_string(),
            DISCOVERY_STARTED,
            timeout_ms,
        );
        if !ack.succeeded {
            warn!("Hm11: discovery not started ({:?})", ack.text);
            return Ok(ScanReport::not_started());
        }

        let started = self.engine.now_ms();
        let mut buffer = ScanBuffer::with_limit(budget);
        let stop = self.accumulate(&mut buffer, started, max_search_ms);

        match stop {
            ScanStop::Timeout => {
                debug!("Hm11: no end marker after {} ms, resetting", max_search_ms);
                self.hardware_reset();
                self.engine.drain_input();
            }
            ScanStop::BudgetExhausted => {
                debug!("Hm11: scan buffer full at {} bytes, draining", buffer.len());
                while self.engine.available() > 0
                    && self.engine.elapsed_since(started) < max_search_ms
                {
                    match self.engine.read_byte() {
                        Some(byte) => {
                            buffer.push(byte);
                        }
                        None => break,
                    }
                }
            }
            ScanStop::Terminator | ScanStop::NotStarted => {}
        }

        let records_seen = count_records(buffer.as_bytes());
        metrics::counter!(metric_defs::SCAN_RECORDS.name).increment(records_seen as u64);
        metrics::histogram!(metric_defs::SCAN_BUFFER_BYTES.name).record(buffer.len() as f64);
        trace!("Hm11: scan buffer {:?}", buffer.as_text());

        let found = find_match(buffer.as_bytes(), &request.filter())?;
        debug!(
            "Hm11: scan stopped ({:?}) after {} records, match: {}",
            stop,
            records_seen,
            found.is_some()
        );

        Ok(ScanReport {
            found,
            stop,
            records_seen,
            stored_bytes: buffer.len(),
            discarded_bytes: buffer.discarded(),
        })
    }

    /// Read the stream until a stop condition.
    fn accumulate(&mut self, buffer: &mut ScanBuffer, started: u64, max_search_ms: u64) -> ScanStop {
        loop {
            let mut received = false;
            while self.engine.available() > 0 && self.engine.elapsed_since(started) < max_search_ms {
                let Some(byte) = self.engine.read_byte() else {
                    break;
                };
                received = true;
                if let Some(reason) = accept(buffer, byte) {
                    return reason;
                }
            }

            if self.engine.elapsed_since(started) >= max_search_ms {
                return ScanStop::Timeout;
            }
            if !received {
                self.engine.idle();
            }
        }
    }
}

/// Store one byte; returns a stop reason if this byte ends accumulation.
fn accept(buffer: &mut ScanBuffer, byte: u8) -> Option<ScanStop> {
    if buffer.push(byte) == PushOutcome::Dropped {
        return Some(ScanStop::BudgetExhausted);
    }
    if buffer.ends_with_terminator() {
        return Some(ScanStop::Terminator);
    }
    if buffer.is_full() {
        return Some(ScanStop::BudgetExhausted);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = ScanRequest::for_uuid("abc");
        assert_eq!(request.max_search_ms, None);
        assert_eq!(request.memory_budget_bytes, None);
        assert_eq!(request.filter().uuid, "ABC");
    }

    #[test]
    fn test_accept_stops_at_ceiling() {
        let mut buffer = ScanBuffer::with_limit(3);
        assert_eq!(accept(&mut buffer, b'a'), None);
        assert_eq!(accept(&mut buffer, b'b'), None);
        assert_eq!(accept(&mut buffer, b'c'), Some(ScanStop::BudgetExhausted));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_accept_prefers_terminator() {
        let mut buffer = ScanBuffer::with_limit(8);
        let mut stop = None;
        for &byte in b"OK+DISCE" {
            stop = accept(&mut buffer, byte);
        }
        assert_eq!(stop, Some(ScanStop::Terminator));
    }

    #[test]
    fn test_request_builders() {
        let request = ScanRequest::for_uuid("ABC")
            .with_ids(1, 2)
            .with_max_search_ms(250)
            .with_memory_budget(64);
        assert_eq!(request.filter(), BeaconFilter::uuid("ABC").with_ids(1, 2));
        assert_eq!(request.max_search_ms, Some(250));
        assert_eq!(request.memory_budget_bytes, Some(64));
    }
}
