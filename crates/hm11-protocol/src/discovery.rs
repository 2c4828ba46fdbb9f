//! iBeacon discovery records.
//!
//! Each advertisement seen during `AT+DISI?` is reported as one fixed-layout
//! record:
//!
//! ```text
//! OK+DISC:4C000215:0005000100001000800000805F9B0131:00014667C3:00A0500B1710:-078
//!         |        |                                |   |   | |            |
//!         +0       +9 UUID                          +42 +46 | +53 MAC      +66 RSSI
//!         company                                  major minor
//! ```
//!
//! Offsets are relative to the record base (the first character after
//! `OK+DISC:`). They were taken from observed module output and are treated as a
//! compatibility contract; anything that does not line up is reported as
//! [`ProtocolError::FormatMismatch`] instead of being parsed.

use crate::codec::find_bytes;
use crate::error::{ProtocolError, ProtocolResult};
use crate::hex::{hex_to_u16, is_upper_hex, u16_to_hex};
use crate::responses::DISCOVERY_RECORD;

/// Distance from the record base to the UUID.
pub const UUID_OFFSET: usize = 9;
/// Length of the UUID in hex characters.
pub const UUID_HEX_LEN: usize = 32;
/// Length of a complete record, measured from the base.
pub const RECORD_LEN: usize = 70;

const ACCESS_ADDRESS: (usize, usize) = (0, 8);
const MAJOR: (usize, usize) = (42, 46);
const MINOR: (usize, usize) = (46, 50);
const SENSOR: (usize, usize) = (50, 52);
const DEVICE_ADDRESS: (usize, usize) = (53, 65);
const RSSI_SIGN: usize = 66;
const RSSI_DIGITS: (usize, usize) = (67, 70);
const SEPARATORS: [usize; 4] = [8, 41, 52, 65];

/// Prefix shared by records and the end marker; used to find record bounds.
const RECORD_START: &[u8] = b"OK+DISC";

/// What a scan is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFilter {
    /// 32 uppercase hex characters.
    pub uuid: String,
    /// Required major, if any.
    pub major: Option<u16>,
    /// Required minor, if any.
    pub minor: Option<u16>,
}

impl BeaconFilter {
    /// Match on UUID alone.
    pub fn uuid(uuid: impl Into<String>) -> Self {
        BeaconFilter {
            uuid: uuid.into(),
            major: None,
            minor: None,
        }
    }

    /// Additionally require major and minor.
    pub fn with_ids(mut self, major: u16, minor: u16) -> Self {
        self.major = Some(major);
        self.minor = Some(minor);
        self
    }

    /// Check the optional identifiers against one record's text, starting at the UUID.
    fn ids_match(&self, record_from_uuid: &[u8]) -> bool {
        let found = |id: Option<u16>| match id {
            Some(v) => find_bytes(record_from_uuid, u16_to_hex(v).as_bytes(), 0).is_some(),
            None => true,
        };
        found(self.major) && found(self.minor)
    }
}

/// Data extracted from a matching discovery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    /// 8 hex characters (company id and iBeacon type).
    pub access_address: String,
    /// 12 hex characters (advertiser MAC address).
    pub device_address: String,
    /// iBeacon major.
    pub major: u16,
    /// iBeacon minor.
    pub minor: u16,
    /// Received power in dBm; the wire carries its negation.
    pub tx_power: i16,
}

/// Count the `OK+DISC:` records in a discovery stream.
pub fn count_records(data: &[u8]) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(at) = find_bytes(data, DISCOVERY_RECORD.as_bytes(), from) {
        count += 1;
        from = at + DISCOVERY_RECORD.len();
    }
    count
}

/// Find the first record matching `filter` and extract its fields.
///
/// Returns `Ok(None)` when no complete record matches. Records cut short by the
/// end of `data` are skipped. A complete record that matches but does not follow
/// the fixed layout is an error.
pub fn find_match(data: &[u8], filter: &BeaconFilter) -> ProtocolResult<Option<ScanMatch>> {
    let needle = filter.uuid.as_bytes();
    let mut from = 0;

    while let Some(uuid_at) = find_bytes(data, needle, from) {
        from = uuid_at + needle.len();

        let record_end = find_bytes(data, RECORD_START, uuid_at).unwrap_or(data.len());
        if !filter.ids_match(&data[uuid_at..record_end]) {
            log::trace!("uuid at {} does not carry the requested major/minor", uuid_at);
            continue;
        }

        let base = uuid_at.checked_sub(UUID_OFFSET).ok_or_else(|| {
            ProtocolError::FormatMismatch {
                offset: uuid_at,
                reason: "uuid too close to the start of the stream".to_string(),
            }
        })?;

        if base + RECORD_LEN > data.len() {
            log::debug!("record at {} is truncated ({} bytes available)", base, data.len() - base);
            continue;
        }

        return parse_record(data, base).map(Some);
    }

    Ok(None)
}

/// Parse the record whose base is at `base`.
pub fn parse_record(data: &[u8], base: usize) -> ProtocolResult<ScanMatch> {
    let mismatch = |reason: &str| ProtocolError::FormatMismatch {
        offset: base,
        reason: reason.to_string(),
    };

    if base + RECORD_LEN > data.len() {
        return Err(mismatch("record is truncated"));
    }
    if base < DISCOVERY_RECORD.len()
        || &data[base - DISCOVERY_RECORD.len()..base] != DISCOVERY_RECORD.as_bytes()
    {
        return Err(mismatch("record is not preceded by OK+DISC:"));
    }

    let record = &data[base..base + RECORD_LEN];
    if SEPARATORS.iter().any(|&i| record[i] != b':') {
        return Err(mismatch("field separators are not where expected"));
    }

    let field = |(start, end): (usize, usize)| &record[start..end];
    for (name, range) in [
        ("access address", ACCESS_ADDRESS),
        ("major", MAJOR),
        ("minor", MINOR),
        ("sensor byte", SENSOR),
        ("device address", DEVICE_ADDRESS),
    ] {
        if !is_upper_hex(field(range)) {
            return Err(mismatch(&format!("{} is not uppercase hex", name)));
        }
    }

    if record[RSSI_SIGN] != b'-' {
        return Err(mismatch("rssi is not negative"));
    }
    let digits = field(RSSI_DIGITS);
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(mismatch("rssi magnitude is not decimal"));
    }
    let magnitude = digits
        .iter()
        .fold(0i16, |acc, d| acc * 10 + i16::from(d - b'0'));

    let mut major = [0u8; 4];
    major.copy_from_slice(field(MAJOR));
    let mut minor = [0u8; 4];
    minor.copy_from_slice(field(MINOR));

    Ok(ScanMatch {
        access_address: String::from_utf8_lossy(field(ACCESS_ADDRESS)).to_string(),
        device_address: String::from_utf8_lossy(field(DEVICE_ADDRESS)).to_string(),
        major: hex_to_u16(&major),
        minor: hex_to_u16(&minor),
        tx_power: -magnitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "0005000100001000800000805F9B0131";
    const STREAM: &str = "OK+DISI...OK+DISIS...OK+DISC:4C000215:0005000100001000800000805F9B0131:00014667C3:00A0500B1710:-078OK+DISCE";

    #[test]
    fn test_extract_from_observed_stream() {
        let found = find_match(STREAM.as_bytes(), &BeaconFilter::uuid(UUID))
            .unwrap()
            .expect("record should match");
        assert_eq!(found.access_address, "4C000215");
        assert_eq!(found.device_address, "00A0500B1710");
        assert_eq!(found.major, 0x0001);
        assert_eq!(found.minor, 0x4667);
        assert_eq!(found.tx_power, -78);
    }

    #[test]
    fn test_strict_ids_must_match() {
        let filter = BeaconFilter::uuid(UUID).with_ids(0x0001, 0x4667);
        assert!(find_match(STREAM.as_bytes(), &filter).unwrap().is_some());

        let filter = BeaconFilter::uuid(UUID).with_ids(0x0002, 0x4667);
        assert!(find_match(STREAM.as_bytes(), &filter).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_checked_per_record() {
        let stream = "OK+DISC:4C000215:0005000100001000800000805F9B0131:00014667C3:00A0500B1710:-078\
                      OK+DISC:4C000215:0005000100001000800000805F9B0131:00020003C3:00A0500B1711:-060\
                      OK+DISCE";
        let filter = BeaconFilter::uuid(UUID).with_ids(0x0002, 0x0003);
        let found = find_match(stream.as_bytes(), &filter).unwrap().unwrap();
        assert_eq!(found.device_address, "00A0500B1711");
        assert_eq!(found.tx_power, -60);
    }

    #[test]
    fn test_no_match() {
        let filter = BeaconFilter::uuid("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF");
        assert_eq!(find_match(STREAM.as_bytes(), &filter), Ok(None));
    }

    #[test]
    fn test_truncated_record_is_skipped() {
        let truncated = &STREAM[..STREAM.len() - 20];
        assert_eq!(find_match(truncated.as_bytes(), &BeaconFilter::uuid(UUID)), Ok(None));
    }

    #[test]
    fn test_layout_deviation_is_reported() {
        let shifted = STREAM.replace("00014667C3:", "00014667C3X:");
        let err = find_match(shifted.as_bytes(), &BeaconFilter::uuid(UUID)).unwrap_err();
        assert!(matches!(err, ProtocolError::FormatMismatch { .. }));
    }

    #[test]
    fn test_count_records() {
        assert_eq!(count_records(STREAM.as_bytes()), 1);
        assert_eq!(count_records(b"OK+DISCE"), 0);
    }
}
