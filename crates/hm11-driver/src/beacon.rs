//! iBeacon advertising and detector setup.

use hm11_metrics::{metric_defs, metrics};
use hm11_protocol::hex::is_upper_hex;
use hm11_protocol::{AdvertInterval, Command, Role};
use tracing::{debug, warn};

use crate::error::{BeaconValidationError, Hm11Result};
use crate::hal::{Clock, ControlPins, Transport};
use crate::lifecycle::Hm11;

/// Longest advertised name the module accepts.
pub const MAX_NAME_LEN: usize = 12;

/// Highest valid major/minor; 0xFFFE and 0xFFFF are reserved.
pub const MAX_BEACON_ID: u16 = 0xFFFD;

/// Parameters for iBeacon advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconDescriptor {
    /// Advertised name, at most 12 characters.
    pub name: String,
    /// 32 uppercase hex digits.
    pub uuid: String,
    /// 1..=0xFFFD.
    pub major: u16,
    /// 1..=0xFFFD.
    pub minor: u16,
    /// Advertising interval index 0..=9.
    pub advertising_interval: u8,
}

impl BeaconDescriptor {
    /// Descriptor with the default (slowest) advertising interval.
    pub fn new(name: impl Into<String>, uuid: impl Into<String>, major: u16, minor: u16) -> Self {
        BeaconDescriptor {
            name: name.into(),
            uuid: uuid.into(),
            major,
            minor,
            advertising_interval: AdvertInterval::default().index(),
        }
    }

    /// Set the advertising interval index.
    pub fn with_interval(mut self, index: u8) -> Self {
        self.advertising_interval = index;
        self
    }

    /// Check every field; the first violation is reported.
    pub fn validate(&self) -> Result<(), BeaconValidationError> {
        let name_len = self.name.chars().count();
        if name_len > MAX_NAME_LEN {
            return Err(BeaconValidationError::NameTooLong { len: name_len });
        }
        if self.uuid.len() != 32 || !is_upper_hex(self.uuid.as_bytes()) {
            return Err(BeaconValidationError::InvalidUuid(self.uuid.clone()));
        }
        if !(1..=MAX_BEACON_ID).contains(&self.major) {
            return Err(BeaconValidationError::MajorOutOfRange(self.major));
        }
        if !(1..=MAX_BEACON_ID).contains(&self.minor) {
            return Err(BeaconValidationError::MinorOutOfRange(self.minor));
        }
        if AdvertInterval::from_index(self.advertising_interval).is_none() {
            return Err(BeaconValidationError::IntervalOutOfRange(
                self.advertising_interval,
            ));
        }
        Ok(())
    }

    /// The configuration commands for this descriptor, in the order they are
    /// sent. Assumes [`validate`](Self::validate) passed.
    pub fn directives(&self) -> Vec<Command> {
        let mut commands = vec![
            Command::SetMajor { major: self.major },
            Command::SetMinor { minor: self.minor },
        ];

        for (index, segment) in self.uuid.as_bytes().chunks(8).enumerate() {
            commands.push(Command::SetUuidSegment {
                index: index as u8,
                segment: String::from_utf8_lossy(segment).to_string(),
            });
        }

        commands.push(Command::SetName {
            name: self.name.clone(),
        });
        commands.push(Command::SetAdvertInterval {
            interval: AdvertInterval::from_index(self.advertising_interval).unwrap_or_default(),
        });
        commands.extend([
            Command::SetAdvertisingOnly,
            Command::SetIBeacon { enabled: true },
            Command::SetBroadcastOnly,
            Command::SetAutoSleep { enabled: false },
        ]);
        commands
    }
}

/// Which setup directives the module acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Directives answered with `OK`.
    pub acknowledged: usize,
    /// Command strings of directives that were not.
    pub failed: Vec<String>,
}

impl SetupReport {
    /// Total directives sent.
    pub fn total(&self) -> usize {
        self.acknowledged + self.failed.len()
    }

    /// Whether every directive was acknowledged.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, command: &Command, acknowledged: bool) {
        if acknowledged {
            self.acknowledged += 1;
        } else {
            self.failed.push(command.to_command_string());
        }
    }
}

impl<T: Transport, P: ControlPins, C: Clock> Hm11<T, P, C> {
    /// Configure the module to advertise as an iBeacon.
    ///
    /// Nothing is sent if the descriptor is invalid. Unacknowledged directives
    /// do not stop the sequence; they are listed in the report.
    pub fn setup_as_beacon(&mut self, descriptor: &BeaconDescriptor) -> Hm11Result<SetupReport> {
        descriptor.validate()?;
        self.ensure_enabled()?;
        debug!("Hm11: setting up as iBeacon {:?}", descriptor.name);

        let mut report = SetupReport::default();
        for command in descriptor.directives() {
            let acknowledged = self.engine.set_conf(&command);
            report.record(&command, acknowledged);
        }

        if !report.is_complete() {
            warn!(
                "Hm11: {} of {} beacon directives not acknowledged: {:?}",
                report.failed.len(),
                report.total(),
                report.failed
            );
            metrics::counter!(metric_defs::BEACON_DIRECTIVE_FAILURES.name)
                .increment(report.failed.len() as u64);
        }
        Ok(report)
    }

    /// Configure the module to scan for iBeacons.
    pub fn setup_as_detector(&mut self) -> Hm11Result<SetupReport> {
        self.ensure_enabled()?;
        debug!("Hm11: setting up as iBeacon detector");

        let mut report = SetupReport::default();
        for command in [
            Command::SetAtCommandsOnly,
            Command::SetRole {
                role: Role::Central,
            },
        ] {
            let acknowledged = self.engine.set_conf(&command);
            report.record(&command, acknowledged);
        }
        let reset = self.software_reset();
        report.record(&Command::Reset, reset);
        Ok(report)
    }
}
