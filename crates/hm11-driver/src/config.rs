//! Driver configuration.
//!
//! Every timing constant the driver uses lives in [`Hm11Config`]. The defaults
//! match the module's datasheet behaviour; deployments can override any field
//! from YAML:
//!
//! ```yaml
//! command_timeout_ms: 150
//! initial_baud: 38400
//! ```

use hm11_protocol::BaudRate;
use serde::{Deserialize, Serialize};

use crate::error::{Hm11Error, Hm11Result};

// ============================================================================
// Defaults
// ============================================================================

/// Timeout for one AT exchange (milliseconds).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 100;

/// Settle window after a hardware reset pulse (milliseconds).
pub const DEFAULT_HW_RESET_SETTLE_MS: u64 = 500;

/// Settle window after a software reset or factory renew (milliseconds).
pub const DEFAULT_SW_RESET_SETTLE_MS: u64 = 1000;

/// Default scan duration (milliseconds).
pub const DEFAULT_DETECTION_MS: u64 = 5000;

/// Default scan buffer ceiling (bytes).
pub const DEFAULT_MEMORY_BUDGET: usize = 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Timing and retry settings for the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hm11Config {
    /// Timeout for one AT exchange.
    pub command_timeout_ms: u64,
    /// Sleep between polls of an idle transport.
    pub poll_interval_ms: u64,
    /// How long to wait for the transport to report ready after opening.
    pub ready_timeout_ms: u64,
    /// Width of the hardware reset pulse.
    pub reset_pulse_ms: u64,
    /// Settle window after a hardware reset.
    pub hw_reset_settle_ms: u64,
    /// Settle window after a software reset or factory renew.
    pub sw_reset_settle_ms: u64,
    /// `AT` probes per candidate rate during baud discovery.
    pub probe_attempts: u32,
    /// `AT+RENEW` attempts per rate during a forced renew.
    pub renew_attempts: u32,
    /// Scan duration used when a request does not set one.
    pub default_detection_ms: u64,
    /// Scan buffer ceiling used when a request does not set one.
    pub default_memory_budget: usize,
    /// Rate to open the line at when the driver has not negotiated one yet,
    /// in bits per second. `None` means the factory default.
    pub initial_baud: Option<u32>,
}

impl Default for Hm11Config {
    fn default() -> Self {
        Hm11Config {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            poll_interval_ms: 1,
            ready_timeout_ms: 100,
            reset_pulse_ms: 10,
            hw_reset_settle_ms: DEFAULT_HW_RESET_SETTLE_MS,
            sw_reset_settle_ms: DEFAULT_SW_RESET_SETTLE_MS,
            probe_attempts: 5,
            renew_attempts: 5,
            default_detection_ms: DEFAULT_DETECTION_MS,
            default_memory_budget: DEFAULT_MEMORY_BUDGET,
            initial_baud: None,
        }
    }
}

impl Hm11Config {
    /// Parse a configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Hm11Result<Self> {
        let config: Hm11Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the driver cannot work with.
    pub fn validate(&self) -> Hm11Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(Hm11Error::Config(
                "command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Hm11Error::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.probe_attempts == 0 {
            return Err(Hm11Error::Config(
                "probe_attempts must be greater than zero".to_string(),
            ));
        }
        if self.default_memory_budget == 0 {
            return Err(Hm11Error::Config(
                "default_memory_budget must be greater than zero".to_string(),
            ));
        }
        self.initial_baud_rate()?;
        Ok(())
    }

    /// The configured initial rate, or the factory default.
    pub fn initial_baud_rate(&self) -> Hm11Result<BaudRate> {
        match self.initial_baud {
            None => Ok(BaudRate::FACTORY_DEFAULT),
            Some(bps) => BaudRate::from_bits_per_second(bps)
                .ok_or_else(|| Hm11Error::Config(format!("unsupported baud rate {}", bps))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Hm11Config::default();
        assert_eq!(config.command_timeout_ms, 100);
        assert_eq!(config.hw_reset_settle_ms, 500);
        assert_eq!(config.sw_reset_settle_ms, 1000);
        assert_eq!(config.default_detection_ms, 5000);
        assert_eq!(config.probe_attempts, 5);
        assert_eq!(config.initial_baud_rate().unwrap(), BaudRate::B9600);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Hm11Config::from_yaml_str("command_timeout_ms: 250\ninitial_baud: 38400\n")
            .unwrap();
        assert_eq!(config.command_timeout_ms, 250);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.initial_baud_rate().unwrap(), BaudRate::B38400);
    }

    #[test]
    fn test_unsupported_baud_rejected() {
        let err = Hm11Config::from_yaml_str("initial_baud: 12345").unwrap_err();
        assert!(matches!(err, Hm11Error::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Hm11Config::from_yaml_str("command_timeout_ms: 0").unwrap_err();
        assert!(matches!(err, Hm11Error::Config(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = Hm11Config::from_yaml_str("command_timeout_ms: [1, 2").unwrap_err();
        assert!(matches!(err, Hm11Error::Yaml(_)));
    }
}
