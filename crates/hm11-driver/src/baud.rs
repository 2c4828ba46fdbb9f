//! Baud rate discovery and switching.
//!
//! The module stores its UART rate in flash and only applies a new one after a
//! reset, so both ends have to be moved in lock step. [`BaudNegotiator`]
//! borrows the command engine for the duration of one negotiation.

use hm11_metrics::{metric_defs, metrics};
use hm11_protocol::{BaudRate, Command, ConfigKey};
use tracing::{debug, warn};

use crate::config::Hm11Config;
use crate::engine::CommandEngine;
use crate::error::NegotiationError;
use crate::hal::{Clock, Transport};
use crate::lifecycle::{renew_sequence, software_reset_sequence, SettleOutcome};

/// Finds and changes the rate the module listens at.
pub struct BaudNegotiator<'a, T, C> {
    engine: &'a mut CommandEngine<T, C>,
    config: &'a Hm11Config,
}

impl<'a, T: Transport, C: Clock> BaudNegotiator<'a, T, C> {
    /// Borrow an engine for one negotiation.
    pub fn new(engine: &'a mut CommandEngine<T, C>, config: &'a Hm11Config) -> Self {
        BaudNegotiator { engine, config }
    }

    /// Probe every supported rate, lowest first.
    ///
    /// Leaves the line open at the rate that answered. Returns `None` if none
    /// did.
    pub fn discover_current_baud(&mut self) -> Option<BaudRate> {
        for baud in BaudRate::ALL {
            if !self.engine.open(baud) {
                continue;
            }
            for attempt in 1..=self.config.probe_attempts {
                // Noise right after reopening can precede the OK.
                if self.engine.probe().contains_ok() {
                    debug!(
                        "BaudNegotiator: module answered at {} baud (attempt {})",
                        baud, attempt
                    );
                    metrics::counter!(metric_defs::BAUD_DISCOVERIES.name, "outcome" => "found")
                        .increment(1);
                    return Some(baud);
                }
            }
            debug!("BaudNegotiator: no answer at {} baud", baud);
        }

        warn!("BaudNegotiator: module did not answer at any rate");
        metrics::counter!(metric_defs::BAUD_DISCOVERIES.name, "outcome" => "not_found")
            .increment(1);
        None
    }

    /// Move both ends to `target`.
    pub fn set_baud(&mut self, target: BaudRate) -> Result<(), NegotiationError> {
        let current = self
            .discover_current_baud()
            .ok_or(NegotiationError::NoResponse)?;

        if current == target {
            debug!("BaudNegotiator: already at {} baud", target);
            return Ok(());
        }

        // AT+BAUD is only accepted reliably from the factory default.
        if current != BaudRate::FACTORY_DEFAULT {
            debug!("BaudNegotiator: renewing from {} baud", current);
            if renew_sequence(self.engine, self.config) == SettleOutcome::NotAcknowledged {
                return Err(NegotiationError::RenewNotAcknowledged { from: current });
            }
            self.reopen(BaudRate::FACTORY_DEFAULT)?;
        }

        if !self.engine.set_conf(&Command::SetBaud { baud: target }) {
            return Err(NegotiationError::SwitchNotAcknowledged { target });
        }

        // The reset answers at the old rate, then the module comes back at the
        // new one, so the settle poll is expected to run out its window here.
        if software_reset_sequence(self.engine, self.config) == SettleOutcome::NotAcknowledged {
            return Err(NegotiationError::ResetNotAcknowledged);
        }

        self.reopen(target)?;
        let verification = self.engine.get_conf(ConfigKey::Baud);
        let confirmed = verification.contains_ok()
            && verification
                .response()
                .index()
                .is_ok_and(|index| index == target.index());
        if !confirmed {
            return Err(NegotiationError::VerificationFailed {
                target,
                response: verification.text,
            });
        }

        debug!("BaudNegotiator: switched {} -> {} baud", current, target);
        Ok(())
    }

    fn reopen(&mut self, baud: BaudRate) -> Result<(), NegotiationError> {
        if self.engine.open(baud) {
            Ok(())
        } else {
            Err(NegotiationError::LineNotReady { baud })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimModule, SimTransport};

    fn engine(module: &SimModule) -> CommandEngine<SimTransport, SimClock> {
        module.power_on();
        CommandEngine::new(module.transport(), module.clock(), &Hm11Config::default())
    }

    #[test]
    fn test_discover_factory_default() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        let config = Hm11Config::default();

        let found = BaudNegotiator::new(&mut engine, &config).discover_current_baud();
        assert_eq!(found, Some(BaudRate::B9600));
        assert_eq!(module.opens(), vec![BaudRate::B9600]);
    }

    #[test]
    fn test_discover_walks_candidates_in_order() {
        let module = SimModule::new().with_baud(BaudRate::B38400);
        let mut engine = engine(&module);
        let config = Hm11Config::default();

        let found = BaudNegotiator::new(&mut engine, &config).discover_current_baud();
        assert_eq!(found, Some(BaudRate::B38400));
        assert_eq!(
            module.opens(),
            vec![BaudRate::B9600, BaudRate::B19200, BaudRate::B38400]
        );
        // Five unanswered probes at each of the two wrong rates, one answered.
        assert_eq!(module.write_count(), 11);
    }

    #[test]
    fn test_discover_accepts_noise_before_ok() {
        let module = SimModule::new().with_baud(BaudRate::B38400);
        module.set_reply_noise(b"\xF8");
        let mut engine = engine(&module);
        let config = Hm11Config::default();

        let found = BaudNegotiator::new(&mut engine, &config).discover_current_baud();
        assert_eq!(found, Some(BaudRate::B38400));

        let reply = engine.probe();
        assert!(reply.contains_ok());
        assert!(!reply.starts_with_ok());
    }

    #[test]
    fn test_discover_silent_module() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.set_silent(true);
        let config = Hm11Config::default();

        let found = BaudNegotiator::new(&mut engine, &config).discover_current_baud();
        assert_eq!(found, None);
        assert_eq!(module.opens().len(), BaudRate::ALL.len());
    }

    #[test]
    fn test_set_baud_from_default() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        let config = Hm11Config::default();

        BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B57600)
            .unwrap();
        assert_eq!(module.module_baud(), BaudRate::B57600);
        assert_eq!(module.host_baud(), Some(BaudRate::B57600));
        assert!(module.writes().contains(&"AT+BAUD3".to_string()));
        assert!(!module.writes().contains(&"AT+RENEW".to_string()));
    }

    #[test]
    fn test_set_baud_from_non_default_renews_first() {
        let module = SimModule::new().with_baud(BaudRate::B19200);
        let mut engine = engine(&module);
        let config = Hm11Config::default();

        BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B115200)
            .unwrap();
        assert_eq!(module.module_baud(), BaudRate::B115200);

        let writes = module.writes();
        let renew = writes.iter().position(|w| w == "AT+RENEW").unwrap();
        let switch = writes.iter().position(|w| w == "AT+BAUD4").unwrap();
        assert!(renew < switch);
    }

    #[test]
    fn test_set_baud_already_there() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        let config = Hm11Config::default();

        BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B9600)
            .unwrap();
        assert!(!module.writes().iter().any(|w| w.starts_with("AT+BAUD")));
    }

    #[test]
    fn test_set_baud_rejected() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.ignore_key("BAUD");
        let config = Hm11Config::default();

        let err = BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B38400)
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::SwitchNotAcknowledged {
                target: BaudRate::B38400
            }
        );
        assert_eq!(module.module_baud(), BaudRate::B9600);
    }

    #[test]
    fn test_set_baud_line_not_ready_at_target() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.fail_line_at(BaudRate::B57600);
        let config = Hm11Config::default();

        let err = BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B57600)
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::LineNotReady {
                baud: BaudRate::B57600
            }
        );
        // Nothing was sent once the line failed.
        assert!(!module.writes().contains(&"AT+BAUD?".to_string()));
    }

    #[test]
    fn test_set_baud_unreadable_verification() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.override_query("BAUD", "x");
        let config = Hm11Config::default();

        let err = BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B57600)
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::VerificationFailed {
                target: BaudRate::B57600,
                response: "OK+Get:x".to_string(),
            }
        );
    }

    #[test]
    fn test_set_baud_wrong_verification_index() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.override_query("BAUD", "2");
        let config = Hm11Config::default();

        let err = BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B57600)
            .unwrap_err();
        assert!(matches!(err, NegotiationError::VerificationFailed { .. }));
    }

    #[test]
    fn test_set_baud_no_module() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.set_silent(true);
        let config = Hm11Config::default();

        let err = BaudNegotiator::new(&mut engine, &config)
            .set_baud(BaudRate::B38400)
            .unwrap_err();
        assert_eq!(err, NegotiationError::NoResponse);
    }
}
