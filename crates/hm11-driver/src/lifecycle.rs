//! Device lifecycle.
//!
//! [`Hm11`] is the driver handle. It owns the command engine (and through it
//! the transport and clock) plus the control pins, and sequences power, reset
//! and baud changes:
//!
//! ```text
//! Disabled --enable--> Enabling --hw reset--> BaudSyncing --baud confirmed--> Ready
//!    ^                                                                          |
//!    +------------------------------- disable ----------------------------------+
//! ```

use hm11_metrics::{metric_defs, metrics};
use hm11_protocol::{BaudRate, Command, ConfigKey, Response, Role, TxPower};
use tracing::{debug, trace, warn};

use crate::baud::BaudNegotiator;
use crate::config::Hm11Config;
use crate::engine::{CommandEngine, CommandResult};
use crate::error::{Hm11Error, Hm11Result};
use crate::hal::{Clock, ControlPins, Signal, Transport};

/// Length of a MAC address as reported by `AT+ADDR?`.
const MAC_LEN: usize = 12;

// ============================================================================
// State
// ============================================================================

/// Where the driver is in bringing the module up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Module powered down, line closed.
    Disabled,
    /// Module enabled, line opened, reset not yet issued.
    Enabling,
    /// Reset issued; the baud rate has not been confirmed.
    BaudSyncing,
    /// Module answering at the configured rate.
    Ready,
}

/// How a reset or renew sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The module did not acknowledge the command.
    NotAcknowledged,
    /// Acknowledged, and the module answered again within the settle window.
    Settled,
    /// Acknowledged, but the module stayed silent for the whole window.
    Unsettled,
}

/// `AT+RESET`, then wait for the module to go quiet and come back.
pub(crate) fn software_reset_sequence<T: Transport, C: Clock>(
    engine: &mut CommandEngine<T, C>,
    config: &Hm11Config,
) -> SettleOutcome {
    if !engine.set_conf(&Command::Reset) {
        return SettleOutcome::NotAcknowledged;
    }
    let started = engine.now_ms();
    let window = config.sw_reset_settle_ms;

    engine.wait_for_probe(false, started, window);
    if engine.wait_for_probe(true, started, window) {
        SettleOutcome::Settled
    } else {
        debug!("Hm11: no answer within {} ms of reset", window);
        SettleOutcome::Unsettled
    }
}

/// `AT+RENEW`, then wait out the restart it triggers.
pub(crate) fn renew_sequence<T: Transport, C: Clock>(
    engine: &mut CommandEngine<T, C>,
    config: &Hm11Config,
) -> SettleOutcome {
    if !engine.set_conf(&Command::Renew) {
        return SettleOutcome::NotAcknowledged;
    }
    let started = engine.now_ms();
    let window = config.sw_reset_settle_ms;

    engine.wait_for_probe(true, started, window);
    engine.wait_for_probe(false, started, window);
    if engine.wait_for_probe(true, started, window) {
        SettleOutcome::Settled
    } else {
        debug!("Hm11: no answer within {} ms of renew", window);
        SettleOutcome::Unsettled
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Driver for one HM-11 module.
#[derive(Debug)]
pub struct Hm11<T, P, C> {
    pub(crate) engine: CommandEngine<T, C>,
    pins: P,
    pub(crate) config: Hm11Config,
    configured_baud: Option<BaudRate>,
    state: LifecycleState,
}

impl<T: Transport, P: ControlPins, C: Clock> Hm11<T, P, C> {
    /// Create a driver. Nothing is sent until [`enable`](Self::enable).
    pub fn new(transport: T, pins: P, clock: C, config: Hm11Config) -> Self {
        let configured_baud = config.initial_baud.and_then(BaudRate::from_bits_per_second);
        if config.initial_baud.is_some() && configured_baud.is_none() {
            warn!("Hm11: ignoring unsupported initial baud {:?}", config.initial_baud);
        }

        Hm11 {
            engine: CommandEngine::new(transport, clock, &config),
            pins,
            config,
            configured_baud,
            state: LifecycleState::Disabled,
        }
    }

    // ========================================================================
    // Power
    // ========================================================================

    /// Power the module up and reset it.
    ///
    /// Returns whether the module answered after the reset.
    pub fn enable(&mut self) -> bool {
        let baud = self.configured_baud.unwrap_or(BaudRate::FACTORY_DEFAULT);
        debug!("Hm11: enabling at {} baud", baud);

        self.pins.deassert(Signal::Reset);
        self.pins.deassert(Signal::RxdLow);
        self.pins.deassert(Signal::TxdLow);
        self.pins.assert(Signal::Enable);
        self.state = LifecycleState::Enabling;

        if !self.engine.open(baud) {
            warn!("Hm11: line not ready at {} baud", baud);
            return false;
        }
        self.engine.drain_input();

        self.state = LifecycleState::BaudSyncing;
        self.hardware_reset()
    }

    /// Power the module down.
    pub fn disable(&mut self) {
        debug!("Hm11: disabling");
        // Reset first so the module is not powered through its reset input.
        self.pins.assert(Signal::Reset);
        self.engine.close();
        self.pins.assert(Signal::RxdLow);
        self.pins.assert(Signal::TxdLow);
        self.pins.deassert(Signal::Enable);
        self.state = LifecycleState::Disabled;
    }

    /// Enable the module and move it to `baud`.
    pub fn begin(&mut self, baud: BaudRate) -> bool {
        self.try_begin(baud).is_ok()
    }

    /// [`begin`](Self::begin), reporting why it failed.
    pub fn try_begin(&mut self, baud: BaudRate) -> Hm11Result<()> {
        self.enable();
        self.try_set_baud(baud)
    }

    /// Forget the negotiated rate and power down.
    pub fn end(&mut self) {
        self.configured_baud = None;
        self.disable();
    }

    /// Whether the module is powered.
    pub fn is_enabled(&self) -> bool {
        self.state != LifecycleState::Disabled && self.pins.is_asserted(Signal::Enable)
    }

    pub(crate) fn ensure_enabled(&self) -> Hm11Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Hm11Error::NotEnabled)
        }
    }

    // ========================================================================
    // Resets
    // ========================================================================

    /// Pulse the reset line and wait for the module to answer.
    pub fn hardware_reset(&mut self) -> bool {
        metrics::counter!(metric_defs::HARDWARE_RESETS.name).increment(1);
        self.pins.assert(Signal::Reset);
        self.engine.sleep_ms(self.config.reset_pulse_ms);
        self.pins.deassert(Signal::Reset);

        let started = self.engine.now_ms();
        let ready = self
            .engine
            .wait_for_probe(true, started, self.config.hw_reset_settle_ms);
        if ready {
            trace!("Hm11: answered {} ms after reset", self.engine.elapsed_since(started));
        } else {
            warn!(
                "Hm11: no answer within {} ms of hardware reset",
                self.config.hw_reset_settle_ms
            );
        }
        ready
    }

    /// `AT+RESET` and wait for the module to come back.
    pub fn software_reset(&mut self) -> bool {
        software_reset_sequence(&mut self.engine, &self.config) == SettleOutcome::Settled
    }

    /// Restore factory settings.
    ///
    /// The module comes back at the factory default rate; the line is reopened
    /// there. Returns whether the module answers afterwards.
    pub fn renew(&mut self) -> bool {
        let outcome = renew_sequence(&mut self.engine, &self.config);
        if outcome == SettleOutcome::NotAcknowledged {
            warn!("Hm11: renew not acknowledged");
            return false;
        }

        self.configured_baud = None;
        if self.state == LifecycleState::Ready {
            self.state = LifecycleState::BaudSyncing;
        }
        if !self.engine.open(BaudRate::FACTORY_DEFAULT) {
            warn!("Hm11: line not ready after renew");
            return false;
        }
        self.engine.probe().starts_with_ok()
    }

    /// Recovery for a module that no longer answers at the expected rate.
    ///
    /// Sends `AT+RENEW` at every supported rate, then powers down. Returns
    /// whether any rate acknowledged it.
    pub fn force_renew(&mut self) -> bool {
        self.enable();
        let mut renewed = false;

        for baud in BaudRate::ALL {
            debug!("Hm11: forcing renew at {} baud", baud);
            if !self.engine.open(baud) {
                continue;
            }
            for _ in 0..self.config.probe_attempts {
                self.engine.probe();
            }
            for attempt in 1..=self.config.renew_attempts {
                if self.engine.set_conf(&Command::Renew) {
                    debug!("Hm11: renew acknowledged at {} baud (attempt {})", baud, attempt);
                    renewed = true;
                    break;
                }
                self.engine.sleep_ms(self.config.sw_reset_settle_ms);
            }
        }

        self.configured_baud = None;
        self.disable();
        renewed
    }

    // ========================================================================
    // Baud
    // ========================================================================

    /// Find the rate the module is listening at.
    pub fn discover_current_baud(&mut self) -> Option<BaudRate> {
        BaudNegotiator::new(&mut self.engine, &self.config).discover_current_baud()
    }

    /// Move both ends to `target`. Returns whether the module confirmed it.
    pub fn set_baud(&mut self, target: BaudRate) -> bool {
        match self.try_set_baud(target) {
            Ok(()) => true,
            Err(e) => {
                warn!("Hm11: {}", e);
                false
            }
        }
    }

    /// [`set_baud`](Self::set_baud), reporting why it failed.
    pub fn try_set_baud(&mut self, target: BaudRate) -> Hm11Result<()> {
        self.ensure_enabled()?;
        self.state = LifecycleState::BaudSyncing;
        BaudNegotiator::new(&mut self.engine, &self.config).set_baud(target)?;
        self.configured_baud = Some(target);
        self.state = LifecycleState::Ready;
        Ok(())
    }

    // ========================================================================
    // Radio
    // ========================================================================

    /// Set the transmit power.
    pub fn set_tx_power(&mut self, power: TxPower) -> Hm11Result<()> {
        self.ensure_enabled()?;
        self.expect_ok(&Command::SetTxPower { power })
    }

    /// Read the transmit power.
    pub fn tx_power(&mut self) -> Hm11Result<TxPower> {
        self.ensure_enabled()?;
        let command = Command::Query { key: ConfigKey::TxPower };
        let result = self.engine.execute(&command);
        let response = self.checked(&command, result)?;
        let index = response.index()?;
        TxPower::from_index(index).ok_or_else(|| Hm11Error::UnexpectedResponse {
            command: command.to_command_string(),
            response: format!("{:?}", response),
        })
    }

    /// Read the module's MAC address (12 hex characters).
    pub fn mac_address(&mut self) -> Hm11Result<String> {
        self.ensure_enabled()?;
        let command = Command::Query { key: ConfigKey::Address };
        let result = self.engine.execute(&command);
        match self.checked(&command, result)? {
            Response::Address(mac) if mac.len() == MAC_LEN => Ok(mac),
            other => Err(Hm11Error::UnexpectedResponse {
                command: command.to_command_string(),
                response: format!("{:?}", other),
            }),
        }
    }

    /// Connect to a peer by MAC address.
    ///
    /// Switches the module to AT-only work type and the requested role, resets
    /// it, then issues the connect.
    pub fn connect_to_mac(&mut self, mac: &str, central: bool) -> Hm11Result<()> {
        self.ensure_enabled()?;
        let role = if central { Role::Central } else { Role::Peripheral };

        self.expect_ok(&Command::SetAtCommandsOnly)?;
        self.expect_ok(&Command::SetRole { role })?;
        self.software_reset();
        self.expect_ok(&Command::Connect {
            mac: mac.to_string(),
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn expect_ok(&mut self, command: &Command) -> Hm11Result<()> {
        let result = self.engine.execute(command);
        let response = self.checked(command, result)?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(Hm11Error::UnexpectedResponse {
                command: command.to_command_string(),
                response: format!("{:?}", response),
            })
        }
    }

    /// Turn a timed-out or `OK`-less exchange into an error.
    fn checked(&self, command: &Command, result: CommandResult) -> Hm11Result<Response> {
        if !result.succeeded {
            return Err(Hm11Error::Timeout {
                command: command.to_command_string(),
            });
        }
        if !result.contains_ok() {
            return Err(Hm11Error::UnexpectedResponse {
                command: command.to_command_string(),
                response: result.text,
            });
        }
        Ok(result.response())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Rate confirmed by the last successful negotiation.
    pub fn configured_baud(&self) -> Option<BaudRate> {
        self.configured_baud
    }

    /// Driver configuration.
    pub fn config(&self) -> &Hm11Config {
        &self.config
    }

    /// The command engine.
    pub fn engine(&self) -> &CommandEngine<T, C> {
        &self.engine
    }

    /// The command engine, mutably, for raw exchanges.
    pub fn engine_mut(&mut self) -> &mut CommandEngine<T, C> {
        &mut self.engine
    }

    /// The control pins.
    pub fn pins(&self) -> &P {
        &self.pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimModule, SimPins, SimTransport};

    type SimHm11 = Hm11<SimTransport, SimPins, SimClock>;

    fn driver(module: &SimModule) -> SimHm11 {
        Hm11::new(
            module.transport(),
            module.pins(),
            module.clock(),
            Hm11Config::default(),
        )
    }

    #[test]
    fn test_starts_disabled() {
        let module = SimModule::new();
        let hm11 = driver(&module);
        assert_eq!(hm11.state(), LifecycleState::Disabled);
        assert!(!hm11.is_enabled());
        assert_eq!(module.transport_calls(), 0);
    }

    #[test]
    fn test_enable_resets_and_answers() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);

        assert!(hm11.enable());
        assert!(hm11.is_enabled());
        assert_eq!(hm11.state(), LifecycleState::BaudSyncing);
        assert_eq!(module.host_baud(), Some(BaudRate::B9600));
        assert!(!module.is_in_reset());
        assert!(module.clock().now_ms() <= 10 + 500 + 100);
    }

    #[test]
    fn test_disable_sequence() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();
        hm11.disable();

        assert_eq!(hm11.state(), LifecycleState::Disabled);
        assert!(!module.is_enabled());
        assert!(module.is_in_reset());
        assert!(module.lines_low());
        assert_eq!(module.host_baud(), None);
    }

    #[test]
    fn test_hardware_reset_times_out_on_silent_module() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();
        module.set_silent(true);

        let started = module.clock().now_ms();
        assert!(!hm11.hardware_reset());
        let elapsed = module.clock().now_ms() - started;
        assert!(elapsed >= 10 + 500);
        assert!(elapsed <= 10 + 500 + 100);
    }

    #[test]
    fn test_software_reset() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();

        assert!(hm11.software_reset());
        assert!(module.writes().contains(&"AT+RESET".to_string()));
    }

    #[test]
    fn test_software_reset_without_ack() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();
        module.ignore_key("RESET");

        assert!(!hm11.software_reset());
    }

    #[test]
    fn test_renew_clears_settings() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();
        hm11.set_tx_power(TxPower::Plus6Dbm).unwrap();

        assert!(hm11.renew());
        assert_eq!(module.setting("POWE"), None);
        assert_eq!(hm11.configured_baud(), None);
    }

    #[test]
    fn test_enable_fails_when_line_not_ready() {
        let module = SimModule::new();
        module.fail_line_at(BaudRate::B9600);
        let mut hm11 = driver(&module);

        assert!(!hm11.enable());
        assert_eq!(hm11.state(), LifecycleState::Enabling);
        // No reset pulse, no probes.
        assert_eq!(module.write_count(), 0);
        assert!(!module.is_in_reset());
    }

    #[test]
    fn test_renew_fails_when_line_not_ready() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();
        module.fail_line_at(BaudRate::B9600);

        assert!(!hm11.renew());
        assert!(module.writes().contains(&"AT+RENEW".to_string()));
        assert_eq!(module.opens().last(), Some(&BaudRate::B9600));
        assert_eq!(hm11.configured_baud(), None);
    }

    #[test]
    fn test_begin_reaches_ready() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);

        assert!(hm11.begin(BaudRate::B38400));
        assert_eq!(hm11.state(), LifecycleState::Ready);
        assert_eq!(hm11.configured_baud(), Some(BaudRate::B38400));
        assert_eq!(module.module_baud(), BaudRate::B38400);
    }

    #[test]
    fn test_enable_reopens_at_configured_baud() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        assert!(hm11.begin(BaudRate::B19200));
        hm11.disable();

        assert!(hm11.enable());
        assert_eq!(module.host_baud(), Some(BaudRate::B19200));
    }

    #[test]
    fn test_end_forgets_baud() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        assert!(hm11.begin(BaudRate::B19200));
        hm11.end();

        assert_eq!(hm11.configured_baud(), None);
        assert!(!hm11.is_enabled());
    }

    #[test]
    fn test_set_baud_requires_enable() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        assert!(!hm11.set_baud(BaudRate::B38400));
        assert!(matches!(
            hm11.try_set_baud(BaudRate::B38400),
            Err(Hm11Error::NotEnabled)
        ));
        assert_eq!(module.write_count(), 0);
    }

    #[test]
    fn test_tx_power_round_trip() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();

        assert_eq!(hm11.tx_power().unwrap(), TxPower::ZeroDbm);
        hm11.set_tx_power(TxPower::Minus23Dbm).unwrap();
        assert_eq!(hm11.tx_power().unwrap(), TxPower::Minus23Dbm);
        assert!(module.writes().contains(&"AT+POWE0".to_string()));
    }

    #[test]
    fn test_mac_address() {
        let module = SimModule::new().with_mac("A4C138000001");
        let mut hm11 = driver(&module);
        hm11.enable();

        assert_eq!(hm11.mac_address().unwrap(), "A4C138000001");
    }

    #[test]
    fn test_mac_address_wrong_length() {
        let module = SimModule::new().with_mac("A4C1");
        let mut hm11 = driver(&module);
        hm11.enable();

        assert!(matches!(
            hm11.mac_address(),
            Err(Hm11Error::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_mac_address_timeout() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();
        module.set_silent(true);

        assert!(matches!(hm11.mac_address(), Err(Hm11Error::Timeout { .. })));
    }

    #[test]
    fn test_connect_to_mac_sequence() {
        let module = SimModule::new();
        let mut hm11 = driver(&module);
        hm11.enable();

        hm11.connect_to_mac("A4C138000001", true).unwrap();
        let writes: Vec<_> = module
            .writes()
            .into_iter()
            .filter(|w| w != "AT")
            .collect();
        assert_eq!(
            writes,
            vec!["AT+IMME1", "AT+ROLE1", "AT+RESET", "AT+CONA4C138000001"]
        );
    }

    #[test]
    fn test_force_renew_powers_down() {
        let module = SimModule::new().with_baud(BaudRate::B57600);
        let mut hm11 = driver(&module);

        assert!(hm11.force_renew());
        assert!(!hm11.is_enabled());
        assert_eq!(module.module_baud(), BaudRate::B9600);
    }
}
