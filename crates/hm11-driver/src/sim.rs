//! Simulated HM-11 module.
//!
//! [`SimModule`] models the parts of the module the driver depends on: the AT
//! command set, the UART rate it listens at, reset and renew timing, and the
//! discovery stream. It hands out a [`SimTransport`], [`SimPins`] and a
//! [`SimClock`] that all share one state, so a test can drive an
//! [`Hm11`](crate::Hm11) and then inspect what the module saw.
//!
//! Time only moves when the driver sleeps. Every run is deterministic.
//!
//! ```rust
//! use hm11_driver::sim::SimModule;
//! use hm11_driver::{Hm11, Hm11Config};
//! use hm11_protocol::BaudRate;
//!
//! let module = SimModule::new().with_baud(BaudRate::B38400);
//! let mut hm11 = Hm11::new(module.transport(), module.pins(), module.clock(), Hm11Config::default());
//! hm11.enable();
//! assert_eq!(hm11.discover_current_baud(), Some(BaudRate::B38400));
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use hm11_protocol::{BaudRate, ConfigKey, DISCOVERY_ENDED, DISCOVERY_STARTED, OK};

use crate::hal::{Clock, ControlPins, Signal, Transport};

// ============================================================================
// Clock
// ============================================================================

/// Manually advanced millisecond clock.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Timing behaviour of the simulated module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTimings {
    /// Delay between receiving a command and the reply becoming available.
    pub reply_delay_ms: u64,
    /// How long the module keeps answering after `AT+RESET`/`AT+RENEW`.
    pub restart_delay_ms: u64,
    /// How long the module is unresponsive while restarting.
    pub restart_busy_ms: u64,
    /// How long the module is unresponsive after a hardware reset pulse.
    pub boot_busy_ms: u64,
    /// Gap between the leading `OK` of a structured reply and the rest of it.
    pub structured_gap_ms: u64,
}

impl Default for SimTimings {
    fn default() -> Self {
        SimTimings {
            reply_delay_ms: 0,
            restart_delay_ms: 5,
            restart_busy_ms: 300,
            boot_busy_ms: 150,
            structured_gap_ms: 0,
        }
    }
}

/// Bytes the module streams after acknowledging `AT+DISI?`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryScript {
    chunks: Vec<(u64, Vec<u8>)>,
}

impl DiscoveryScript {
    /// An empty script; the scan never ends on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `bytes` `delay_ms` after the previous chunk.
    pub fn then(mut self, delay_ms: u64, bytes: impl AsRef<[u8]>) -> Self {
        self.chunks.push((delay_ms, bytes.as_ref().to_vec()));
        self
    }

    /// Emit one `OK+DISC:` record.
    pub fn record(self, delay_ms: u64, record: &str) -> Self {
        self.then(delay_ms, format!("OK+DISC:{}", record))
    }

    /// Emit the end marker.
    pub fn end(self, delay_ms: u64) -> Self {
        self.then(delay_ms, DISCOVERY_ENDED)
    }
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug)]
struct SimState {
    timings: SimTimings,
    module_baud: BaudRate,
    pending_baud: Option<BaudRate>,
    host_baud: Option<BaudRate>,
    enabled: bool,
    in_reset: bool,
    rxd_low: bool,
    txd_low: bool,
    busy_from: u64,
    busy_until: u64,
    silent: bool,
    /// Bytes sent ahead of every reply.
    reply_noise: Vec<u8>,
    /// Rates at which the host line never becomes ready.
    dead_rates: Vec<BaudRate>,
    ignored: HashSet<String>,
    settings: HashMap<String, String>,
    /// Forced answers to `AT+<KEY>?`, by wire name.
    query_overrides: HashMap<String, String>,
    mac: String,
    discovery: DiscoveryScript,
    /// Module to host bytes with the time they become readable.
    outbound: VecDeque<(u64, u8)>,
    writes: Vec<String>,
    opens: Vec<BaudRate>,
    flushes: usize,
    transport_calls: usize,
}

impl SimState {
    fn new() -> Self {
        SimState {
            timings: SimTimings::default(),
            module_baud: BaudRate::FACTORY_DEFAULT,
            pending_baud: None,
            host_baud: None,
            enabled: false,
            in_reset: false,
            rxd_low: false,
            txd_low: false,
            busy_from: 0,
            busy_until: 0,
            silent: false,
            reply_noise: Vec::new(),
            dead_rates: Vec::new(),
            ignored: HashSet::new(),
            settings: HashMap::new(),
            query_overrides: HashMap::new(),
            mac: "20C38FF61B2A".to_string(),
            discovery: DiscoveryScript::new(),
            outbound: VecDeque::new(),
            writes: Vec::new(),
            opens: Vec::new(),
            flushes: 0,
            transport_calls: 0,
        }
    }

    fn responsive(&self, now: u64) -> bool {
        let busy = now >= self.busy_from && now < self.busy_until;
        self.enabled && !self.in_reset && !self.silent && !busy
    }

    fn queue(&mut self, at: u64, bytes: &[u8]) {
        self.outbound.extend(bytes.iter().map(|&b| (at, b)));
    }

    fn readable(&self, now: u64) -> usize {
        self.outbound.iter().take_while(|(at, _)| *at <= now).count()
    }

    /// Reboot: apply any pending rate and go quiet for a while.
    fn restart(&mut self, now: u64, delay_ms: u64, busy_ms: u64) {
        if let Some(baud) = self.pending_baud.take() {
            self.module_baud = baud;
        }
        self.outbound.clear();
        self.busy_from = now + delay_ms;
        self.busy_until = self.busy_from + busy_ms;
    }

    fn receive(&mut self, now: u64, command: &str) {
        self.writes.push(command.to_string());

        if !self.responsive(now) || self.host_baud != Some(self.module_baud) {
            return;
        }
        let Some(reply) = self.answer(now, command) else {
            return;
        };
        let at = now + self.timings.reply_delay_ms;
        let noise = self.reply_noise.clone();
        self.queue(at, &noise);

        let gap = self.timings.structured_gap_ms;
        match reply.strip_prefix(OK) {
            Some(rest) if gap > 0 && rest.starts_with('+') => {
                self.queue(at, OK.as_bytes());
                self.queue(at + gap, rest.as_bytes());
            }
            _ => self.queue(at, reply.as_bytes()),
        }
    }

    fn answer(&mut self, now: u64, command: &str) -> Option<String> {
        if command == "AT" {
            return Some("OK".to_string());
        }

        let payload = command.strip_prefix("AT+")?;
        let (key, value) = ConfigKey::split_payload(payload)?;
        if self.ignored.contains(key.as_str()) {
            return None;
        }

        match key {
            ConfigKey::Reset => {
                let (delay, busy) = (self.timings.restart_delay_ms, self.timings.restart_busy_ms);
                self.restart(now, delay, busy);
                Some("OK+RESET".to_string())
            }
            ConfigKey::Renew => {
                self.settings.clear();
                self.pending_baud = Some(BaudRate::FACTORY_DEFAULT);
                let (delay, busy) = (self.timings.restart_delay_ms, self.timings.restart_busy_ms);
                self.restart(now, delay, busy);
                Some("OK+RENEW".to_string())
            }
            ConfigKey::Discovery if value == "?" => {
                let ack_at = now + self.timings.reply_delay_ms;
                let mut at = ack_at;
                let chunks = self.discovery.chunks.clone();
                // The acknowledgement goes out first, records follow it.
                self.queue(ack_at, DISCOVERY_STARTED.as_bytes());
                for (delay, bytes) in chunks {
                    at += delay;
                    self.queue(at, &bytes);
                }
                None
            }
            ConfigKey::Address if value == "?" => Some(format!("OK+ADDR:{}", self.mac)),
            _ if value == "?" => Some(format!("OK+Get:{}", self.get(key))),
            ConfigKey::Baud => {
                let baud = value.parse().ok().and_then(BaudRate::from_index)?;
                self.pending_baud = Some(baud);
                Some(format!("OK+Set:{}", value))
            }
            ConfigKey::Connect => Some("OK+CONNA".to_string()),
            _ => {
                self.settings.insert(key.as_str().to_string(), value.to_string());
                Some(format!("OK+Set:{}", value))
            }
        }
    }

    fn get(&self, key: ConfigKey) -> String {
        if let Some(value) = self.query_overrides.get(key.as_str()) {
            return value.clone();
        }
        match key {
            ConfigKey::Baud => self.module_baud.index().to_string(),
            ConfigKey::TxPower => self
                .settings
                .get(key.as_str())
                .cloned()
                .unwrap_or_else(|| "2".to_string()),
            _ => self
                .settings
                .get(key.as_str())
                .cloned()
                .unwrap_or_else(|| "0".to_string()),
        }
    }
}

// ============================================================================
// Module
// ============================================================================

/// A simulated module and the handles to drive it.
#[derive(Debug, Clone)]
pub struct SimModule {
    state: Rc<RefCell<SimState>>,
    clock: SimClock,
}

impl Default for SimModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimModule {
    /// A powered-down module listening at the factory default rate.
    pub fn new() -> Self {
        SimModule {
            state: Rc::new(RefCell::new(SimState::new())),
            clock: SimClock::new(),
        }
    }

    /// Set the rate the module is listening at.
    pub fn with_baud(self, baud: BaudRate) -> Self {
        self.state.borrow_mut().module_baud = baud;
        self
    }

    /// Replace the timing behaviour.
    pub fn with_timings(self, timings: SimTimings) -> Self {
        self.state.borrow_mut().timings = timings;
        self
    }

    /// Script what a discovery scan streams.
    pub fn with_discovery(self, script: DiscoveryScript) -> Self {
        self.state.borrow_mut().discovery = script;
        self
    }

    /// Set the MAC address the module reports.
    pub fn with_mac(self, mac: &str) -> Self {
        self.state.borrow_mut().mac = mac.to_string();
        self
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// A transport connected to this module.
    pub fn transport(&self) -> SimTransport {
        SimTransport {
            state: Rc::clone(&self.state),
            clock: self.clock.clone(),
        }
    }

    /// Control pins wired to this module.
    pub fn pins(&self) -> SimPins {
        SimPins {
            state: Rc::clone(&self.state),
            clock: self.clock.clone(),
        }
    }

    /// The clock shared by all handles.
    pub fn clock(&self) -> SimClock {
        self.clock.clone()
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Enable the module without going through the pins.
    pub fn power_on(&self) {
        self.state.borrow_mut().enabled = true;
    }

    /// Stop answering anything.
    pub fn set_silent(&self, silent: bool) {
        self.state.borrow_mut().silent = silent;
    }

    /// Stop acknowledging commands for one configuration key (wire name).
    pub fn ignore_key(&self, key: &str) {
        self.state.borrow_mut().ignored.insert(key.to_string());
    }

    /// Send `bytes` ahead of every reply, like line noise after a rate change.
    pub fn set_reply_noise(&self, bytes: &[u8]) {
        self.state.borrow_mut().reply_noise = bytes.to_vec();
    }

    /// Answer `AT+<key>?` with `value` regardless of the module's state.
    pub fn override_query(&self, key: &str, value: &str) {
        self.state
            .borrow_mut()
            .query_overrides
            .insert(key.to_string(), value.to_string());
    }

    /// Never report the host line ready while it is open at `baud`.
    pub fn fail_line_at(&self, baud: BaudRate) {
        self.state.borrow_mut().dead_rates.push(baud);
    }

    /// Resume acknowledging a key.
    pub fn unignore_key(&self, key: &str) {
        self.state.borrow_mut().ignored.remove(key);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Rate the module is listening at.
    pub fn module_baud(&self) -> BaudRate {
        self.state.borrow().module_baud
    }

    /// Rate the host side is open at.
    pub fn host_baud(&self) -> Option<BaudRate> {
        self.state.borrow().host_baud
    }

    /// Every command written, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state.borrow().writes.clone()
    }

    /// Number of commands written.
    pub fn write_count(&self) -> usize {
        self.state.borrow().writes.len()
    }

    /// Number of calls made on the transport, of any kind.
    pub fn transport_calls(&self) -> usize {
        self.state.borrow().transport_calls
    }

    /// Number of transport flushes.
    pub fn flush_count(&self) -> usize {
        self.state.borrow().flushes
    }

    /// Rates the host opened the line at, in order.
    pub fn opens(&self) -> Vec<BaudRate> {
        self.state.borrow().opens.clone()
    }

    /// Bytes queued toward the host, readable now or later.
    pub fn pending_output(&self) -> usize {
        self.state.borrow().outbound.len()
    }

    /// A stored setting, by wire name.
    pub fn setting(&self, key: &str) -> Option<String> {
        self.state.borrow().settings.get(key).cloned()
    }

    /// Whether the enable signal is asserted.
    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    /// Whether the reset signal is asserted.
    pub fn is_in_reset(&self) -> bool {
        self.state.borrow().in_reset
    }

    /// Whether both serial lines are driven low.
    pub fn lines_low(&self) -> bool {
        let state = self.state.borrow();
        state.rxd_low && state.txd_low
    }
}

// ============================================================================
// Transport
// ============================================================================

/// [`Transport`] half of a [`SimModule`].
#[derive(Debug, Clone)]
pub struct SimTransport {
    state: Rc<RefCell<SimState>>,
    clock: SimClock,
}

impl Transport for SimTransport {
    fn open(&mut self, baud: BaudRate) {
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        state.host_baud = Some(baud);
        state.opens.push(baud);
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        state.host_baud = None;
    }

    fn ready(&self) -> bool {
        let state = self.state.borrow();
        match state.host_baud {
            Some(baud) => !state.dead_rates.contains(&baud),
            None => false,
        }
    }

    fn available(&self) -> usize {
        self.state.borrow().readable(self.clock.now_ms())
    }

    fn read_byte(&mut self) -> Option<u8> {
        let now = self.clock.now_ms();
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        let due = matches!(state.outbound.front(), Some(&(at, _)) if at <= now);
        if due {
            state.outbound.pop_front().map(|(_, b)| b)
        } else {
            None
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        let now = self.clock.now_ms();
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        state.receive(now, &String::from_utf8_lossy(bytes));
    }

    fn flush(&mut self) {
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        state.flushes += 1;
    }
}

// ============================================================================
// Pins
// ============================================================================

/// [`ControlPins`] half of a [`SimModule`].
#[derive(Debug, Clone)]
pub struct SimPins {
    state: Rc<RefCell<SimState>>,
    clock: SimClock,
}

impl ControlPins for SimPins {
    fn assert(&mut self, signal: Signal) {
        let mut state = self.state.borrow_mut();
        match signal {
            Signal::Reset => {
                state.in_reset = true;
                state.outbound.clear();
            }
            Signal::Enable => {
                if !state.enabled {
                    let now = self.clock.now_ms();
                    let busy = state.timings.boot_busy_ms;
                    state.enabled = true;
                    state.restart(now, 0, busy);
                }
            }
            Signal::RxdLow => state.rxd_low = true,
            Signal::TxdLow => state.txd_low = true,
        }
    }

    fn deassert(&mut self, signal: Signal) {
        let mut state = self.state.borrow_mut();
        match signal {
            Signal::Reset => {
                if state.in_reset {
                    let now = self.clock.now_ms();
                    let busy = state.timings.boot_busy_ms;
                    state.in_reset = false;
                    state.restart(now, 0, busy);
                }
            }
            Signal::Enable => {
                state.enabled = false;
                state.outbound.clear();
            }
            Signal::RxdLow => state.rxd_low = false,
            Signal::TxdLow => state.txd_low = false,
        }
    }

    fn is_asserted(&self, signal: Signal) -> bool {
        let state = self.state.borrow();
        match signal {
            Signal::Reset => state.in_reset,
            Signal::Enable => state.enabled,
            Signal::RxdLow => state.rxd_low,
            Signal::TxdLow => state.txd_low,
        }
    }
}
