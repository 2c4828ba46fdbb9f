//! AT command exchange.
//!
//! [`CommandEngine`] owns the transport and the clock. It writes one command,
//! accumulates the reply and decides when the reply is complete:
//! - the reply contains `OK`
//! - the transport stayed quiet for one poll interval
//! - for commands containing `+`, a `+` has been seen in the reply
//!
//! The engine never raises an error for a missing reply. A timed-out exchange
//! yields [`CommandResult::timed_out`], whose text is `error`.

use hm11_metrics::{metric_defs, metrics};
use hm11_protocol::{
    contains_ok, BaudRate, Command, CommandCodec, ConfigKey, Response, ResponseBuffer,
    TIMEOUT_TEXT,
};
use tracing::{debug, trace, warn};

use crate::config::Hm11Config;
use crate::hal::{Clock, Transport};

/// Outcome of one AT exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Trimmed reply text, or `error` on timeout.
    pub text: String,
    /// Whether a complete reply arrived before the timeout.
    pub succeeded: bool,
}

impl CommandResult {
    /// Result of an exchange that produced a complete reply.
    pub fn replied(text: impl Into<String>) -> Self {
        CommandResult {
            text: text.into(),
            succeeded: true,
        }
    }

    /// Result of an exchange that timed out.
    pub fn timed_out() -> Self {
        CommandResult {
            text: TIMEOUT_TEXT.to_string(),
            succeeded: false,
        }
    }

    /// Whether the reply text contains `OK` anywhere.
    pub fn contains_ok(&self) -> bool {
        self.succeeded && contains_ok(&self.text)
    }

    /// Whether the reply text begins with `OK`.
    pub fn starts_with_ok(&self) -> bool {
        self.succeeded && self.text.starts_with(hm11_protocol::OK)
    }

    /// Classify the reply.
    pub fn response(&self) -> Response {
        if self.succeeded {
            Response::parse(&self.text)
        } else {
            Response::TimedOut
        }
    }
}

/// Request/response engine over a [`Transport`].
#[derive(Debug)]
pub struct CommandEngine<T, C> {
    transport: T,
    clock: C,
    command_timeout_ms: u64,
    poll_interval_ms: u64,
    ready_timeout_ms: u64,
    /// Rate the host side is currently open at.
    line_baud: Option<BaudRate>,
    commands_sent: u64,
    commands_timed_out: u64,
}

impl<T: Transport, C: Clock> CommandEngine<T, C> {
    /// Create an engine. The transport is not opened.
    pub fn new(transport: T, clock: C, config: &Hm11Config) -> Self {
        CommandEngine {
            transport,
            clock,
            command_timeout_ms: config.command_timeout_ms,
            poll_interval_ms: config.poll_interval_ms.max(1),
            ready_timeout_ms: config.ready_timeout_ms,
            line_baud: None,
            commands_sent: 0,
            commands_timed_out: 0,
        }
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// Send a raw command string and wait up to `timeout_ms` for the reply.
    pub fn send(&mut self, command: &str, timeout_ms: u64) -> CommandResult {
        let expects_structured = command.contains('+');
        let key = metric_key(command);

        self.transport.write(&CommandCodec::encode_command(command));
        self.commands_sent += 1;
        metrics::counter!(metric_defs::COMMAND_SENT.name, "key" => key).increment(1);
        trace!("CommandEngine: sent {:?}", command);

        let started = self.clock.now_ms();
        let mut reply = ResponseBuffer::new();

        let result = loop {
            let mut received = false;
            while self.transport.available() > 0 && self.elapsed_since(started) < timeout_ms {
                match self.transport.read_byte() {
                    Some(byte) => {
                        reply.push(byte);
                        received = true;
                    }
                    None => break,
                }
            }

            if !received && reply.is_complete(expects_structured) {
                let elapsed = self.elapsed_since(started);
                metrics::histogram!(metric_defs::COMMAND_LATENCY.name).record(elapsed as f64);
                break CommandResult::replied(reply.into_trimmed());
            }

            if self.elapsed_since(started) >= timeout_ms {
                self.commands_timed_out += 1;
                metrics::counter!(metric_defs::COMMAND_TIMEOUTS.name, "key" => key).increment(1);
                if !reply.is_empty() {
                    debug!(
                        "CommandEngine: {:?} timed out with partial reply {:?}",
                        command,
                        reply.into_trimmed()
                    );
                }
                break CommandResult::timed_out();
            }

            self.clock.sleep_ms(self.poll_interval_ms);
        };

        self.transport.flush();
        trace!("CommandEngine: {:?} -> {:?}", command, result.text);
        result
    }

    /// Send a command and stop reading as soon as the reply ends with `marker`.
    ///
    /// Anything the module sends after the marker stays on the transport for
    /// the caller. A streaming reply that never produces the marker is cut off
    /// at `timeout_ms`.
    pub fn send_until(&mut self, command: &str, marker: &str, timeout_ms: u64) -> CommandResult {
        let key = metric_key(command);

        self.transport.write(&CommandCodec::encode_command(command));
        self.commands_sent += 1;
        metrics::counter!(metric_defs::COMMAND_SENT.name, "key" => key).increment(1);
        trace!("CommandEngine: sent {:?}, waiting for {:?}", command, marker);

        let started = self.clock.now_ms();
        let mut reply = ResponseBuffer::new();

        let result = 'exchange: loop {
            while self.transport.available() > 0 && self.elapsed_since(started) < timeout_ms {
                let Some(byte) = self.transport.read_byte() else {
                    break;
                };
                reply.push(byte);
                if reply.ends_with(marker.as_bytes()) {
                    let elapsed = self.elapsed_since(started);
                    metrics::histogram!(metric_defs::COMMAND_LATENCY.name).record(elapsed as f64);
                    break 'exchange CommandResult::replied(reply.into_trimmed());
                }
            }

            if self.elapsed_since(started) >= timeout_ms {
                self.commands_timed_out += 1;
                metrics::counter!(metric_defs::COMMAND_TIMEOUTS.name, "key" => key).increment(1);
                debug!(
                    "CommandEngine: no {:?} in reply to {:?} after {} bytes",
                    marker,
                    command,
                    reply.len()
                );
                break CommandResult::timed_out();
            }

            self.clock.sleep_ms(self.poll_interval_ms);
        };

        self.transport.flush();
        trace!("CommandEngine: {:?} -> {:?}", command, result.text);
        result
    }

    /// Send a command with the configured timeout.
    pub fn execute(&mut self, command: &Command) -> CommandResult {
        self.send(&command.to_command_string(), self.command_timeout_ms)
    }

    /// Send a configuration command; true if the reply contains `OK`.
    pub fn set_conf(&mut self, command: &Command) -> bool {
        let result = self.execute(command);
        let acknowledged = result.contains_ok();
        if !acknowledged {
            debug!(
                "CommandEngine: {:?} not acknowledged ({:?})",
                command.to_command_string(),
                result.text
            );
        }
        acknowledged
    }

    /// Query a configuration value (`AT+<NAME>?`).
    pub fn get_conf(&mut self, key: ConfigKey) -> CommandResult {
        self.execute(&Command::Query { key })
    }

    /// Send the bare `AT` liveness probe.
    pub fn probe(&mut self) -> CommandResult {
        self.execute(&Command::Probe)
    }

    /// Probe repeatedly until the answer's `OK`-ness equals `want_ok`.
    ///
    /// Gives up once `window_ms` has elapsed since `started`. Returns whether
    /// the wanted state was reached.
    pub fn wait_for_probe(&mut self, want_ok: bool, started: u64, window_ms: u64) -> bool {
        loop {
            if self.probe().starts_with_ok() == want_ok {
                return true;
            }
            if self.elapsed_since(started) >= window_ms {
                return false;
            }
        }
    }

    // ========================================================================
    // Line control
    // ========================================================================

    /// Open the host side at `baud` and wait for it to become ready.
    pub fn open(&mut self, baud: BaudRate) -> bool {
        debug!("CommandEngine: opening line at {} baud", baud);
        self.transport.open(baud);
        self.line_baud = Some(baud);

        let started = self.clock.now_ms();
        while !self.transport.ready() {
            if self.elapsed_since(started) >= self.ready_timeout_ms {
                warn!("CommandEngine: line not ready after {} ms", self.ready_timeout_ms);
                return false;
            }
            self.clock.sleep_ms(self.poll_interval_ms);
        }
        true
    }

    /// Close the host side.
    pub fn close(&mut self) {
        self.transport.close();
        self.line_baud = None;
    }

    /// Discard every byte currently waiting on the transport.
    pub fn drain_input(&mut self) -> usize {
        let mut drained = 0;
        while self.transport.available() > 0 {
            if self.transport.read_byte().is_none() {
                break;
            }
            drained += 1;
        }
        if drained > 0 {
            trace!("CommandEngine: drained {} bytes", drained);
        }
        drained
    }

    /// Flush pending output.
    pub fn flush(&mut self) {
        self.transport.flush();
    }

    /// Number of received bytes waiting.
    pub fn available(&self) -> usize {
        self.transport.available()
    }

    /// Read one received byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        self.transport.read_byte()
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Current clock reading.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Milliseconds elapsed since `started`.
    pub fn elapsed_since(&self, started: u64) -> u64 {
        self.clock.now_ms().saturating_sub(started)
    }

    /// Block for `ms` milliseconds.
    pub fn sleep_ms(&self, ms: u64) {
        self.clock.sleep_ms(ms);
    }

    /// Sleep for one poll interval.
    pub fn idle(&self) {
        self.clock.sleep_ms(self.poll_interval_ms);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Rate the host side is open at, if open.
    pub fn line_baud(&self) -> Option<BaudRate> {
        self.line_baud
    }

    /// Default per-command timeout.
    pub fn command_timeout_ms(&self) -> u64 {
        self.command_timeout_ms
    }

    /// Total commands written.
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    /// Total exchanges that timed out.
    pub fn commands_timed_out(&self) -> u64 {
        self.commands_timed_out
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Take the transport and clock back.
    pub fn into_parts(self) -> (T, C) {
        (self.transport, self.clock)
    }
}

/// Metric label for a command: its configuration key, or `AT`/`raw`.
fn metric_key(command: &str) -> &'static str {
    match command.strip_prefix("AT+") {
        Some(payload) => ConfigKey::split_payload(payload)
            .map(|(key, _)| key.as_str())
            .unwrap_or("raw"),
        None if command == "AT" => "AT",
        None => "raw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DiscoveryScript, SimModule, SimTimings};
    use hm11_protocol::DISCOVERY_STARTED;

    fn engine(module: &SimModule) -> CommandEngine<crate::sim::SimTransport, crate::sim::SimClock> {
        let mut engine = CommandEngine::new(module.transport(), module.clock(), &Hm11Config::default());
        module.power_on();
        engine.open(BaudRate::B9600);
        engine
    }

    #[test]
    fn test_probe_ok() {
        let module = SimModule::new();
        let mut engine = engine(&module);

        let result = engine.probe();
        assert_eq!(result, CommandResult::replied("OK"));
        assert!(result.starts_with_ok());
        assert!(module.clock().now_ms() < 100);
    }

    #[test]
    fn test_timeout_bounds() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.set_silent(true);

        let started = module.clock().now_ms();
        let result = engine.send("AT", 50);
        let elapsed = module.clock().now_ms() - started;

        assert_eq!(result, CommandResult::timed_out());
        assert_eq!(result.text, "error");
        assert!(elapsed >= 50, "returned after {} ms", elapsed);
        assert!(elapsed <= 51, "returned after {} ms", elapsed);
        assert_eq!(engine.commands_timed_out(), 1);
    }

    #[test]
    fn test_structured_reply_waits_for_plus() {
        let module = SimModule::new();
        let mut engine = engine(&module);

        let result = engine.get_conf(ConfigKey::Baud);
        assert!(result.succeeded);
        assert_eq!(result.text, "OK+Get:0");
        assert_eq!(result.response().index().unwrap(), 0);
    }

    #[test]
    fn test_bare_ok_does_not_complete_structured_reply() {
        let module = SimModule::new().with_timings(SimTimings {
            structured_gap_ms: 20,
            ..SimTimings::default()
        });
        let mut engine = engine(&module);

        let started = module.clock().now_ms();
        let result = engine.get_conf(ConfigKey::Baud);
        assert_eq!(result, CommandResult::replied("OK+Get:0"));
        assert!(module.clock().now_ms() - started >= 20);

        // A plain probe is not split and completes on the bare OK.
        assert_eq!(engine.probe(), CommandResult::replied("OK"));
    }

    #[test]
    fn test_bare_ok_then_silence_times_out_structured_reply() {
        let module = SimModule::new().with_timings(SimTimings {
            structured_gap_ms: 500,
            ..SimTimings::default()
        });
        let mut engine = engine(&module);

        let result = engine.send("AT+BAUD?", 100);
        assert_eq!(result, CommandResult::timed_out());
    }

    #[test]
    fn test_send_until_leaves_stream_on_transport() {
        let module = SimModule::new()
            .with_discovery(DiscoveryScript::new().then(0, vec![b'x'; 10_000]));
        let mut engine = engine(&module);

        let ack = engine.send_until("AT+DISI?", DISCOVERY_STARTED, 100);
        assert_eq!(ack, CommandResult::replied("OK+DISIS"));
        assert_eq!(module.pending_output(), 10_000);
        assert_eq!(module.flush_count(), 1);
    }

    #[test]
    fn test_send_until_times_out_without_marker() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.ignore_key("DISI");

        let started = module.clock().now_ms();
        let ack = engine.send_until("AT+DISI?", DISCOVERY_STARTED, 100);
        assert_eq!(ack, CommandResult::timed_out());
        assert_eq!(module.clock().now_ms() - started, 100);
        assert_eq!(engine.commands_timed_out(), 1);
    }

    #[test]
    fn test_flush_after_every_exchange() {
        let module = SimModule::new();
        let mut engine = engine(&module);
        module.set_silent(true);

        engine.probe();
        module.set_silent(false);
        engine.probe();
        assert_eq!(module.flush_count(), 2);
    }

    #[test]
    fn test_set_conf_requires_ok() {
        let module = SimModule::new();
        let mut engine = engine(&module);

        assert!(engine.set_conf(&Command::SetName {
            name: "beacon".to_string()
        }));
        module.ignore_key("NAME");
        assert!(!engine.set_conf(&Command::SetName {
            name: "beacon".to_string()
        }));
    }

    #[test]
    fn test_metric_key() {
        assert_eq!(metric_key("AT"), "AT");
        assert_eq!(metric_key("AT+BAUD4"), "BAUD");
        assert_eq!(metric_key("AT+RENEW"), "RENEW");
        assert_eq!(metric_key("AT+ZZZZ"), "raw");
        assert_eq!(metric_key("hello"), "raw");
    }
}
