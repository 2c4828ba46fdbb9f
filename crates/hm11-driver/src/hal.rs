//! Hardware seams.
//!
//! The driver never touches a serial port or GPIO register directly. A
//! deployment supplies:
//! - a [`Transport`] for the UART byte stream
//! - [`ControlPins`] for the enable, reset and line-level signals
//! - a [`Clock`] for timeouts and settle windows

use std::time::{Duration, Instant};

use hm11_protocol::BaudRate;

/// UART byte stream to the module.
pub trait Transport {
    /// (Re)open the line at the given rate.
    fn open(&mut self, baud: BaudRate);

    /// Close the line.
    fn close(&mut self);

    /// Whether the line is open and usable.
    fn ready(&self) -> bool;

    /// Number of received bytes waiting to be read.
    fn available(&self) -> usize;

    /// Read one received byte, if any.
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue bytes for transmission.
    fn write(&mut self, bytes: &[u8]);

    /// Block until queued output has been transmitted.
    fn flush(&mut self);
}

/// Control signals wired to the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Asserted: module held in reset.
    Reset,
    /// Asserted: module enabled.
    Enable,
    /// Asserted: host RXD line driven low.
    RxdLow,
    /// Asserted: host TXD line driven low.
    TxdLow,
}

/// Capability to drive the module's control signals.
///
/// Polarity is the implementation's concern; `assert` always means the
/// condition named by the [`Signal`] variant becomes true.
pub trait ControlPins {
    /// Make the signal's condition true.
    fn assert(&mut self, signal: Signal);

    /// Make the signal's condition false.
    fn deassert(&mut self, signal: Signal);

    /// Current state of the signal.
    fn is_asserted(&self, signal: Signal) -> bool;
}

/// Monotonic millisecond clock with a blocking sleep.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;

    /// Block for the given number of milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// [`Clock`] backed by the operating system.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        clock.sleep_ms(2);
        let b = clock.now_ms();
        assert!(b >= a + 2);
    }
}
