//! Shared helpers for the driver integration tests.

#![allow(dead_code)]

use hm11_driver::sim::{SimClock, SimModule, SimPins, SimTransport};
use hm11_driver::{Hm11, Hm11Config};
use tracing_subscriber::EnvFilter;

/// UUID used by the beacon fixtures.
pub const UUID: &str = "0005000100001000800000805F9B0131";

/// The record a module emits for the fixture beacon, without the `OK+DISC:` prefix.
pub const RECORD: &str = "4C000215:0005000100001000800000805F9B0131:00014667C3:00A0500B1710:-078";

pub type SimHm11 = Hm11<SimTransport, SimPins, SimClock>;

/// Install a subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A driver wired to `module` with default configuration.
pub fn driver(module: &SimModule) -> SimHm11 {
    driver_with(module, Hm11Config::default())
}

/// A driver wired to `module` with the given configuration.
pub fn driver_with(module: &SimModule, config: Hm11Config) -> SimHm11 {
    init_tracing();
    Hm11::new(module.transport(), module.pins(), module.clock(), config)
}

/// A driver that has already been enabled.
pub fn enabled(module: &SimModule) -> SimHm11 {
    let mut hm11 = driver(module);
    assert!(hm11.enable(), "simulated module did not answer after enable");
    hm11
}
