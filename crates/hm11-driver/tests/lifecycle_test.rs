//! Integration tests for bring-up, baud negotiation and timing configuration.

mod common;

use common::{driver, driver_with};
use hm11_driver::sim::{SimModule, SimTimings};
use hm11_driver::{Clock, Hm11Config, Hm11Error, LifecycleState, NegotiationError};
use hm11_protocol::BaudRate;

#[test]
fn test_discovery_finds_38400_after_lower_rates_fail() {
    let module = SimModule::new().with_baud(BaudRate::B38400);
    let mut hm11 = driver(&module);
    hm11.enable();
    let opens_before = module.opens().len();

    assert_eq!(hm11.discover_current_baud(), Some(BaudRate::B38400));
    assert_eq!(
        module.opens()[opens_before..],
        [BaudRate::B9600, BaudRate::B19200, BaudRate::B38400]
    );
}

#[test]
fn test_begin_from_unknown_rate() {
    let module = SimModule::new().with_baud(BaudRate::B57600);
    let mut hm11 = driver(&module);

    assert!(hm11.begin(BaudRate::B19200));
    assert_eq!(hm11.state(), LifecycleState::Ready);
    assert_eq!(module.module_baud(), BaudRate::B19200);
    assert_eq!(module.host_baud(), Some(BaudRate::B19200));
    assert!(module.writes().contains(&"AT+RENEW".to_string()));
}

#[test]
fn test_begin_fails_when_module_never_answers() {
    let module = SimModule::new();
    let mut hm11 = driver(&module);
    module.set_silent(true);

    let err = hm11.try_begin(BaudRate::B38400).unwrap_err();
    assert!(matches!(
        err,
        Hm11Error::Negotiation(NegotiationError::NoResponse)
    ));
    assert_ne!(hm11.state(), LifecycleState::Ready);
    assert_eq!(hm11.configured_baud(), None);
}

#[test]
fn test_set_baud_is_bounded_in_time() {
    let module = SimModule::new();
    let mut hm11 = driver(&module);
    hm11.enable();
    module.ignore_key("BAUD");

    let started = module.clock().now_ms();
    assert!(!hm11.set_baud(BaudRate::B115200));
    // One successful probe plus one unanswered command.
    assert!(module.clock().now_ms() - started < 1000);
}

#[test]
fn test_restart_round_trip() {
    let module = SimModule::new();
    let mut hm11 = driver(&module);

    assert!(hm11.begin(BaudRate::B38400));
    hm11.disable();
    assert!(!hm11.is_enabled());
    assert!(module.lines_low());

    assert!(hm11.enable());
    assert_eq!(module.host_baud(), Some(BaudRate::B38400));
    assert!(hm11.begin(BaudRate::B38400));
    assert_eq!(hm11.state(), LifecycleState::Ready);
}

#[test]
fn test_configured_timeout_applies() {
    let config = Hm11Config::from_yaml_str("command_timeout_ms: 50\n").unwrap();
    let module = SimModule::new();
    let mut hm11 = driver_with(&module, config);
    hm11.enable();
    module.set_silent(true);

    let started = module.clock().now_ms();
    let result = hm11.engine_mut().probe();
    let elapsed = module.clock().now_ms() - started;

    assert!(!result.succeeded);
    assert_eq!(result.text, "error");
    assert!((50..=51).contains(&elapsed), "elapsed {} ms", elapsed);
}

#[test]
fn test_engine_send_ok() {
    let module = SimModule::new();
    let mut hm11 = driver(&module);
    hm11.enable();

    let result = hm11.engine_mut().send("AT", 100);
    assert!(result.succeeded);
    assert_eq!(result.text, "OK");
}

#[test]
fn test_initial_baud_from_config() {
    let config = Hm11Config::from_yaml_str("initial_baud: 57600").unwrap();
    let module = SimModule::new().with_baud(BaudRate::B57600);
    let mut hm11 = driver_with(&module, config);

    assert!(hm11.enable());
    assert_eq!(module.opens(), vec![BaudRate::B57600]);
}

#[test]
fn test_slow_module_within_settle_window() {
    let module = SimModule::new().with_timings(SimTimings {
        boot_busy_ms: 350,
        ..SimTimings::default()
    });
    let mut hm11 = driver(&module);

    assert!(hm11.enable());
}

#[test]
fn test_module_too_slow_for_settle_window() {
    let module = SimModule::new().with_timings(SimTimings {
        boot_busy_ms: 900,
        ..SimTimings::default()
    });
    let mut hm11 = driver(&module);

    assert!(!hm11.enable());
}
