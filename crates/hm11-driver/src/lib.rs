//! HM-11 BLE Module Driver
//!
//! Drives an HM-11 class Bluetooth Low-Energy module attached over a UART:
//!
//! - **Command engine**: one AT exchange at a time, bounded by a timeout
//! - **Baud negotiation**: find the rate the module listens at and move both
//!   ends to a new one
//! - **Lifecycle**: enable, disable, hardware reset, software reset, factory renew
//! - **iBeacon**: advertise as a beacon, or scan for one and extract its record
//!
//! The serial port, the control pins and the clock are supplied by the caller
//! through the traits in [`hal`]. The [`sim`] module provides in-memory
//! implementations backed by a simulated module.
//!
//! # Example
//!
//! ```rust,ignore
//! use hm11_driver::{BeaconDescriptor, Hm11, Hm11Config, ScanRequest};
//! use hm11_protocol::BaudRate;
//!
//! let mut hm11 = Hm11::new(serial, pins, SystemClock::new(), Hm11Config::default());
//! if hm11.begin(BaudRate::B38400) {
//!     hm11.setup_as_detector()?;
//!     let found = hm11.scan(&ScanRequest::for_uuid("0005000100001000800000805F9B0131"))?;
//! }
//! ```

mod baud;
mod beacon;
mod config;
mod engine;
mod error;
pub mod hal;
mod lifecycle;
mod scanner;
pub mod sim;

pub use baud::BaudNegotiator;
pub use beacon::{BeaconDescriptor, SetupReport, MAX_BEACON_ID, MAX_NAME_LEN};
pub use config::{
    Hm11Config, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_DETECTION_MS, DEFAULT_HW_RESET_SETTLE_MS,
    DEFAULT_MEMORY_BUDGET, DEFAULT_SW_RESET_SETTLE_MS,
};
pub use engine::{CommandEngine, CommandResult};
pub use error::{BeaconValidationError, Hm11Error, Hm11Result, NegotiationError};
pub use hal::{Clock, ControlPins, Signal, SystemClock, Transport};
pub use lifecycle::{Hm11, LifecycleState, SettleOutcome};
pub use scanner::{ScanReport, ScanRequest, ScanStop};
