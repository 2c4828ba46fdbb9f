//! HM-11 AT-Command Protocol
//!
//! This crate provides types and utilities for talking to HM-11 class Bluetooth
//! Low-Energy modules over their UART AT-command interface. It contains no I/O;
//! the driver crate owns the serial line and uses these types to build requests
//! and to make sense of what comes back.
//!
//! # Protocol Overview
//!
//! The protocol is plain ASCII and case-sensitive:
//!
//! - **Probe** (host → module): `AT`, answered with `OK`
//! - **Set** (host → module): `AT+<NAME><VALUE>`, answered with `OK+Set:<VALUE>`
//! - **Query** (host → module): `AT+<NAME>?`, answered with `OK+Get:<VALUE>`
//! - **Discovery**: `AT+DISI?` is acknowledged with `OK+DISIS`, followed by one
//!   `OK+DISC:` record per advertisement seen and a closing `OK+DISCE`
//!
//! Commands carry no terminator. The module never frames its replies, so the
//! host decides when a reply is complete (see [`ResponseBuffer`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use hm11_protocol::{BaudRate, Command, Response};
//!
//! let cmd = Command::SetBaud { baud: BaudRate::B38400 };
//! assert_eq!(cmd.encode(), b"AT+BAUD2");
//!
//! let response = Response::parse("OK+Get:2");
//! ```

mod codec;
mod commands;
mod discovery;
mod error;
pub mod hex;
mod responses;

pub use codec::*;
pub use commands::*;
pub use discovery::*;
pub use error::*;
pub use responses::*;
