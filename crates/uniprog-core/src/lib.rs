//! uniprog-core - Protocol engine and bus engines for the uniprog probe
//!
//! This crate contains everything the probe firmware does that does not
//! touch a specific microcontroller: the framed wire protocol, the command
//! registry that routes packets to bus drivers, the bit-banged QSPI and SWD
//! engines, and the command handlers for every bus. Hardware is reached
//! only through `embedded-hal` traits and the small pin traits defined in
//! [`qspi`] and [`swd`], so the whole stack runs unchanged on the host
//! against the simulated devices in `sim`.
//!
//! # Features
//!
//! - `std` - Implement `std::error::Error` for the error types
//! - `defmt` - Derive `defmt::Format` on wire-facing types
//! - `sim` - Simulated flash, SWD target and bus peripherals
//!
//! # Example
//!
//! ```ignore
//! use uniprog_core::drivers::SystemDriver;
//! use uniprog_core::protocol::{ProtocolEngine, cmd};
//!
//! let mut system = SystemDriver::new(board);
//! let mut engine = ProtocolEngine::new(());
//! engine.register(cmd::SYSTEM_RANGE.0, cmd::SYSTEM_RANGE.1, &mut system)?;
//! engine.initialize_all()?;
//! loop {
//!     engine.poll(&mut transport)?;
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod driver;
pub mod drivers;
pub mod error;
pub mod hal;
pub mod protocol;
pub mod qspi;
pub mod registry;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod swd;

pub use driver::{DeferredAction, Driver, Request, Response};
pub use error::{CommandError, Error, ErrorCode, Result};
