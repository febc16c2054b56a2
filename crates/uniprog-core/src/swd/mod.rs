//! ARM Serial Wire Debug
//!
//! Every SWD transaction starts with an 8-bit request, sent LSB first:
//!
//! ```text
//! bit   0      1      2    3   4   5       6     7
//!     Start  APnDP  RnW   A2  A3  Parity  Stop  Park
//!       1                                   0     1
//! ```
//!
//! The parity bit is set when an odd number of APnDP, RnW, A2 and A3 are
//! set. The target answers with a 3-bit ACK and, for reads, a 32-bit word
//! plus its parity bit.

mod engine;

pub use engine::{SwdConfig, SwdEngine};

use crate::error::SwdFailure;

/// JTAG-to-SWD switch sequence, sent LSB first
pub const JTAG_TO_SWD: u16 = 0xE79E;

/// Clocks with SWDIO high used for a line reset (at least 50 required)
pub const LINE_RESET_CLOCKS: u8 = 64;

/// Idle clocks after the second line reset of the init sequence
pub const INIT_IDLE_CLOCKS: u8 = 8;

/// Debug port register addresses
pub mod dp {
    /// IDCODE (read)
    pub const IDCODE: u8 = 0x0;
    /// ABORT (write)
    pub const ABORT: u8 = 0x0;
    /// CTRL/STAT
    pub const CTRL_STAT: u8 = 0x4;
    /// SELECT (write)
    pub const SELECT: u8 = 0x8;
    /// RDBUFF (read)
    pub const RDBUFF: u8 = 0xC;
}

/// Which register space a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    /// Debug port
    Dp,
    /// Access port selected through DP SELECT
    Ap,
}

/// Build the 8-bit request for a register access
///
/// Only address bits 2 and 3 are encoded; the bank comes from DP SELECT.
pub const fn request(port: Port, read: bool, addr: u8) -> u8 {
    let ap = matches!(port, Port::Ap) as u8;
    let rnw = read as u8;
    let a2 = (addr >> 2) & 1;
    let a3 = (addr >> 3) & 1;
    let parity = (ap + rnw + a2 + a3) & 1;
    1 | (ap << 1) | (rnw << 2) | (a2 << 3) | (a3 << 4) | (parity << 5) | (1 << 7)
}

/// Parity bit for a 32-bit data word
pub const fn parity(value: u32) -> bool {
    value.count_ones() % 2 == 1
}

/// SELECT value addressing register bank `addr & 0xF0` of access port `ap`
pub const fn select_value(ap: u8, addr: u8) -> u32 {
    ((ap as u32) << 24) | (addr as u32 & 0xF0)
}

/// ACK pattern of an accepted request
pub const ACK_OK: u8 = 0b001;
/// ACK pattern asking the host to retry
pub const ACK_WAIT: u8 = 0b010;
/// ACK pattern reporting a sticky error
pub const ACK_FAULT: u8 = 0b100;

/// Interpret a 3-bit ACK
pub const fn check_ack(ack: u8) -> Result<(), SwdFailure> {
    match ack {
        ACK_OK => Ok(()),
        ACK_WAIT => Err(SwdFailure::Wait),
        ACK_FAULT => Err(SwdFailure::Fault),
        0b111 => Err(SwdFailure::NoResponse),
        other => Err(SwdFailure::InvalidAck(other)),
    }
}

/// SWCLK and SWDIO lines
pub trait SwdPins {
    /// Clock level
    fn set_swclk(&mut self, high: bool);

    /// Drive SWDIO (when it is an output)
    fn set_swdio(&mut self, high: bool);

    /// Sample SWDIO
    fn read_swdio(&mut self) -> bool;

    /// Probe takes over SWDIO
    fn swdio_output(&mut self);

    /// Probe releases SWDIO to the target
    fn swdio_input(&mut self);
}

impl<T: SwdPins + ?Sized> SwdPins for &mut T {
    fn set_swclk(&mut self, high: bool) {
        (**self).set_swclk(high)
    }

    fn set_swdio(&mut self, high: bool) {
        (**self).set_swdio(high)
    }

    fn read_swdio(&mut self) -> bool {
        (**self).read_swdio()
    }

    fn swdio_output(&mut self) {
        (**self).swdio_output()
    }

    fn swdio_input(&mut self) {
        (**self).swdio_input()
    }
}
