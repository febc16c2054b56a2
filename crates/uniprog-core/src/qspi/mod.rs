//! Bit-banged QSPI engine
//!
//! Serial NOR flashes accept commands in six line-width configurations. The
//! engine tracks the configured [`QspiMode`] and picks the number of IO
//! lines for each phase (command, address, data) from it.
//!
//! Bit mapping on the wire:
//!
//! - single: IO0 carries data out (MOSI), IO1 carries data in (MISO), MSB first
//! - dual: each clock moves a bit pair, IO1 = upper bit, IO0 = lower bit,
//!   most significant pair first
//! - quad: each clock moves a nibble, IO0..IO3 = nibble bits 0..3, high
//!   nibble first
//!
//! While only one or two lines carry data, IO2 (/WP) and IO3 (/HOLD) are
//! driven high.

mod engine;

pub use engine::QspiEngine;

use crate::error::{Error, Result};

/// IO0 (MOSI in single-wire mode)
pub const IO0: u8 = 0b0001;
/// IO1 (MISO in single-wire mode)
pub const IO1: u8 = 0b0010;
/// IO2 (/WP) and IO3 (/HOLD)
pub const IO2_IO3: u8 = 0b1100;
/// All four IO lines
pub const IO_ALL: u8 = 0b1111;

/// Enter QPI opcode (sent on one line)
pub const OP_ENTER_QPI: u8 = 0x38;
/// Exit QPI opcode (sent on four lines)
pub const OP_EXIT_QPI: u8 = 0xFF;

/// Line-width configuration, written `cmd-addr-data`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QspiMode {
    /// 1-1-1
    #[default]
    Standard = 0,
    /// 1-1-2
    DualOut = 1,
    /// 1-2-2
    DualIo = 2,
    /// 1-1-4
    QuadOut = 3,
    /// 1-4-4
    QuadIo = 4,
    /// 4-4-4
    Qpi = 5,
}

impl QspiMode {
    /// All modes in wire order
    pub const ALL: [QspiMode; 6] = [
        Self::Standard,
        Self::DualOut,
        Self::DualIo,
        Self::QuadOut,
        Self::QuadIo,
        Self::Qpi,
    ];

    /// Decode the wire value
    pub const fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Standard),
            1 => Ok(Self::DualOut),
            2 => Ok(Self::DualIo),
            3 => Ok(Self::QuadOut),
            4 => Ok(Self::QuadIo),
            5 => Ok(Self::Qpi),
            other => Err(Error::InvalidMode(other)),
        }
    }

    /// Lines used for the command phase
    pub const fn cmd_lines(&self) -> u8 {
        match self {
            Self::Standard | Self::DualOut | Self::DualIo | Self::QuadOut | Self::QuadIo => 1,
            Self::Qpi => 4,
        }
    }

    /// Lines used for the address phase
    pub const fn addr_lines(&self) -> u8 {
        match self {
            Self::Standard | Self::DualOut | Self::QuadOut => 1,
            Self::DualIo => 2,
            Self::QuadIo | Self::Qpi => 4,
        }
    }

    /// Lines used for the data phase
    pub const fn data_lines(&self) -> u8 {
        match self {
            Self::Standard => 1,
            Self::DualOut | Self::DualIo => 2,
            Self::QuadOut | Self::QuadIo | Self::Qpi => 4,
        }
    }

    /// Fast-read opcode and dummy clocks for this mode
    pub const fn fast_read(&self) -> (u8, u8) {
        match self {
            Self::Standard => (0x0B, 8),
            Self::DualOut => (0x3B, 8),
            Self::DualIo => (0xBB, 4),
            Self::QuadOut => (0x6B, 8),
            Self::QuadIo | Self::Qpi => (0xEB, 6),
        }
    }

    /// Notation used in logs and the CLI
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard (1-1-1)",
            Self::DualOut => "dual-out (1-1-2)",
            Self::DualIo => "dual-io (1-2-2)",
            Self::QuadOut => "quad-out (1-1-4)",
            Self::QuadIo => "quad-io (1-4-4)",
            Self::Qpi => "qpi (4-4-4)",
        }
    }
}

impl core::fmt::Display for QspiMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// GPIO lines of a QSPI flash interface
///
/// IO line masks use bit n for IOn.
pub trait QspiPins {
    /// Chip select (`active = true` drives CS low)
    fn set_cs(&mut self, active: bool);

    /// Clock line level
    fn set_sck(&mut self, high: bool);

    /// Make the lines in `outputs` driven outputs and the others inputs
    fn set_io_direction(&mut self, outputs: u8);

    /// Drive the output lines; bits of input lines are ignored
    fn write_io(&mut self, levels: u8);

    /// Sample all four IO lines
    fn read_io(&mut self) -> u8;
}

impl<T: QspiPins + ?Sized> QspiPins for &mut T {
    fn set_cs(&mut self, active: bool) {
        (**self).set_cs(active)
    }

    fn set_sck(&mut self, high: bool) {
        (**self).set_sck(high)
    }

    fn set_io_direction(&mut self, outputs: u8) {
        (**self).set_io_direction(outputs)
    }

    fn write_io(&mut self, levels: u8) {
        (**self).write_io(levels)
    }

    fn read_io(&mut self) -> u8 {
        (**self).read_io()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_line_widths() {
        let widths: [(u8, u8, u8); 6] = [(1, 1, 1), (1, 1, 2), (1, 2, 2), (1, 1, 4), (1, 4, 4), (4, 4, 4)];
        for (mode, expected) in QspiMode::ALL.iter().zip(widths) {
            assert_eq!((mode.cmd_lines(), mode.addr_lines(), mode.data_lines()), expected);
        }
    }

    #[test]
    fn test_mode_from_u8() {
        for mode in QspiMode::ALL {
            assert_eq!(QspiMode::from_u8(mode as u8), Ok(mode));
        }
        assert_eq!(QspiMode::from_u8(6), Err(Error::InvalidMode(6)));
    }
}
