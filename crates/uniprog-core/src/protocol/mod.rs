//! Wire protocol: framing, integrity check and dispatch
//!
//! Every packet, in both directions, is laid out as:
//!
//! ```text
//! +------+-----+-----+-------+---------+-----------+----------+
//! | 0xA5 | seq | cmd | flags | len u16 | payload   | crc32    |
//! +------+-----+-----+-------+---------+-----------+----------+
//!   1      1     1     1       2 (LE)    0..=4096    4 (LE)
//! ```
//!
//! The CRC covers everything before it. The sequence number is echoed
//! from request to response and carries no other meaning.

mod crc;
mod engine;
mod frame;

pub use crc::{crc32, Crc32};
pub use engine::ProtocolEngine;
pub use frame::{encode_frame, write_frame, Event, FrameParser, ParseState};

use bitflags::bitflags;

/// Start-of-frame sentinel
pub const SOF: u8 = 0xA5;
/// Header length including the sentinel
pub const HEADER_LEN: usize = 6;
/// Trailing CRC length
pub const CRC_LEN: usize = 4;
/// Largest payload either side may send
pub const MAX_PAYLOAD: usize = 4096;
/// Largest complete frame
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD + CRC_LEN;
/// Number of driver registrations the engine can hold
pub const MAX_DRIVERS: usize = 10;

bitflags! {
    /// Packet flags (header byte 3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        /// Packet is a response to a request
        const RESPONSE = 0x01;
        /// Response carries an error payload
        const ERROR = 0x02;
        /// Unsolicited packet from the device
        const ASYNC = 0x04;
    }
}

/// Command identifiers and the ranges each driver owns
pub mod cmd {
    /// System commands
    pub const SYSTEM_RANGE: (u8, u8) = (0x00, 0x0F);
    /// Reply `CA FE`
    pub const PING: u8 = 0x01;
    /// Capability JSON string
    pub const GET_CAPS: u8 = 0x02;
    /// Status, uptime and free RAM
    pub const GET_STATUS: u8 = 0x03;
    /// Reset the probe after replying
    pub const RESET: u8 = 0x04;
    /// Read back the flash interface line levels
    pub const GPIO_TEST: u8 = 0x05;

    /// I2C commands
    pub const I2C_RANGE: (u8, u8) = (0x10, 0x1F);
    /// Probe all 7-bit addresses
    pub const I2C_SCAN: u8 = 0x10;
    /// Read from a device
    pub const I2C_READ: u8 = 0x11;
    /// Write to a device
    pub const I2C_WRITE: u8 = 0x12;

    /// Standard SPI commands
    pub const SPI_RANGE: (u8, u8) = (0x20, 0x24);
    /// Read JEDEC ID
    pub const SPI_SCAN: u8 = 0x20;
    /// Set SPI mode and clock
    pub const SPI_CONFIG: u8 = 0x21;
    /// Full-duplex transfer
    pub const SPI_XFER: u8 = 0x22;

    /// Extended (bit-banged) QSPI commands
    pub const QSPI_RANGE: (u8, u8) = (0x25, 0x2F);
    /// Select one of the six line-width modes
    pub const QSPI_SET_MODE: u8 = 0x25;
    /// Command + address + dummy + read
    pub const QSPI_READ: u8 = 0x26;
    /// Command + address + write
    pub const QSPI_WRITE: u8 = 0x27;
    /// Mode-appropriate fast read of whole pages
    pub const QSPI_FAST_READ: u8 = 0x28;
    /// Raw command with optional data phase
    pub const QSPI_CMD: u8 = 0x29;
    /// Switch the flash and the engine into QPI
    pub const QSPI_ENTER_QPI: u8 = 0x2A;
    /// Leave QPI
    pub const QSPI_EXIT_QPI: u8 = 0x2B;
    /// Change the bit-bang clock
    pub const QSPI_SET_CLOCK: u8 = 0x2C;

    /// AVR in-system programming commands
    pub const ISP_RANGE: (u8, u8) = (0x30, 0x3F);
    /// Hold reset and send Programming Enable
    pub const ISP_ENTER: u8 = 0x30;
    /// Four-byte ISP instruction
    pub const ISP_XFER: u8 = 0x31;
    /// Release reset
    pub const ISP_EXIT: u8 = 0x32;

    /// ARM SWD commands
    pub const SWD_RANGE: (u8, u8) = (0x40, 0x4F);
    /// Line reset, switch to SWD and read IDCODE
    pub const SWD_INIT: u8 = 0x40;
    /// Read an access port register
    pub const SWD_READ: u8 = 0x41;
    /// Write an access port register
    pub const SWD_WRITE: u8 = 0x42;
    /// Read a debug port register
    pub const SWD_READ_DP: u8 = 0x43;
    /// Write a debug port register
    pub const SWD_WRITE_DP: u8 = 0x44;

    /// Bootloader entry
    pub const BOOTLOADER_RANGE: (u8, u8) = (0x50, 0x50);
    /// Reboot into the ROM bootloader after replying
    pub const BOOTLOADER: u8 = 0x50;
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Echoed sequence number
    pub sequence: u8,
    /// Command identifier
    pub command: u8,
    /// Flag bits
    pub flags: Flags,
    /// Payload length
    pub length: u16,
}

impl Header {
    /// Serialize, including the sentinel
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let len = self.length.to_le_bytes();
        [
            SOF,
            self.sequence,
            self.command,
            self.flags.bits(),
            len[0],
            len[1],
        ]
    }

    /// Parse a header whose first byte is the sentinel
    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            sequence: bytes[1],
            command: bytes[2],
            flags: Flags::from_bits_retain(bytes[3]),
            length: u16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }
}

/// A received packet, borrowing its payload from the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Echoed sequence number
    pub sequence: u8,
    /// Command identifier
    pub command: u8,
    /// Flag bits
    pub flags: Flags,
    /// Payload bytes
    pub payload: &'a [u8],
}
