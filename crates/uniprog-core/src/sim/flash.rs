//! Bit-level serial NOR flash on [`QspiPins`]
//!
//! The model samples host-driven lines on the rising clock edge and
//! shifts its own output on the falling edge, like a real part. Program
//! and erase take effect when chip select is released.

use std::vec;
use std::vec::Vec;

use crate::qspi::{QspiPins, IO1, IO_ALL};

/// Opcodes understood by [`SimFlash`]
pub mod opcodes {
    /// Read JEDEC ID
    pub const RDID: u8 = 0x9F;
    /// Read status register 1
    pub const RDSR: u8 = 0x05;
    /// Write enable
    pub const WREN: u8 = 0x06;
    /// Write disable
    pub const WRDI: u8 = 0x04;
    /// Read (no dummy)
    pub const READ: u8 = 0x03;
    /// Fast read 1-1-1
    pub const FAST_READ: u8 = 0x0B;
    /// Fast read 1-1-2
    pub const DOR: u8 = 0x3B;
    /// Fast read 1-2-2
    pub const DIOR: u8 = 0xBB;
    /// Fast read 1-1-4
    pub const QOR: u8 = 0x6B;
    /// Fast read 1-4-4 (4-4-4 in QPI)
    pub const QIOR: u8 = 0xEB;
    /// Page program 1-1-1
    pub const PP: u8 = 0x02;
    /// Page program 1-1-4
    pub const QPP: u8 = 0x32;
    /// 4 KiB sector erase
    pub const SE: u8 = 0x20;
    /// 64 KiB block erase
    pub const BE: u8 = 0xD8;
    /// Chip erase
    pub const CE: u8 = 0xC7;
    /// Chip erase (alternate)
    pub const CE_60: u8 = 0x60;
    /// Enter QPI
    pub const EQPI: u8 = 0x38;
    /// Exit QPI (only valid in QPI)
    pub const RSTQPI: u8 = 0xFF;
}

/// Status register bit: program or erase in progress
pub const STATUS_BUSY: u8 = 0x01;
/// Status register bit: write enable latch
pub const STATUS_WEL: u8 = 0x02;

/// Geometry and identity of the simulated part
#[derive(Debug, Clone)]
pub struct SimFlashConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// Flash size in bytes
    pub size: usize,
    /// Page size for programming
    pub page_size: usize,
    /// Sector size for the smallest erase
    pub sector_size: usize,
}

impl Default for SimFlashConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: 0x4018,     // W25Q128
            size: 64 * 1024,
            page_size: 256,
            sector_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Command,
    Address { width: u8 },
    Dummy { left: u8 },
    DataOut { width: u8 },
    DataIn { width: u8 },
    Ignore,
}

/// Simulated serial NOR flash
pub struct SimFlash {
    config: SimFlashConfig,
    data: Vec<u8>,

    // host side of the pins
    cs_active: bool,
    sck: bool,
    host_dir: u8,
    host_levels: u8,

    // flash side
    drive: u8,
    drive_levels: u8,
    qpi: bool,
    write_enabled: bool,
    busy_polls: u32,
    busy_left: u32,

    // current transaction
    phase: Phase,
    shift: u32,
    bits: u8,
    opcode: u8,
    address: u32,
    id_index: usize,
    out_byte: u8,
    out_bits: u8,
    program: Vec<u8>,
    opcodes_seen: Vec<u8>,
}

impl SimFlash {
    /// Create an erased flash
    pub fn new(config: SimFlashConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            cs_active: false,
            sck: false,
            host_dir: 0,
            host_levels: 0,
            drive: 0,
            drive_levels: 0,
            qpi: false,
            write_enabled: false,
            busy_polls: 0,
            busy_left: 0,
            phase: Phase::Ignore,
            shift: 0,
            bits: 0,
            opcode: 0,
            address: 0,
            id_index: 0,
            out_byte: 0,
            out_bits: 0,
            program: Vec::new(),
            opcodes_seen: Vec::new(),
        }
    }

    /// Create a flash pre-filled with `initial_data` from address 0
    pub fn with_data(config: SimFlashConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = initial_data.len().min(flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Report BUSY for this many status reads after every program or erase
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Flash contents, mutably
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Geometry and identity
    pub fn config(&self) -> &SimFlashConfig {
        &self.config
    }

    /// Whether the part is in QPI mode
    pub fn is_qpi(&self) -> bool {
        self.qpi
    }

    /// Whether the write enable latch is set
    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// Every opcode received so far, in order
    pub fn opcodes_seen(&self) -> &[u8] {
        &self.opcodes_seen
    }

    fn status(&self) -> u8 {
        let mut status = 0;
        if self.write_enabled {
            status |= STATUS_WEL;
        }
        if self.busy_left > 0 {
            status |= STATUS_BUSY;
        }
        status
    }

    fn wide(&self, width: u8) -> u8 {
        if self.qpi {
            4
        } else {
            width
        }
    }

    fn begin(&mut self) {
        self.phase = Phase::Command;
        self.shift = 0;
        self.bits = 0;
        self.address = 0;
        self.id_index = 0;
        self.out_bits = 0;
        self.drive = 0;
        self.program.clear();
    }

    fn end(&mut self) {
        self.drive = 0;
        if self.phase == Phase::Command {
            // no complete opcode
            self.phase = Phase::Ignore;
            return;
        }
        let addressed = !matches!(self.phase, Phase::Address { .. });
        match self.opcode {
            opcodes::WREN => self.write_enabled = true,
            opcodes::WRDI => self.write_enabled = false,
            opcodes::EQPI if !self.qpi => self.qpi = true,
            opcodes::RSTQPI if self.qpi => self.qpi = false,
            opcodes::PP | opcodes::QPP if addressed => self.commit_program(),
            opcodes::SE if addressed => self.erase(self.config.sector_size),
            opcodes::BE if addressed => self.erase(64 * 1024),
            opcodes::CE | opcodes::CE_60 => self.erase(self.data.len()),
            opcodes::RDSR => self.busy_left = self.busy_left.saturating_sub(1),
            _ => {}
        }
        self.phase = Phase::Ignore;
    }

    fn commit_program(&mut self) {
        if !self.write_enabled || self.program.is_empty() {
            return;
        }
        let page = self.config.page_size;
        let base = self.address as usize & !(page - 1);
        let start = self.address as usize % page;
        for (i, &byte) in self.program.iter().enumerate() {
            let addr = (base + (start + i) % page) % self.data.len();
            // programming can only clear bits
            self.data[addr] &= byte;
        }
        self.finish_write();
    }

    fn erase(&mut self, size: usize) {
        if !self.write_enabled {
            return;
        }
        let size = size.min(self.data.len());
        let start = (self.address as usize & !(size - 1)) % self.data.len();
        self.data[start..start + size].fill(0xFF);
        self.finish_write();
    }

    fn finish_write(&mut self) {
        self.write_enabled = false;
        self.busy_left = self.busy_polls;
    }

    /// Decide what follows the opcode
    fn after_opcode(&mut self) {
        self.opcodes_seen.push(self.opcode);
        self.phase = match self.opcode {
            opcodes::RDID | opcodes::RDSR => Phase::DataOut { width: self.wide(1) },
            opcodes::READ
            | opcodes::FAST_READ
            | opcodes::DOR
            | opcodes::QOR
            | opcodes::PP
            | opcodes::QPP
            | opcodes::SE
            | opcodes::BE => Phase::Address { width: self.wide(1) },
            opcodes::DIOR => Phase::Address { width: self.wide(2) },
            opcodes::QIOR => Phase::Address { width: 4 },
            _ => Phase::Ignore,
        };
    }

    /// Decide what follows the address
    fn after_address(&mut self) {
        self.phase = match self.opcode {
            opcodes::READ => Phase::DataOut { width: self.wide(1) },
            opcodes::FAST_READ => Phase::Dummy { left: 8 },
            opcodes::DOR => Phase::Dummy { left: 8 },
            opcodes::DIOR => Phase::Dummy { left: 4 },
            opcodes::QOR => Phase::Dummy { left: 8 },
            opcodes::QIOR => Phase::Dummy { left: 6 },
            opcodes::PP => Phase::DataIn { width: self.wide(1) },
            opcodes::QPP => Phase::DataIn { width: 4 },
            _ => Phase::Ignore,
        };
    }

    fn read_width(&self) -> u8 {
        match self.opcode {
            opcodes::DOR | opcodes::DIOR => self.wide(2),
            opcodes::QOR | opcodes::QIOR => 4,
            _ => self.wide(1),
        }
    }

    fn next_out_byte(&mut self) -> u8 {
        match self.opcode {
            opcodes::RDID => {
                let id = [
                    self.config.manufacturer_id,
                    (self.config.device_id >> 8) as u8,
                    self.config.device_id as u8,
                ];
                let byte = id.get(self.id_index).copied().unwrap_or(0);
                self.id_index += 1;
                byte
            }
            opcodes::RDSR => self.status(),
            _ => {
                let byte = self.data[self.address as usize % self.data.len()];
                self.address = self.address.wrapping_add(1);
                byte
            }
        }
    }

    /// Rising edge: take in one symbol of whatever the host drives
    fn sample(&mut self) {
        let levels = self.line_levels();
        match self.phase {
            Phase::Command => {
                let width = self.wide(1);
                self.shift_in(levels, width);
                if self.bits == 8 {
                    self.opcode = self.shift as u8;
                    self.shift = 0;
                    self.bits = 0;
                    self.after_opcode();
                }
            }
            Phase::Address { width } => {
                self.shift_in(levels, width);
                if self.bits == 24 {
                    self.address = self.shift;
                    self.shift = 0;
                    self.bits = 0;
                    self.after_address();
                }
            }
            Phase::Dummy { left } => {
                self.phase = if left > 1 {
                    Phase::Dummy { left: left - 1 }
                } else {
                    Phase::DataOut {
                        width: self.read_width(),
                    }
                };
            }
            Phase::DataIn { width } => {
                self.shift_in(levels, width);
                if self.bits == 8 {
                    self.program.push(self.shift as u8);
                    self.shift = 0;
                    self.bits = 0;
                }
            }
            Phase::DataOut { .. } | Phase::Ignore => {}
        }
    }

    /// Falling edge: present the next output symbol
    fn shift_out(&mut self) {
        let Phase::DataOut { width } = self.phase else {
            self.drive = 0;
            return;
        };
        if self.out_bits == 0 {
            self.out_byte = self.next_out_byte();
            self.out_bits = 8;
        }
        self.out_bits -= width;
        let symbol = (self.out_byte >> self.out_bits) & ((1 << width) - 1);
        (self.drive, self.drive_levels) = match width {
            1 => (IO1, symbol << 1),
            2 => (0b0011, symbol),
            _ => (IO_ALL, symbol),
        };
    }

    fn shift_in(&mut self, levels: u8, width: u8) {
        let symbol = match width {
            1 => levels & 1,
            2 => levels & 0b11,
            _ => levels & 0b1111,
        };
        self.shift = (self.shift << width) | symbol as u32;
        self.bits += width;
    }

    /// What a receiver sees: host drive, then flash drive, then pull-ups
    fn line_levels(&self) -> u8 {
        let flash_only = self.drive & !self.host_dir;
        let floating = !(self.host_dir | self.drive) & IO_ALL;
        (self.host_levels & self.host_dir) | (self.drive_levels & flash_only) | floating
    }
}

impl QspiPins for SimFlash {
    fn set_cs(&mut self, active: bool) {
        if active && !self.cs_active {
            self.cs_active = true;
            self.begin();
        } else if !active && self.cs_active {
            self.cs_active = false;
            self.end();
        }
    }

    fn set_sck(&mut self, high: bool) {
        let rising = high && !self.sck;
        let falling = !high && self.sck;
        self.sck = high;
        if !self.cs_active {
            return;
        }
        if rising {
            self.sample();
        } else if falling {
            self.shift_out();
        }
    }

    fn set_io_direction(&mut self, outputs: u8) {
        self.host_dir = outputs & IO_ALL;
    }

    fn write_io(&mut self, levels: u8) {
        self.host_levels = levels & IO_ALL;
    }

    fn read_io(&mut self) -> u8 {
        self.line_levels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qspi::{QspiEngine, QspiMode};
    use crate::sim::NoDelay;

    fn engine(flash: SimFlash) -> QspiEngine<SimFlash, NoDelay> {
        let mut qspi = QspiEngine::new(flash, NoDelay);
        qspi.init();
        qspi
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn fast_read(qspi: &mut QspiEngine<SimFlash, NoDelay>, addr: u32, buf: &mut [u8]) {
        let (opcode, dummy) = qspi.mode().fast_read();
        qspi.cs_low();
        qspi.send_command(opcode);
        qspi.send_address(addr, 3).unwrap();
        qspi.send_dummy_cycles(dummy);
        qspi.read_data(buf);
        qspi.cs_high();
    }

    #[test]
    fn test_jedec_id_via_transfer() {
        let mut qspi = engine(SimFlash::new(SimFlashConfig::default()));
        let mut rx = [0u8; 4];
        qspi.cs_low();
        qspi.transfer(&[opcodes::RDID, 0, 0, 0], &mut rx).unwrap();
        qspi.cs_high();
        assert_eq!(rx[1..], [0xEF, 0x40, 0x18]);
    }

    #[test]
    fn test_fast_read_every_mode() {
        let contents = pattern(1024);
        for mode in QspiMode::ALL {
            let flash = SimFlash::with_data(SimFlashConfig::default(), &contents);
            let mut qspi = engine(flash);
            if mode == QspiMode::Qpi {
                qspi.enter_qpi();
                assert!(qspi.pins().is_qpi());
            } else {
                qspi.set_mode(mode);
            }
            let mut buf = [0u8; 300];
            fast_read(&mut qspi, 0x40, &mut buf);
            assert_eq!(buf[..], contents[0x40..0x40 + 300], "{}", mode);
        }
    }

    #[test]
    fn test_program_needs_write_enable_and_only_clears_bits() {
        let mut qspi = engine(SimFlash::new(SimFlashConfig::default()));

        // without WREN nothing happens
        qspi.cs_low();
        qspi.send_command(opcodes::PP);
        qspi.send_address(0x100, 3).unwrap();
        qspi.write_data(&[0x00]);
        qspi.cs_high();
        assert_eq!(qspi.pins().data()[0x100], 0xFF);

        for byte in [0xF0u8, 0x3C] {
            qspi.cs_low();
            qspi.send_command(opcodes::WREN);
            qspi.cs_high();
            assert!(qspi.pins().write_enabled());
            qspi.cs_low();
            qspi.send_command(opcodes::PP);
            qspi.send_address(0x100, 3).unwrap();
            qspi.write_data(&[byte]);
            qspi.cs_high();
            assert!(!qspi.pins().write_enabled());
        }
        assert_eq!(qspi.pins().data()[0x100], 0x30);
    }

    #[test]
    fn test_page_program_wraps_within_page() {
        let mut flash = SimFlash::new(SimFlashConfig::default());
        flash.write_enabled = true;
        let mut qspi = engine(flash);
        qspi.cs_low();
        qspi.send_command(opcodes::PP);
        qspi.send_address(0x1FE, 3).unwrap();
        qspi.write_data(&[1, 2, 3, 4]);
        qspi.cs_high();
        let data = qspi.pins().data();
        assert_eq!(data[0x1FE..0x200], [1, 2]);
        assert_eq!(data[0x100..0x102], [3, 4]);
        assert_eq!(data[0x200], 0xFF);
    }

    #[test]
    fn test_sector_erase_and_busy_status() {
        let flash = SimFlash::with_data(SimFlashConfig::default(), &[0u8; 8192]).with_busy_polls(2);
        let mut qspi = engine(flash);
        qspi.cs_low();
        qspi.send_command(opcodes::WREN);
        qspi.cs_high();
        qspi.cs_low();
        qspi.send_command(opcodes::SE);
        qspi.send_address(0x1234, 3).unwrap();
        qspi.cs_high();

        let mut polls = std::vec::Vec::new();
        for _ in 0..3 {
            let mut status = [0u8];
            qspi.cs_low();
            qspi.send_command(opcodes::RDSR);
            qspi.read_data(&mut status);
            qspi.cs_high();
            polls.push(status[0] & STATUS_BUSY);
        }
        assert_eq!(polls, [1, 1, 0]);
        let data = qspi.pins().data();
        assert!(data[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert!(data[..0x1000].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_quad_page_program() {
        let mut qspi = engine(SimFlash::new(SimFlashConfig::default()));
        qspi.set_mode(QspiMode::QuadOut);
        qspi.cs_low();
        qspi.send_command(opcodes::WREN);
        qspi.cs_high();
        qspi.cs_low();
        qspi.send_command(opcodes::QPP);
        qspi.send_address(0x10, 3).unwrap();
        qspi.write_data(&[0xDE, 0xAD]);
        qspi.cs_high();
        assert_eq!(qspi.pins().data()[0x10..0x12], [0xDE, 0xAD]);
    }

    #[test]
    fn test_exit_qpi_only_from_qpi() {
        let mut qspi = engine(SimFlash::new(SimFlashConfig::default()));
        qspi.enter_qpi();
        qspi.exit_qpi();
        assert!(!qspi.pins().is_qpi());
        assert_eq!(qspi.pins().opcodes_seen(), [opcodes::EQPI, opcodes::RSTQPI]);
    }
}
