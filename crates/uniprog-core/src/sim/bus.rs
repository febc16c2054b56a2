//! Simulated I2C, SPI and AVR ISP peripherals

use core::convert::Infallible;
use std::vec;
use std::vec::Vec;

use embedded_hal::i2c::{self, I2c, NoAcknowledgeSource};
use embedded_hal::spi::{self, Mode, SpiBus, SpiDevice, MODE_0};

use crate::hal::SpiPort;

/// 24C02-style EEPROM on an otherwise empty I2C bus
///
/// A write sets the word address from its first byte and stores the rest;
/// a read streams from the word address, wrapping at the end.
pub struct SimEeprom {
    address: u8,
    memory: Vec<u8>,
    pointer: usize,
}

impl SimEeprom {
    /// EEPROM of `size` bytes answering at 7-bit `address`
    pub fn new(address: u8, size: usize) -> Self {
        Self {
            address,
            memory: vec![0xFF; size],
            pointer: 0,
        }
    }

    /// Device address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Memory contents
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Memory contents, mutably
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

impl Default for SimEeprom {
    fn default() -> Self {
        Self::new(0x50, 256)
    }
}

impl i2c::ErrorType for SimEeprom {
    type Error = i2c::ErrorKind;
}

impl I2c for SimEeprom {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != self.address {
            return Err(i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        let len = self.memory.len();
        for op in operations {
            match op {
                i2c::Operation::Write(bytes) => {
                    let Some((&word, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.pointer = word as usize % len;
                    for &byte in data {
                        self.memory[self.pointer] = byte;
                        self.pointer = (self.pointer + 1) % len;
                    }
                }
                i2c::Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = self.memory[self.pointer];
                        self.pointer = (self.pointer + 1) % len;
                    }
                }
            }
        }
        Ok(())
    }
}

/// SPI NOR flash that only answers JEDEC ID, behind a chip select
pub struct SimSpiFlash {
    jedec_id: Option<[u8; 3]>,
    mode: Mode,
    frequency_hz: u32,
    position: usize,
    opcode: u8,
}

impl SimSpiFlash {
    /// A flash answering with `jedec_id` (manufacturer, device high, device low)
    pub fn new(jedec_id: [u8; 3]) -> Self {
        Self {
            jedec_id: Some(jedec_id),
            mode: MODE_0,
            frequency_hz: 1_000_000,
            position: 0,
            opcode: 0,
        }
    }

    /// No chip on the bus: MISO floats high
    pub fn absent() -> Self {
        Self {
            jedec_id: None,
            ..Self::new([0; 3])
        }
    }

    /// Last configured SPI mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Last configured clock
    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        let position = self.position;
        self.position += 1;
        let Some(id) = self.jedec_id else {
            return 0xFF;
        };
        if position == 0 {
            self.opcode = mosi;
            return 0xFF;
        }
        match self.opcode {
            0x9F => id.get(position - 1).copied().unwrap_or(0x00),
            _ => 0xFF,
        }
    }
}

impl spi::ErrorType for SimSpiFlash {
    type Error = Infallible;
}

impl SpiDevice for SimSpiFlash {
    fn transaction(&mut self, operations: &mut [spi::Operation<'_, u8>]) -> Result<(), Self::Error> {
        self.position = 0;
        for op in operations {
            match op {
                spi::Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = self.exchange(0x00);
                    }
                }
                spi::Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        self.exchange(byte);
                    }
                }
                spi::Operation::Transfer(read, write) => {
                    for i in 0..read.len().max(write.len()) {
                        let miso = self.exchange(write.get(i).copied().unwrap_or(0x00));
                        if let Some(slot) = read.get_mut(i) {
                            *slot = miso;
                        }
                    }
                }
                spi::Operation::TransferInPlace(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = self.exchange(*byte);
                    }
                }
                spi::Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}

impl SpiPort for SimSpiFlash {
    fn configure(&mut self, mode: Mode, frequency_hz: u32) -> Result<(), Self::Error> {
        self.mode = mode;
        self.frequency_hz = frequency_hz;
        Ok(())
    }
}

/// ATmega328P serial programming interface
///
/// Answers 4-byte instructions, echoing each byte one position later.
/// Signature and fuse reads return their value in the last byte once
/// programming is enabled.
pub struct SimAvr {
    present: bool,
    programming: bool,
    instruction: [u8; 4],
    index: usize,
    signature: [u8; 3],
    low_fuse: u8,
}

impl SimAvr {
    /// A responding ATmega328P
    pub fn new() -> Self {
        Self {
            present: true,
            programming: false,
            instruction: [0; 4],
            index: 0,
            signature: [0x1E, 0x95, 0x0F],
            low_fuse: 0x62,
        }
    }

    /// No target connected: MISO floats high
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }

    /// Whether programming enable was accepted
    pub fn is_programming(&self) -> bool {
        self.programming
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.present {
            return 0xFF;
        }
        let index = self.index;
        self.instruction[index] = mosi;
        self.index = (index + 1) % 4;

        if index == 0 {
            return 0x00;
        }
        let echo = self.instruction[index - 1];
        if index < 3 {
            if index == 2 && self.instruction[0] == 0xAC && self.instruction[1] == 0x53 {
                self.programming = true;
            }
            return echo;
        }
        match (self.programming, self.instruction[0], self.instruction[1]) {
            (true, 0x30, _) => self
                .signature
                .get(self.instruction[2] as usize & 0x03)
                .copied()
                .unwrap_or(0x00),
            (true, 0x50, 0x00) => self.low_fuse,
            _ => echo,
        }
    }
}

impl Default for SimAvr {
    fn default() -> Self {
        Self::new()
    }
}

impl spi::ErrorType for SimAvr {
    type Error = Infallible;
}

impl SpiBus for SimAvr {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words.iter_mut() {
            *word = self.exchange(0x00);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for &word in words {
            self.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        for i in 0..read.len().max(write.len()) {
            let miso = self.exchange(write.get(i).copied().unwrap_or(0x00));
            if let Some(slot) = read.get_mut(i) {
                *slot = miso;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words.iter_mut() {
            *word = self.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eeprom_pointer_write_then_read() {
        let mut eeprom = SimEeprom::default();
        eeprom.write(0x50, &[0xFE, 1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        eeprom.write_read(0x50, &[0xFE], &mut buf).unwrap();
        // wraps at the end of memory
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(eeprom.memory()[0], 3);
        assert!(eeprom.read(0x51, &mut buf).is_err());
    }

    #[test]
    fn test_spi_flash_jedec() {
        let mut flash = SimSpiFlash::new([0xC2, 0x20, 0x17]);
        let mut rx = [0u8; 4];
        flash.transfer(&mut rx, &[0x9F, 0, 0, 0]).unwrap();
        assert_eq!(rx, [0xFF, 0xC2, 0x20, 0x17]);

        let mut absent = SimSpiFlash::absent();
        absent.transfer(&mut rx, &[0x9F, 0, 0, 0]).unwrap();
        assert_eq!(rx, [0xFF; 4]);
    }

    #[test]
    fn test_avr_programming_enable_and_signature() {
        let mut avr = SimAvr::new();
        let mut buf = [0xAC, 0x53, 0x00, 0x00];
        avr.transfer_in_place(&mut buf).unwrap();
        assert_eq!(buf[2], 0x53);
        assert!(avr.is_programming());

        let mut signature = [0u8; 3];
        for (i, byte) in signature.iter_mut().enumerate() {
            let mut buf = [0x30, 0x00, i as u8, 0x00];
            avr.transfer_in_place(&mut buf).unwrap();
            *byte = buf[3];
        }
        assert_eq!(signature, [0x1E, 0x95, 0x0F]);
    }
}
