//! I2C bus commands

use embedded_hal::i2c::{Error as _, I2c};

use crate::driver::{Driver, Request, Response};
use crate::error::{CommandError, Result};
use crate::protocol::{cmd, MAX_PAYLOAD};

/// 7-bit addresses probed by a scan
const SCAN_ADDRESSES: core::ops::RangeInclusive<u8> = 0x01..=0x7E;

/// Handler for the I2C command range
pub struct I2cDriver<I> {
    i2c: I,
}

impl<I: I2c> I2cDriver<I> {
    /// Wrap a blocking I2C master
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    /// The bus
    pub fn bus(&self) -> &I {
        &self.i2c
    }

    fn scan(&mut self, response: &mut Response<'_>) -> core::result::Result<(), CommandError> {
        let mut found = [0u8; 0x80];
        let mut count = 0;
        let mut probe = [0u8; 1];
        for addr in SCAN_ADDRESSES {
            if self.i2c.read(addr, &mut probe).is_ok() {
                found[count] = addr;
                count += 1;
            }
        }
        log::debug!("I2C scan found {} device(s)", count);
        response.push(count as u8)?;
        response.extend_from_slice(&found[..count])?;
        Ok(())
    }
}

impl<I: I2c> Driver for I2cDriver<I> {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn handle_command(
        &mut self,
        command: u8,
        payload: &[u8],
        response: &mut Response<'_>,
    ) -> core::result::Result<(), CommandError> {
        let mut req = Request::new(payload);
        match command {
            cmd::I2C_SCAN => self.scan(response),
            cmd::I2C_READ => {
                let addr = req.u8()?;
                let len = req.u16()? as usize;
                if len > MAX_PAYLOAD {
                    return Err(CommandError::invalid_parameter("Read too long"));
                }
                let buf = response.reserve(len)?;
                if buf.is_empty() {
                    return Ok(());
                }
                self.i2c.read(addr, buf).map_err(|e| {
                    log::debug!("I2C read from 0x{:02X} failed: {:?}", addr, e.kind());
                    CommandError::bus("I2C read failed")
                })
            }
            cmd::I2C_WRITE => {
                let addr = req.u8()?;
                let data = req.rest();
                self.i2c.write(addr, data).map_err(|e| {
                    log::debug!("I2C write to 0x{:02X} failed: {:?}", addr, e.kind());
                    CommandError::bus("I2C write failed")
                })
            }
            _ => Err(CommandError::unknown_command()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::tests::call;
    use crate::error::ErrorCode;
    use crate::sim::SimEeprom;

    #[test]
    fn test_scan_lists_responding_addresses() {
        let mut i2c = I2cDriver::new(SimEeprom::default());
        let (reply, _) = call(&mut i2c, cmd::I2C_SCAN, &[]).unwrap();
        assert_eq!(reply, [1, 0x50]);
    }

    #[test]
    fn test_write_then_read_back() {
        let mut i2c = I2cDriver::new(SimEeprom::default());
        let (reply, _) = call(&mut i2c, cmd::I2C_WRITE, &[0x50, 0x10, 0xAB, 0xCD]).unwrap();
        assert!(reply.is_empty());
        assert_eq!(i2c.bus().memory()[0x10..0x12], [0xAB, 0xCD]);

        // set the word address, then read two bytes
        call(&mut i2c, cmd::I2C_WRITE, &[0x50, 0x10]).unwrap();
        let (reply, _) = call(&mut i2c, cmd::I2C_READ, &[0x50, 0x02, 0x00]).unwrap();
        assert_eq!(reply, [0xAB, 0xCD]);
    }

    #[test]
    fn test_nack_is_bus_error() {
        let mut i2c = I2cDriver::new(SimEeprom::default());
        let err = call(&mut i2c, cmd::I2C_READ, &[0x20, 0x01, 0x00]).unwrap_err();
        assert_eq!(err.code, ErrorCode::BusError);
        let err = call(&mut i2c, cmd::I2C_WRITE, &[0x20, 0x00]).unwrap_err();
        assert_eq!(err.code, ErrorCode::BusError);
    }

    #[test]
    fn test_malformed_requests() {
        let mut i2c = I2cDriver::new(SimEeprom::default());
        let err = call(&mut i2c, cmd::I2C_READ, &[0x50, 0x01]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        let err = call(&mut i2c, cmd::I2C_READ, &[0x50, 0x01, 0x10]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        let err = call(&mut i2c, cmd::I2C_WRITE, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }
}
