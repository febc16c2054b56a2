//! Hardware SPI commands

use embedded_hal::spi::{Error as _, MODE_0, MODE_1, MODE_2, MODE_3};

use crate::driver::{Driver, Request, Response};
use crate::error::{CommandError, Result};
use crate::hal::SpiPort;
use crate::protocol::cmd;

/// JEDEC Read Identification
const RDID: u8 = 0x9F;

/// Handler for the SPI command range
pub struct SpiDriver<S> {
    spi: S,
}

impl<S: SpiPort> SpiDriver<S> {
    /// Wrap an SPI device (bus plus chip select)
    pub fn new(spi: S) -> Self {
        Self { spi }
    }

    /// The device
    pub fn device(&self) -> &S {
        &self.spi
    }

    fn transfer(&mut self, buf: &mut [u8]) -> core::result::Result<(), CommandError> {
        self.spi.transfer_in_place(buf).map_err(|e| {
            log::debug!("SPI transfer failed: {:?}", e.kind());
            CommandError::bus("SPI transfer failed")
        })
    }
}

impl<S: SpiPort> Driver for SpiDriver<S> {
    fn name(&self) -> &'static str {
        "spi"
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
        match command {
            cmd::SPI_SCAN => {
                let mut id = [RDID, 0, 0, 0];
                self.transfer(&mut id)?;
                if id[1] != 0x00 && id[1] != 0xFF {
                    log::debug!("SPI flash {:02X} {:02X}{:02X}", id[1], id[2], id[3]);
                    response.push(1)?;
                    response.extend_from_slice(&id[1..])?;
                } else {
                    response.push(0)?;
                    response.extend_from_slice(&id)?;
                }
            }
            cmd::SPI_CONFIG => {
                let mut req = Request::new(payload);
                let mode = match req.u8()? {
                    0 => MODE_0,
                    1 => MODE_1,
                    2 => MODE_2,
                    3 => MODE_3,
                    _ => return Err(CommandError::invalid_parameter("Invalid SPI mode")),
                };
                let hz = req.u32()?;
                if hz == 0 {
                    return Err(CommandError::invalid_parameter("Invalid clock"));
                }
                self.spi.configure(mode, hz).map_err(|e| {
                    log::debug!("SPI configure failed: {:?}", e.kind());
                    CommandError::bus("SPI configure failed")
                })?;
                response.push(1)?;
            }
            cmd::SPI_XFER => {
                let buf = response.reserve(payload.len())?;
                buf.copy_from_slice(payload);
                if !buf.is_empty() {
                    self.transfer(buf)?;
                }
            }
            _ => return Err(CommandError::unknown_command()),
        }
        Ok(())
    }
}
