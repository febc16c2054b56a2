//! AVR in-system programming over SPI

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Error as _, SpiBus};

use crate::driver::{Driver, Request, Response};
use crate::error::{CommandError, Error, Result};
use crate::protocol::cmd;

/// Programming Enable instruction
const PROGRAMMING_ENABLE: [u8; 4] = [0xAC, 0x53, 0x00, 0x00];

/// Reset must be held low this long before Programming Enable
const RESET_SETTLE_MS: u32 = 20;

/// Handler for the ISP command range
///
/// The target's RESET line is a plain output; SCK/MOSI/MISO come from an
/// SPI bus in mode 0.
pub struct IspDriver<B, P, D> {
    spi: B,
    reset: P,
    delay: D,
}

impl<B: SpiBus, P: OutputPin, D: DelayNs> IspDriver<B, P, D> {
    /// Create the driver
    pub fn new(spi: B, reset: P, delay: D) -> Self {
        Self { spi, reset, delay }
    }

    /// The reset line
    pub fn reset_pin(&self) -> &P {
        &self.reset
    }

    /// The SPI bus
    pub fn bus(&self) -> &B {
        &self.spi
    }

    fn instruction(&mut self, buf: &mut [u8; 4]) -> core::result::Result<(), CommandError> {
        self.spi
            .transfer_in_place(buf)
            .and_then(|()| self.spi.flush())
            .map_err(|e| {
                log::debug!("ISP transfer failed: {:?}", e.kind());
                CommandError::bus("ISP transfer failed")
            })
    }

    fn set_reset(&mut self, active: bool) -> core::result::Result<(), CommandError> {
        let result = if active {
            self.reset.set_low()
        } else {
            self.reset.set_high()
        };
        result.map_err(|_| CommandError::from(Error::Pin))
    }
}

impl<B: SpiBus, P: OutputPin, D: DelayNs> Driver for IspDriver<B, P, D> {
    fn name(&self) -> &'static str {
        "isp"
    }

    fn initialize(&mut self) -> Result<()> {
        self.reset.set_high().map_err(|_| Error::Pin)
    }

    fn handle_command(
        &mut self,
        command: u8,
        payload: &[u8],
        response: &mut Response<'_>,
    ) -> core::result::Result<(), CommandError> {
        match command {
            cmd::ISP_ENTER => {
                self.set_reset(true)?;
                self.delay.delay_ms(RESET_SETTLE_MS);
                let mut reply = PROGRAMMING_ENABLE;
                self.instruction(&mut reply)?;
                if reply[2] != PROGRAMMING_ENABLE[1] {
                    log::warn!("ISP: no sync (got {:02X?})", reply);
                    return Err(CommandError::target("No sync"));
                }
                log::debug!("ISP programming enabled");
            }
            cmd::ISP_XFER => {
                let mut req = Request::new(payload);
                let mut buf = [0u8; 4];
                buf.copy_from_slice(req.bytes(4)?);
                self.instruction(&mut buf)?;
                response.extend_from_slice(&buf)?;
            }
            cmd::ISP_EXIT => self.set_reset(false)?,
            _ => return Err(CommandError::unknown_command()),
        }
        Ok(())
    }
}
