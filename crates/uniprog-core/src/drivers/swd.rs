//! ARM SWD debug port commands

use embedded_hal::delay::DelayNs;

use crate::driver::{Driver, Request, Response};
use crate::error::{CommandError, Result};
use crate::protocol::cmd;
use crate::swd::{SwdEngine, SwdPins};

/// Handler for the SWD command range
pub struct SwdDriver<P, D> {
    engine: SwdEngine<P, D>,
}

impl<P: SwdPins, D: DelayNs> SwdDriver<P, D> {
    /// Wrap an engine
    pub fn new(engine: SwdEngine<P, D>) -> Self {
        Self { engine }
    }

    /// The engine
    pub fn engine(&self) -> &SwdEngine<P, D> {
        &self.engine
    }

    /// The engine, mutably
    pub fn engine_mut(&mut self) -> &mut SwdEngine<P, D> {
        &mut self.engine
    }
}

/// DP registers live at 0x0, 0x4, 0x8 and 0xC
fn dp_address(req: &mut Request<'_>) -> core::result::Result<u8, CommandError> {
    let addr = req.u8()?;
    if addr > 0x0C || addr & 0x03 != 0 {
        return Err(CommandError::invalid_parameter("Invalid DP address"));
    }
    Ok(addr)
}

/// `[ap][addr]`, word-aligned within the AP's register bank
fn ap_address(req: &mut Request<'_>) -> core::result::Result<(u8, u8), CommandError> {
    let ap = req.u8()?;
    let addr = req.u8()?;
    if addr & 0x03 != 0 {
        return Err(CommandError::invalid_parameter("Invalid AP address"));
    }
    Ok((ap, addr))
}

impl<P: SwdPins, D: DelayNs> Driver for SwdDriver<P, D> {
    fn name(&self) -> &'static str {
        "swd"
    }

    fn initialize(&mut self) -> Result<()> {
        // no target is required at startup
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
            cmd::SWD_INIT => {
                let idcode = self.engine.init()?;
                response.push_u32(idcode)?;
            }
            cmd::SWD_READ => {
                let (ap, addr) = ap_address(&mut req)?;
                let value = self.engine.read_ap(ap, addr)?;
                response.push_u32(value)?;
            }
            cmd::SWD_WRITE => {
                let (ap, addr) = ap_address(&mut req)?;
                let value = req.u32()?;
                self.engine.write_ap(ap, addr, value)?;
            }
            cmd::SWD_READ_DP => {
                let addr = dp_address(&mut req)?;
                let value = self.engine.read_dp(addr)?;
                response.push_u32(value)?;
            }
            cmd::SWD_WRITE_DP => {
                let addr = dp_address(&mut req)?;
                let value = req.u32()?;
                self.engine.write_dp(addr, value)?;
            }
            _ => return Err(CommandError::unknown_command()),
        }
        Ok(())
    }
}
