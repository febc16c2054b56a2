//! System commands: ping, capabilities, status, reset, GPIO diagnostic

use crate::driver::{DeferredAction, Driver, Response};
use crate::error::{CommandError, Result};
use crate::hal::Board;
use crate::protocol::cmd;

/// Reply to PING
pub const PING_REPLY: [u8; 2] = [0xCA, 0xFE];

/// Capability document returned by GET_CAPS
pub const CAPABILITIES: &str = concat!(
    "{\"proto\":\"uniprog\",\"ver\":\"",
    env!("CARGO_PKG_VERSION"),
    "\",\"caps\":[\"i2c\",\"spi\",\"qspi\",\"isp\",\"swd\"]}"
);

/// Status byte reported while the probe is serving commands
const STATUS_IDLE: u8 = 0;

/// Handler for the system command range
pub struct SystemDriver<B> {
    board: B,
}

impl<B: Board> SystemDriver<B> {
    /// Create the driver on top of the board services
    pub fn new(board: B) -> Self {
        Self { board }
    }

    /// The board
    pub fn board(&self) -> &B {
        &self.board
    }
}

impl<B: Board> Driver for SystemDriver<B> {
    fn name(&self) -> &'static str {
        "system"
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn handle_command(
        &mut self,
        command: u8,
        _payload: &[u8],
        response: &mut Response<'_>,
    ) -> core::result::Result<(), CommandError> {
        match command {
            cmd::PING => {
                log::trace!("Ping");
                response.extend_from_slice(&PING_REPLY)?;
            }
            cmd::GET_CAPS => {
                response.extend_from_slice(CAPABILITIES.as_bytes())?;
            }
            cmd::GET_STATUS => {
                response.push(STATUS_IDLE)?;
                response.push_u32(self.board.uptime_ms())?;
                response.push_u32(self.board.free_memory())?;
            }
            cmd::RESET => {
                log::info!("Reset requested");
                response.defer(DeferredAction::Reset);
            }
            cmd::GPIO_TEST => {
                let levels = self.board.gpio_levels();
                log::debug!("GPIO levels: {:?}", levels);
                response.extend_from_slice(&levels.to_bytes())?;
            }
            _ => return Err(CommandError::unknown_command()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::tests::call;
    use crate::error::ErrorCode;
    use crate::hal::GpioLevels;
    use crate::sim::SimBoard;

    fn driver() -> SystemDriver<SimBoard> {
        SystemDriver::new(SimBoard {
            uptime_ms: 0x0102_0304,
            free_memory: 180 * 1024,
            levels: GpioLevels {
                cs: true,
                sck: false,
                io: [false, true, true, true],
            },
        })
    }

    #[test]
    fn test_ping() {
        let (reply, deferred) = call(&mut driver(), cmd::PING, &[]).unwrap();
        assert_eq!(reply, PING_REPLY);
        assert_eq!(deferred, None);
    }

    #[test]
    fn test_caps_is_json_listing_every_bus() {
        let (reply, _) = call(&mut driver(), cmd::GET_CAPS, &[]).unwrap();
        let text = core::str::from_utf8(&reply).unwrap();
        assert!(text.starts_with("{\"proto\":\"uniprog\""));
        for bus in ["i2c", "spi", "qspi", "isp", "swd"] {
            assert!(text.contains(&std::format!("\"{}\"", bus)), "{}", bus);
        }
    }

    #[test]
    fn test_status_layout() {
        let (reply, _) = call(&mut driver(), cmd::GET_STATUS, &[]).unwrap();
        assert_eq!(reply.len(), 9);
        assert_eq!(reply[0], 0);
        assert_eq!(reply[1..5], [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(u32::from_le_bytes(reply[5..9].try_into().unwrap()), 180 * 1024);
    }

    #[test]
    fn test_reset_is_deferred() {
        let (reply, deferred) = call(&mut driver(), cmd::RESET, &[]).unwrap();
        assert!(reply.is_empty());
        assert_eq!(deferred, Some(DeferredAction::Reset));
    }

    #[test]
    fn test_gpio_test_reports_raw_levels() {
        let (reply, _) = call(&mut driver(), cmd::GPIO_TEST, &[]).unwrap();
        assert_eq!(reply, [1, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_unimplemented_command_in_range() {
        let err = call(&mut driver(), 0x0E, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownCommand);
    }
}
