//! Reboot into the ROM bootloader

use crate::driver::{DeferredAction, Driver, Response};
use crate::error::{CommandError, Result};
use crate::protocol::cmd;

/// Handler for the bootloader command
///
/// The reboot itself is left to the firmware, which runs it once the empty
/// acknowledgement has been flushed.
#[derive(Debug, Default)]
pub struct BootloaderDriver;

impl Driver for BootloaderDriver {
    fn name(&self) -> &'static str {
        "bootloader"
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
            cmd::BOOTLOADER => {
                log::info!("Bootloader entry requested");
                response.defer(DeferredAction::Bootloader);
                Ok(())
            }
            _ => Err(CommandError::unknown_command()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::tests::call;

    #[test]
    fn test_bootloader_is_deferred_with_empty_reply() {
        let (reply, deferred) = call(&mut BootloaderDriver, cmd::BOOTLOADER, &[]).unwrap();
        assert!(reply.is_empty());
        assert_eq!(deferred, Some(DeferredAction::Bootloader));
    }
}
