//! SWD debug port commands

use super::{CmdResult, DynClient};

/// Run the swd-init command
pub fn run_swd_init(probe: &mut DynClient) -> CmdResult {
    let idcode = probe.swd_init()?;
    println!("IDCODE: 0x{:08X}", idcode);
    Ok(())
}

/// Run the swd-read command
pub fn run_swd_read(probe: &mut DynClient, dp: bool, ap: u8, addr: u8) -> CmdResult {
    let value = if dp {
        probe.swd_read_dp(addr)?
    } else {
        probe.swd_read_ap(ap, addr)?
    };
    println!("0x{:08X}", value);
    Ok(())
}

/// Run the swd-write command
pub fn run_swd_write(probe: &mut DynClient, dp: bool, ap: u8, addr: u8, value: u32) -> CmdResult {
    if dp {
        probe.swd_write_dp(addr, value)?;
        log::info!("DP[0x{:02X}] <- 0x{:08X}", addr, value);
    } else {
        probe.swd_write_ap(ap, addr, value)?;
        log::info!("AP{}[0x{:02X}] <- 0x{:08X}", ap, addr, value);
    }
    Ok(())
}
