//! Probe housekeeping commands

use super::{CmdResult, DynClient};

/// Run the ping command
pub fn run_ping(probe: &mut DynClient) -> CmdResult {
    let start = std::time::Instant::now();
    probe.ping()?;
    println!("Probe answered in {:.1} ms", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}

/// Run the caps command
pub fn run_caps(probe: &mut DynClient) -> CmdResult {
    println!("{}", probe.capabilities()?);
    Ok(())
}

/// Run the status command
pub fn run_status(probe: &mut DynClient) -> CmdResult {
    let status = probe.status()?;
    let state = if status.state == 0 { "idle" } else { "busy" };
    println!("State:       {} ({})", state, status.state);
    println!("Uptime:      {}.{:03} s", status.uptime_ms / 1000, status.uptime_ms % 1000);
    println!("Free memory: {} bytes", status.free_memory);
    Ok(())
}

/// Run the gpio-test command
pub fn run_gpio_test(probe: &mut DynClient) -> CmdResult {
    let levels = probe.gpio_test()?;
    let level = |high: bool| if high { "high" } else { "low" };
    println!("CS:  {}", level(levels.cs));
    println!("SCK: {}", level(levels.sck));
    for (i, &io) in levels.io.iter().enumerate() {
        println!("IO{}: {}", i, level(io));
    }
    Ok(())
}

/// Run the reset command
pub fn run_reset(probe: &mut DynClient) -> CmdResult {
    probe.reset()?;
    println!("Probe is restarting");
    Ok(())
}

/// Run the bootloader command
pub fn run_bootloader(probe: &mut DynClient) -> CmdResult {
    probe.enter_bootloader()?;
    println!("Probe is rebooting into its bootloader");
    Ok(())
}
