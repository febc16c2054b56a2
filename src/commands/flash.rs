//! QSPI bus and flash commands

use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use uniprog_core::qspi::QspiMode;
use uniprog_link::flash;

use super::{hex, CmdResult, DynClient};

fn progress_bar(total: u64) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Run the qspi-mode command
pub fn run_qspi_mode(probe: &mut DynClient, mode: QspiMode) -> CmdResult {
    let mode = probe.qspi_set_mode(mode)?;
    println!("QSPI mode: {}", mode);
    Ok(())
}

/// Run the qspi-clock command
pub fn run_qspi_clock(probe: &mut DynClient, hz: u32) -> CmdResult {
    let actual = probe.qspi_set_clock(hz)?;
    if actual != hz {
        log::info!("Requested {} Hz, closest achievable is {} Hz", hz, actual);
    }
    println!("QSPI clock: {} Hz", actual);
    Ok(())
}

/// Run the qspi-cmd command
pub fn run_qspi_cmd(probe: &mut DynClient, opcode: u8, data: Option<&[u8]>, len: usize) -> CmdResult {
    let (tx, n) = match data {
        Some(data) => (data, data.len()),
        None => (&[][..], len),
    };
    let rx = probe.qspi_command(opcode, tx, n)?;
    if !rx.is_empty() {
        println!("{}", hex(&rx));
    }
    Ok(())
}

/// Run the flash-id command
pub fn run_flash_id(probe: &mut DynClient) -> CmdResult {
    let (manufacturer, device) = flash::read_jedec_id(probe)?;
    println!("JEDEC ID: {:02X} {:04X}", manufacturer, device);
    Ok(())
}

/// Run the flash-read command
pub fn run_flash_read(probe: &mut DynClient, addr: u32, len: u32, output: &Path) -> CmdResult {
    println!("Reading {} bytes from 0x{:06X}...", len, addr);

    let pb = progress_bar(len as u64)?;
    let data = flash::read(probe, addr, len as usize, |n| pb.inc(n as u64))?;
    pb.finish_with_message("Read complete");

    fs::write(output, &data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Run the flash-erase command
pub fn run_flash_erase(probe: &mut DynClient, addr: u32) -> CmdResult {
    probe.qspi_set_mode(QspiMode::Standard)?;
    flash::erase_sector(probe, addr)?;
    let base = addr & !(flash::SECTOR_SIZE - 1);
    println!(
        "Erased 0x{:06X}..0x{:06X}",
        base,
        base + flash::SECTOR_SIZE - 1
    );
    Ok(())
}

/// Run the flash-write command
pub fn run_flash_write(probe: &mut DynClient, addr: u32, input: &Path) -> CmdResult {
    let data = fs::read(input)?;
    if data.is_empty() {
        return Err(format!("{:?} is empty", input).into());
    }
    println!("Programming {} bytes at 0x{:06X}...", data.len(), addr);

    probe.qspi_set_mode(QspiMode::Standard)?;
    let pb = progress_bar(data.len() as u64)?;
    flash::write(probe, addr, &data, |n| pb.inc(n as u64))?;
    pb.finish_with_message("Write complete");

    println!("Done");
    Ok(())
}
