//! I2C, SPI and AVR ISP commands

use uniprog_link::SpiScan;

use super::{hex, hexdump, CmdResult, DynClient};

/// Run the i2c-scan command
pub fn run_i2c_scan(probe: &mut DynClient) -> CmdResult {
    let found = probe.i2c_scan()?;
    if found.is_empty() {
        println!("No I2C devices found");
        return Ok(());
    }
    println!("Found {} I2C device(s):", found.len());
    for addr in found {
        println!("  0x{:02X}", addr);
    }
    Ok(())
}

/// Run the i2c-read command
pub fn run_i2c_read(probe: &mut DynClient, addr: u8, len: u32) -> CmdResult {
    let len = u16::try_from(len).map_err(|_| format!("length {} too large", len))?;
    let data = probe.i2c_read(addr, len)?;
    print!("{}", hexdump(0, &data));
    Ok(())
}

/// Run the i2c-write command
pub fn run_i2c_write(probe: &mut DynClient, addr: u8, data: &[u8]) -> CmdResult {
    probe.i2c_write(addr, data)?;
    println!("Wrote {} byte(s) to 0x{:02X}", data.len(), addr);
    Ok(())
}

/// Run the spi-scan command
pub fn run_spi_scan(probe: &mut DynClient) -> CmdResult {
    match probe.spi_scan()? {
        SpiScan::Found {
            manufacturer,
            device,
        } => println!("JEDEC ID: {:02X} {:04X}", manufacturer, device),
        SpiScan::Absent(raw) => println!("No SPI flash answered (read {})", hex(&raw)),
    }
    Ok(())
}

/// Run the spi-config command
pub fn run_spi_config(probe: &mut DynClient, mode: u8, hz: u32) -> CmdResult {
    probe.spi_config(mode, hz)?;
    println!("SPI mode {} at {} Hz", mode, hz);
    Ok(())
}

/// Run the spi-xfer command
pub fn run_spi_xfer(probe: &mut DynClient, data: &[u8]) -> CmdResult {
    let rx = probe.spi_transfer(data)?;
    println!("{}", hex(&rx));
    Ok(())
}

/// Run the avr-sig command
pub fn run_avr_sig(probe: &mut DynClient) -> CmdResult {
    probe.isp_enter()?;
    let result = probe.avr_signature();
    // release the target even if the signature read failed
    let exit = probe.isp_exit();
    let signature = result?;
    exit?;
    println!("AVR signature: {}", hex(&signature));
    Ok(())
}
