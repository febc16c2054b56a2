//! CLI command implementations
//!
//! Each function takes an open [`uniprog_link::Client`] and prints its result
//! to stdout. Flash transfers show an `indicatif` progress bar.

mod bus;
mod flash;
mod swd;
mod system;

pub use bus::{run_avr_sig, run_i2c_read, run_i2c_scan, run_i2c_write, run_spi_config, run_spi_scan, run_spi_xfer};
pub use flash::{
    run_flash_erase, run_flash_id, run_flash_read, run_flash_write, run_qspi_clock, run_qspi_cmd,
    run_qspi_mode,
};
pub use swd::{run_swd_init, run_swd_read, run_swd_write};
pub use system::{run_bootloader, run_caps, run_gpio_test, run_ping, run_reset, run_status};

pub use uniprog_link::DynClient;

/// Result type shared by the command functions
pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Bytes as space-separated hex
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classic 16-byte-per-line hex dump
pub fn hexdump(base: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:08X}  {:<48} |{}|\n",
            base as usize + i * 16,
            hex(line),
            ascii
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x9F, 0x00, 0xAB]), "9F 00 AB");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_hexdump() {
        let dump = hexdump(0x100, b"UNIPROG\x00");
        assert_eq!(
            dump,
            format!("00000100  {:<48} |UNIPROG.|\n", "55 4E 49 50 52 4F 47 00")
        );
    }
}
