//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uniprog_core::qspi::QspiMode;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a hex or decimal byte
pub fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in a byte", s))
}

/// Byte string argument; the alias keeps clap from treating it as a list
pub type HexBytes = Vec<u8>;

/// Parse a hex byte string such as `9f000000` or `9f 00 00 00`
pub fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: String = s
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err("Hex string needs an even number of digits".to_string());
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("Invalid hex byte: {}", &digits[i..i + 2]))
        })
        .collect()
}

/// Parse a QSPI mode by number or by name
pub fn parse_qspi_mode(s: &str) -> Result<QspiMode, String> {
    let mode = match s.to_ascii_lowercase().as_str() {
        "standard" | "single" | "1-1-1" => QspiMode::Standard,
        "dual-out" | "1-1-2" => QspiMode::DualOut,
        "dual-io" | "1-2-2" => QspiMode::DualIo,
        "quad-out" | "1-1-4" => QspiMode::QuadOut,
        "quad-io" | "1-4-4" => QspiMode::QuadIo,
        "qpi" | "4-4-4" => QspiMode::Qpi,
        other => {
            let value = parse_hex_u8(other)?;
            QspiMode::from_u8(value).map_err(|e| e.to_string())?
        }
    };
    Ok(mode)
}

#[derive(Parser)]
#[command(name = "uniprog")]
#[command(author, version, about = "Multi-protocol debug probe host tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Probe connection: serial:<device>[,baud=N] or sim
    #[arg(
        short,
        long,
        global = true,
        env = "UNIPROG_PORT",
        default_value = "serial:/dev/ttyACM0"
    )]
    pub port: String,

    /// Reply timeout in milliseconds
    #[arg(long, global = true, default_value_t = 2000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the probe answers
    Ping,

    /// Show the probe's capability document
    Caps,

    /// Show probe state, uptime and free memory
    Status,

    /// Sample the flash interface lines
    GpioTest,

    /// Restart the probe
    Reset,

    /// Reboot the probe into its USB bootloader
    Bootloader,

    /// List I2C devices that acknowledge
    I2cScan,

    /// Read bytes from an I2C device
    I2cRead {
        /// 7-bit device address
        #[arg(value_parser = parse_hex_u8)]
        addr: u8,

        /// Number of bytes
        #[arg(value_parser = parse_hex_u32)]
        len: u32,
    },

    /// Write bytes to an I2C device
    I2cWrite {
        /// 7-bit device address
        #[arg(value_parser = parse_hex_u8)]
        addr: u8,

        /// Data as hex
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
    },

    /// Read the JEDEC ID on the hardware SPI port
    SpiScan,

    /// Set hardware SPI mode and clock
    SpiConfig {
        /// SPI mode 0..3
        mode: u8,

        /// Clock in Hz
        #[arg(value_parser = parse_hex_u32)]
        hz: u32,
    },

    /// Full-duplex hardware SPI transfer
    SpiXfer {
        /// Bytes to send, as hex
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
    },

    /// Select the QSPI bus width mode
    QspiMode {
        /// 0-5 or standard, dual-out, dual-io, quad-out, quad-io, qpi
        #[arg(value_parser = parse_qspi_mode)]
        mode: QspiMode,
    },

    /// Set the QSPI bit-bang clock
    QspiClock {
        /// Clock in Hz
        #[arg(value_parser = parse_hex_u32)]
        hz: u32,
    },

    /// Raw QSPI command with an optional data phase
    QspiCmd {
        /// Opcode
        #[arg(value_parser = parse_hex_u8)]
        cmd: u8,

        /// Bytes to send in the data phase, as hex
        #[arg(value_parser = parse_hex_bytes)]
        data: Option<HexBytes>,

        /// Bytes to read when no data is given
        #[arg(short = 'n', long, default_value_t = 0)]
        len: usize,
    },

    /// Read the QSPI flash JEDEC ID
    FlashId,

    /// Read QSPI flash contents to a file
    FlashRead {
        /// Start address
        #[arg(value_parser = parse_hex_u32)]
        addr: u32,

        /// Number of bytes
        #[arg(value_parser = parse_hex_u32)]
        len: u32,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Erase the 4 KiB QSPI flash sector containing an address
    FlashErase {
        /// Address inside the sector
        #[arg(value_parser = parse_hex_u32)]
        addr: u32,
    },

    /// Program a file into erased QSPI flash
    FlashWrite {
        /// Start address
        #[arg(value_parser = parse_hex_u32)]
        addr: u32,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Read the signature of an AVR over ISP
    AvrSig,

    /// Switch the target to SWD and print its IDCODE
    SwdInit,

    /// Read an SWD register
    SwdRead {
        /// Access a debug port register instead of an access port
        #[arg(long)]
        dp: bool,

        /// Access port index (ignored with --dp)
        #[arg(value_parser = parse_hex_u8)]
        ap: u8,

        /// Register address
        #[arg(value_parser = parse_hex_u8)]
        addr: u8,
    },

    /// Write an SWD register
    SwdWrite {
        /// Access a debug port register instead of an access port
        #[arg(long)]
        dp: bool,

        /// Access port index (ignored with --dp)
        #[arg(value_parser = parse_hex_u8)]
        ap: u8,

        /// Register address
        #[arg(value_parser = parse_hex_u8)]
        addr: u8,

        /// Value to write
        #[arg(value_parser = parse_hex_u32)]
        value: u32,
    },
}
