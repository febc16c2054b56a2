//! uniprog - host tool for the uniprog multi-protocol debug probe
//!
//! Talks to the probe over its framed USB CDC protocol. One binary covers
//! every bus the probe drives:
//! - **System**: ping, capabilities, status, line sampling, reset
//! - **I2C / SPI**: bus scans and raw transfers
//! - **QSPI**: mode and clock control, raw commands, NOR flash read/erase/write
//! - **ISP**: AVR signature read
//! - **SWD**: debug and access port register access
//!
//! `--port sim` runs the same firmware logic against simulated peripherals.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;
use uniprog_link::Connection;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {} // default (warn)
        1 => log::set_max_level(log::LevelFilter::Info),
        2 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> commands::CmdResult {
    let connection = Connection::parse(&cli.port)?;
    let mut probe = connection.open_with_timeout(Duration::from_millis(cli.timeout_ms))?;
    log::debug!("Connected to {:?}", connection);

    let probe = &mut probe;
    match cli.command {
        Commands::Ping => commands::run_ping(probe),
        Commands::Caps => commands::run_caps(probe),
        Commands::Status => commands::run_status(probe),
        Commands::GpioTest => commands::run_gpio_test(probe),
        Commands::Reset => commands::run_reset(probe),
        Commands::Bootloader => commands::run_bootloader(probe),
        Commands::I2cScan => commands::run_i2c_scan(probe),
        Commands::I2cRead { addr, len } => commands::run_i2c_read(probe, addr, len),
        Commands::I2cWrite { addr, data } => commands::run_i2c_write(probe, addr, &data),
        Commands::SpiScan => commands::run_spi_scan(probe),
        Commands::SpiConfig { mode, hz } => commands::run_spi_config(probe, mode, hz),
        Commands::SpiXfer { data } => commands::run_spi_xfer(probe, &data),
        Commands::QspiMode { mode } => commands::run_qspi_mode(probe, mode),
        Commands::QspiClock { hz } => commands::run_qspi_clock(probe, hz),
        Commands::QspiCmd { cmd, data, len } => {
            commands::run_qspi_cmd(probe, cmd, data.as_deref(), len)
        }
        Commands::FlashId => commands::run_flash_id(probe),
        Commands::FlashRead { addr, len, output } => {
            commands::run_flash_read(probe, addr, len, &output)
        }
        Commands::FlashErase { addr } => commands::run_flash_erase(probe, addr),
        Commands::FlashWrite { addr, input } => commands::run_flash_write(probe, addr, &input),
        Commands::AvrSig => commands::run_avr_sig(probe),
        Commands::SwdInit => commands::run_swd_init(probe),
        Commands::SwdRead { dp, ap, addr } => commands::run_swd_read(probe, dp, ap, addr),
        Commands::SwdWrite {
            dp,
            ap,
            addr,
            value,
        } => commands::run_swd_write(probe, dp, ap, addr, value),
    }
}
