//! SWD bit-bang engine

use embedded_hal::delay::DelayNs;

use super::{
    check_ack, dp, parity, request, select_value, Port, SwdPins, INIT_IDLE_CLOCKS, JTAG_TO_SWD,
    LINE_RESET_CLOCKS,
};
use crate::error::{Result, SwdFailure};
use crate::hal::ClockTiming;

/// SWD bus settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SwdConfig {
    /// SWCLK timing
    pub timing: ClockTiming,
    /// Idle clocks (SWDIO low) after every transaction
    pub idle_cycles: u8,
}

impl SwdConfig {
    /// Use a different clock
    pub const fn with_timing(mut self, timing: ClockTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Use a different number of trailing idle clocks
    pub const fn with_idle_cycles(mut self, idle_cycles: u8) -> Self {
        self.idle_cycles = idle_cycles;
        self
    }
}

impl Default for SwdConfig {
    fn default() -> Self {
        Self {
            timing: ClockTiming::default(),
            idle_cycles: 2,
        }
    }
}

/// Bit-banged SWD host
///
/// The host changes SWDIO while SWCLK is low and raises the clock for the
/// target to sample; it samples target data while SWCLK is low, before the
/// next rising edge on which the target shifts its next bit.
///
/// WAIT and FAULT answers are reported, never retried.
pub struct SwdEngine<P, D> {
    pins: P,
    delay: D,
    config: SwdConfig,
}

impl<P: SwdPins, D: DelayNs> SwdEngine<P, D> {
    /// Create an engine with the default configuration
    pub fn new(pins: P, delay: D) -> Self {
        Self::with_config(pins, delay, SwdConfig::default())
    }

    /// Create an engine with an explicit configuration
    pub fn with_config(pins: P, delay: D, config: SwdConfig) -> Self {
        Self { pins, delay, config }
    }

    /// Current configuration
    pub fn config(&self) -> SwdConfig {
        self.config
    }

    /// The pins
    pub fn pins(&self) -> &P {
        &self.pins
    }

    /// The pins, mutably
    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// Give back the pins and the delay
    pub fn release(self) -> (P, D) {
        (self.pins, self.delay)
    }

    /// Switch the target to SWD and read its IDCODE
    ///
    /// Line reset, JTAG-to-SWD sequence, line reset, idle clocks, then a DP
    /// IDCODE read.
    pub fn init(&mut self) -> Result<u32> {
        self.pins.set_swclk(false);
        self.pins.swdio_output();
        critical_section::with(|_| {
            self.line_reset();
            self.write_bits(JTAG_TO_SWD as u32, 16);
            self.line_reset();
            self.write_bits(0, INIT_IDLE_CLOCKS);
        });
        let idcode = self.read_dp(dp::IDCODE)?;
        log::info!("SWD IDCODE 0x{:08X}", idcode);
        Ok(idcode)
    }

    /// Clock SWDIO high long enough for a line reset
    pub fn line_reset(&mut self) {
        self.pins.swdio_output();
        for _ in 0..LINE_RESET_CLOCKS {
            self.write_bit(true);
        }
    }

    /// Read a debug port register
    pub fn read_dp(&mut self, addr: u8) -> Result<u32> {
        self.transaction(Port::Dp, addr, None)
    }

    /// Write a debug port register
    pub fn write_dp(&mut self, addr: u8, value: u32) -> Result<()> {
        self.transaction(Port::Dp, addr, Some(value)).map(drop)
    }

    /// Read an access port register
    ///
    /// AP reads are posted: the first read returns stale data and the real
    /// value is fetched from DP RDBUFF.
    pub fn read_ap(&mut self, ap: u8, addr: u8) -> Result<u32> {
        self.write_dp(dp::SELECT, select_value(ap, addr))?;
        self.transaction(Port::Ap, addr, None)?;
        self.read_dp(dp::RDBUFF)
    }

    /// Write an access port register
    pub fn write_ap(&mut self, ap: u8, addr: u8, value: u32) -> Result<()> {
        self.write_dp(dp::SELECT, select_value(ap, addr))?;
        self.transaction(Port::Ap, addr, Some(value)).map(drop)
    }

    /// One request/ACK/data exchange; `value` is `Some` for writes
    fn transaction(&mut self, port: Port, addr: u8, value: Option<u32>) -> Result<u32> {
        let req = request(port, value.is_none(), addr);
        let result = critical_section::with(|_| self.exchange(req, value));
        if let Err(failure) = result {
            log::debug!("SWD request 0x{:02X} failed: {}", req, failure);
        }
        Ok(result?)
    }

    fn exchange(&mut self, req: u8, value: Option<u32>) -> core::result::Result<u32, SwdFailure> {
        self.pins.swdio_output();
        self.write_bits(req as u32, 8);
        self.turn_around();

        let ack = self.read_bits(3) as u8;
        if let Err(failure) = check_ack(ack) {
            self.turn_around();
            self.pins.swdio_output();
            self.idle();
            return Err(failure);
        }

        match value {
            None => {
                let data = self.read_bits(32);
                let parity_bit = self.read_bit();
                self.turn_around();
                self.pins.swdio_output();
                self.idle();
                if parity_bit != parity(data) {
                    return Err(SwdFailure::Parity);
                }
                Ok(data)
            }
            Some(data) => {
                self.turn_around();
                self.pins.swdio_output();
                self.write_bits(data, 32);
                self.write_bit(parity(data));
                self.idle();
                Ok(0)
            }
        }
    }

    /// One clock with SWDIO released
    fn turn_around(&mut self) {
        self.pins.swdio_input();
        self.clock();
    }

    fn idle(&mut self) {
        self.write_bits(0, self.config.idle_cycles);
    }

    fn half_period(&mut self) {
        self.delay.delay_ns(self.config.timing.half_period_ns);
    }

    fn clock(&mut self) {
        self.pins.set_swclk(false);
        self.half_period();
        self.pins.set_swclk(true);
        self.half_period();
    }

    fn write_bit(&mut self, bit: bool) {
        self.pins.set_swdio(bit);
        self.clock();
    }

    fn read_bit(&mut self) -> bool {
        self.pins.set_swclk(false);
        self.half_period();
        let bit = self.pins.read_swdio();
        self.pins.set_swclk(true);
        self.half_period();
        bit
    }

    /// LSB first
    fn write_bits(&mut self, value: u32, count: u8) {
        for i in 0..count {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// LSB first
    fn read_bits(&mut self, count: u8) -> u32 {
        let mut value = 0u32;
        for i in 0..count {
            if self.read_bit() {
                value |= 1 << i;
            }
        }
        value
    }
}
