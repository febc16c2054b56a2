//! Simulated hardware for running the probe stack on a host
//!
//! Everything here implements the same collaborator traits the firmware
//! implements for real pins and peripherals, so the drivers and engines
//! run unchanged against it.

mod bus;
mod flash;
mod target;

pub use bus::{SimAvr, SimEeprom, SimSpiFlash};
pub use flash::{opcodes, SimFlash, SimFlashConfig, STATUS_BUSY, STATUS_WEL};
pub use target::{SimTarget, SIM_AP_IDR, SIM_IDCODE};

use core::convert::Infallible;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};

use crate::hal::{Board, GpioLevels, Status, StatusIndicator};

/// Delay that returns immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Output pin that remembers every level it was set to
#[derive(Debug, Clone, Default)]
pub struct SimPin {
    high: bool,
    history: Vec<bool>,
}

impl SimPin {
    /// A pin starting at `high`
    pub fn new(high: bool) -> Self {
        Self {
            high,
            history: Vec::new(),
        }
    }

    /// Current level
    pub fn is_high(&self) -> bool {
        self.high
    }

    /// Levels set so far, oldest first
    pub fn history(&self) -> &[bool] {
        &self.history
    }
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        self.history.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        self.history.push(true);
        Ok(())
    }
}

/// Board with settable uptime, free memory and line levels
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    /// Reported uptime
    pub uptime_ms: u32,
    /// Reported free memory
    pub free_memory: u32,
    /// Reported flash interface levels
    pub levels: GpioLevels,
}

impl Board for SimBoard {
    fn uptime_ms(&self) -> u32 {
        self.uptime_ms
    }

    fn free_memory(&self) -> u32 {
        self.free_memory
    }

    fn gpio_levels(&mut self) -> GpioLevels {
        self.levels
    }
}

/// Status indicator that records what it was told
#[derive(Debug, Clone, Default)]
pub struct SimLed {
    /// Activity currently on
    pub active: bool,
    /// Last status shown
    pub status: Option<Status>,
    /// Number of activity pulses
    pub pulses: u32,
}

impl StatusIndicator for SimLed {
    fn set_activity(&mut self, active: bool) {
        if active && !self.active {
            self.pulses += 1;
        }
        self.active = active;
    }

    fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }
}
