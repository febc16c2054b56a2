//! Collaborator traits consumed by the core
//!
//! The protocol engine and the drivers never touch hardware directly. The
//! board assembly supplies these traits (plus `embedded-hal` I2C/SPI/pin
//! traits) and the core only calls through them.

use embedded_hal::spi::{Mode, SpiDevice};

use crate::error::{Error, Result};

/// Probe state shown on the status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Waiting for commands
    Idle,
    /// Command in progress
    Busy,
    /// Last command succeeded
    Success,
    /// Last command failed
    Error,
    /// Host connected
    Connected,
    /// Host disconnected
    Disconnected,
}

/// Status LED (or similar) notified around packet processing
///
/// Implementations must not fail; the core never depends on their effects.
pub trait StatusIndicator {
    /// Toggle the activity indication
    fn set_activity(&mut self, active: bool);
    /// Show a status
    fn set_status(&mut self, status: Status);
}

/// No indicator attached
impl StatusIndicator for () {
    fn set_activity(&mut self, _active: bool) {}
    fn set_status(&mut self, _status: Status) {}
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for &mut T {
    fn set_activity(&mut self, active: bool) {
        (**self).set_activity(active)
    }

    fn set_status(&mut self, status: Status) {
        (**self).set_status(status)
    }
}

/// Raw levels of the flash interface lines, as read back by the GPIO test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioLevels {
    /// Chip select
    pub cs: bool,
    /// Clock
    pub sck: bool,
    /// IO0..IO3 (MOSI, MISO, WP, HOLD in single-wire mode)
    pub io: [bool; 4],
}

impl GpioLevels {
    /// Wire order: CS, SCK, IO0, IO1, IO2, IO3
    pub fn to_bytes(self) -> [u8; 6] {
        [
            self.cs as u8,
            self.sck as u8,
            self.io[0] as u8,
            self.io[1] as u8,
            self.io[2] as u8,
            self.io[3] as u8,
        ]
    }
}

/// Board services used by the system driver
pub trait Board {
    /// Milliseconds since boot (wrapping)
    fn uptime_ms(&self) -> u32;
    /// Free RAM in bytes, best effort
    fn free_memory(&self) -> u32;
    /// Sample the flash interface lines without changing their direction
    fn gpio_levels(&mut self) -> GpioLevels;
}

impl<T: Board + ?Sized> Board for &mut T {
    fn uptime_ms(&self) -> u32 {
        (**self).uptime_ms()
    }

    fn free_memory(&self) -> u32 {
        (**self).free_memory()
    }

    fn gpio_levels(&mut self) -> GpioLevels {
        (**self).gpio_levels()
    }
}

/// SPI device whose clock and mode can be changed at runtime
pub trait SpiPort: SpiDevice {
    /// Apply a new SPI mode and clock frequency
    fn configure(&mut self, mode: Mode, frequency_hz: u32) -> core::result::Result<(), Self::Error>;
}

impl<T: SpiPort + ?Sized> SpiPort for &mut T {
    fn configure(&mut self, mode: Mode, frequency_hz: u32) -> core::result::Result<(), Self::Error> {
        (**self).configure(mode, frequency_hz)
    }
}

/// Clock half-period used by the bit-banged engines
///
/// This is the only timing knob: protocol logic never depends on it, the
/// delay primitive just waits this long between clock edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockTiming {
    /// Nanoseconds between a clock edge and the next one
    pub half_period_ns: u32,
}

impl ClockTiming {
    /// Default bit-bang clock (1 MHz)
    pub const DEFAULT_HZ: u32 = 1_000_000;

    /// Timing for the fastest clock not exceeding `hz`
    pub const fn from_hz(hz: u32) -> Result<Self> {
        if hz == 0 {
            return Err(Error::InvalidClock);
        }
        let half_period_ns = 500_000_000u32.div_ceil(hz);
        Ok(Self { half_period_ns })
    }

    /// Resulting clock frequency
    pub const fn hz(&self) -> u32 {
        if self.half_period_ns == 0 {
            return u32::MAX;
        }
        500_000_000 / self.half_period_ns
    }
}

impl Default for ClockTiming {
    fn default() -> Self {
        Self {
            half_period_ns: 500_000_000 / Self::DEFAULT_HZ,
        }
    }
}
