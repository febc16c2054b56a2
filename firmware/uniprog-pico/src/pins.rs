//! GPIO-backed pin sets for the bit-banged QSPI and SWD engines
//!
//! ## Pin Assignments
//!
//! | Pin  | Function            |
//! |------|---------------------|
//! | GP16 | QSPI IO1 (MISO)     |
//! | GP17 | QSPI CS             |
//! | GP18 | QSPI SCK            |
//! | GP19 | QSPI IO0 (MOSI)     |
//! | GP21 | QSPI IO2 (WP#)      |
//! | GP22 | QSPI IO3 (HOLD#)    |
//! | GP2  | SWCLK               |
//! | GP3  | SWDIO               |

use embassy_rp::gpio::{Flex, Level, Output, Pin, Pull};
use embassy_rp::Peri;
use embedded_hal::delay::DelayNs;
use uniprog_core::qspi::QspiPins;
use uniprog_core::swd::SwdPins;

/// RP2040 default system clock
const SYS_CLK_HZ: u64 = 125_000_000;

/// Busy-wait delay counted in core cycles
///
/// The embassy timer ticks at 1 MHz, far too coarse for clock half-periods.
pub struct CycleDelay;

impl DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = u32::try_from(u64::from(ns) * SYS_CLK_HZ / 1_000_000_000).unwrap_or(u32::MAX);
        if cycles > 0 {
            cortex_m::asm::delay(cycles);
        }
    }
}

/// Flash interface on GPIO 16-22
pub struct FlexQspi {
    cs: Output<'static>,
    sck: Output<'static>,
    /// IO0..IO3
    io: [Flex<'static>; 4],
}

impl FlexQspi {
    /// Take the pins, leaving CS deasserted and the data lines as inputs
    pub fn new(
        cs: Peri<'static, impl Pin>,
        sck: Peri<'static, impl Pin>,
        io0: Peri<'static, impl Pin>,
        io1: Peri<'static, impl Pin>,
        io2: Peri<'static, impl Pin>,
        io3: Peri<'static, impl Pin>,
    ) -> Self {
        let mut io = [Flex::new(io0), Flex::new(io1), Flex::new(io2), Flex::new(io3)];
        for (i, pin) in io.iter_mut().enumerate() {
            pin.set_as_input();
            // WP# and HOLD# must idle high while undriven
            pin.set_pull(if i >= 2 { Pull::Up } else { Pull::None });
        }
        Self {
            cs: Output::new(cs, Level::High),
            sck: Output::new(sck, Level::Low),
            io,
        }
    }
}

impl QspiPins for FlexQspi {
    fn set_cs(&mut self, active: bool) {
        self.cs.set_level(if active { Level::Low } else { Level::High });
    }

    fn set_sck(&mut self, high: bool) {
        self.sck.set_level(Level::from(high));
    }

    fn set_io_direction(&mut self, outputs: u8) {
        for (i, pin) in self.io.iter_mut().enumerate() {
            if outputs & (1 << i) != 0 {
                pin.set_as_output();
            } else {
                pin.set_as_input();
            }
        }
    }

    fn write_io(&mut self, levels: u8) {
        for (i, pin) in self.io.iter_mut().enumerate() {
            pin.set_level(Level::from(levels & (1 << i) != 0));
        }
    }

    fn read_io(&mut self) -> u8 {
        self.io
            .iter()
            .enumerate()
            .fold(0, |acc, (i, pin)| acc | ((pin.is_high() as u8) << i))
    }
}

/// SWD lines on GPIO 2/3
pub struct FlexSwd {
    swclk: Output<'static>,
    swdio: Flex<'static>,
}

impl FlexSwd {
    /// Take the pins with SWDIO released
    pub fn new(swclk: Peri<'static, impl Pin>, swdio: Peri<'static, impl Pin>) -> Self {
        let mut swdio = Flex::new(swdio);
        swdio.set_pull(Pull::Up);
        swdio.set_as_input();
        Self {
            swclk: Output::new(swclk, Level::Low),
            swdio,
        }
    }
}

impl SwdPins for FlexSwd {
    fn set_swclk(&mut self, high: bool) {
        self.swclk.set_level(Level::from(high));
    }

    fn set_swdio(&mut self, high: bool) {
        self.swdio.set_level(Level::from(high));
    }

    fn read_swdio(&mut self) -> bool {
        self.swdio.is_high()
    }

    fn swdio_output(&mut self) {
        self.swdio.set_as_output();
    }

    fn swdio_input(&mut self) {
        self.swdio.set_as_input();
    }
}
