//! Board services: status LED, uptime, RAM headroom and the SPI flash port

use embassy_rp::gpio::Output;
use embassy_rp::peripherals::SPI1;
use embassy_rp::spi::{self, Blocking, Spi};
use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Mode, Operation, Phase, Polarity, SpiBus, SpiDevice};
use uniprog_core::hal::{Board, GpioLevels, SpiPort, Status, StatusIndicator};

use crate::pins::CycleDelay;

/// GPIO numbers of the flash interface, sampled by the GPIO test
const QSPI_CS: u32 = 17;
const QSPI_SCK: u32 = 18;
const QSPI_IO: [u32; 4] = [19, 16, 21, 22];

extern "C" {
    /// First free RAM address after `.bss`/`.uninit`, from cortex-m-rt
    static __sheap: u32;
}

/// Uptime, free RAM and raw line sampling
pub struct PicoBoard;

impl Board for PicoBoard {
    fn uptime_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn free_memory(&self) -> u32 {
        // No heap: everything between the end of static data and the stack
        // pointer is unused
        let heap_start = core::ptr::addr_of!(__sheap) as u32;
        cortex_m::register::msp::read().saturating_sub(heap_start)
    }

    fn gpio_levels(&mut self) -> GpioLevels {
        // Reads the input register directly so pin ownership and direction
        // stay with the QSPI engine
        let levels = embassy_rp::pac::SIO.gpio_in().read();
        let bit = |n: u32| levels & (1 << n) != 0;
        GpioLevels {
            cs: bit(QSPI_CS),
            sck: bit(QSPI_SCK),
            io: QSPI_IO.map(bit),
        }
    }
}

/// Activity LED on GPIO 25
pub struct ActivityLed {
    led: Output<'static>,
    error: bool,
}

impl ActivityLed {
    /// Wrap the LED pin
    pub fn new(led: Output<'static>) -> Self {
        Self { led, error: false }
    }
}

impl StatusIndicator for ActivityLed {
    fn set_activity(&mut self, active: bool) {
        if active {
            self.led.set_high();
        } else if !self.error {
            self.led.set_low();
        }
    }

    fn set_status(&mut self, status: Status) {
        match status {
            // stays lit until a command succeeds
            Status::Error => {
                self.error = true;
                self.led.set_high();
            }
            Status::Success | Status::Idle => {
                self.error = false;
                self.led.set_low();
            }
            Status::Busy | Status::Connected | Status::Disconnected => {}
        }
    }
}

/// SPI1 plus its chip select, reconfigurable at runtime
pub struct SpiFlashPort {
    bus: Spi<'static, SPI1, Blocking>,
    cs: Output<'static>,
}

impl SpiFlashPort {
    /// Combine the bus with an idle-high chip select
    pub fn new(bus: Spi<'static, SPI1, Blocking>, cs: Output<'static>) -> Self {
        Self { bus, cs }
    }

    fn run(&mut self, operation: &mut Operation<'_, u8>) -> Result<(), spi::Error> {
        match operation {
            Operation::Read(buf) => self.bus.blocking_read(buf),
            Operation::Write(buf) => self.bus.blocking_write(buf),
            Operation::Transfer(read, write) => self.bus.blocking_transfer(read, write),
            Operation::TransferInPlace(buf) => self.bus.blocking_transfer_in_place(buf),
            Operation::DelayNs(ns) => {
                CycleDelay.delay_ns(*ns);
                Ok(())
            }
        }
    }
}

impl ErrorType for SpiFlashPort {
    type Error = spi::Error;
}

impl SpiDevice for SpiFlashPort {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        self.cs.set_low();
        let mut result = Ok(());
        for operation in operations.iter_mut() {
            result = self.run(operation);
            if result.is_err() {
                break;
            }
        }
        let flushed = SpiBus::flush(&mut self.bus);
        self.cs.set_high();
        result.and(flushed)
    }
}

impl SpiPort for SpiFlashPort {
    fn configure(&mut self, mode: Mode, frequency_hz: u32) -> Result<(), Self::Error> {
        let mut config = spi::Config::default();
        config.frequency = frequency_hz;
        config.polarity = match mode.polarity {
            Polarity::IdleLow => spi::Polarity::IdleLow,
            Polarity::IdleHigh => spi::Polarity::IdleHigh,
        };
        config.phase = match mode.phase {
            Phase::CaptureOnFirstTransition => spi::Phase::CaptureOnFirstTransition,
            Phase::CaptureOnSecondTransition => spi::Phase::CaptureOnSecondTransition,
        };
        self.bus.set_config(&config);
        defmt::debug!("SPI1 reconfigured to {} Hz", frequency_hz);
        Ok(())
    }
}
