//! uniprog probe firmware for Raspberry Pi Pico
//!
//! Serves the uniprog framed protocol over USB CDC-ACM. Every bus the probe
//! speaks is a `uniprog-core` driver bound to RP2040 peripherals:
//!
//! | Bus      | Peripheral | Pins                                   |
//! |----------|------------|----------------------------------------|
//! | QSPI     | GPIO       | CS 17, SCK 18, IO0 19, IO1 16, IO2 21, IO3 22 |
//! | SWD      | GPIO       | SWCLK 2, SWDIO 3                       |
//! | I2C      | I2C0       | SDA 4, SCL 5                           |
//! | SPI      | SPI1       | SCK 10, MOSI 11, MISO 12, CS 13        |
//! | AVR ISP  | SPI0       | SCK 6, MOSI 7, MISO 0, RESET 14        |
//! | LED      | GPIO       | 25                                     |

#![no_std]
#![no_main]

mod board;
mod logger;
mod pins;

use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::peripherals::{I2C0, SPI0, USB};
use embassy_rp::spi::{self, Blocking, Spi};
use embassy_rp::usb::{Driver, InterruptHandler as UsbInterruptHandler};
use embassy_time::{Delay, Timer};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, UsbDevice};
use heapless::Vec;
use static_cell::{ConstStaticCell, StaticCell};
use uniprog_core::drivers::{
    BootloaderDriver, I2cDriver, IspDriver, QspiDriver, SpiDriver, SwdDriver, SystemDriver,
};
use uniprog_core::hal::{Status, StatusIndicator};
use uniprog_core::protocol::{cmd, ProtocolEngine, MAX_FRAME};
use uniprog_core::qspi::QspiEngine;
use uniprog_core::swd::SwdEngine;
use uniprog_core::DeferredAction;
use {defmt_rtt as _, panic_probe as _};

use crate::board::{ActivityLed, PicoBoard, SpiFlashPort};
use crate::pins::{CycleDelay, FlexQspi, FlexSwd};

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => UsbInterruptHandler<USB>;
});

type AppDriver = Driver<'static, USB>;
type Serial = CdcAcmClass<'static, AppDriver>;

/// pid.codes test VID/PID
const USB_VID: u16 = 0x1209;
const USB_PID: u16 = 0x0001;

/// USB Full Speed max packet size
const MAX_PACKET: usize = 64;

/// AVR ISP clock; must stay below a quarter of the target's clock
const ISP_CLOCK_HZ: u32 = 100_000;

/// Default hardware SPI clock
const SPI_CLOCK_HZ: u32 = 1_000_000;

static CONFIG_DESCRIPTOR: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static BOS_DESCRIPTOR: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static CONTROL_BUF: ConstStaticCell<[u8; 64]> = ConstStaticCell::new([0; 64]);
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

/// Every driver, bound to its peripheral
struct Drivers {
    system: SystemDriver<PicoBoard>,
    i2c: I2cDriver<I2c<'static, I2C0, i2c::Blocking>>,
    spi: SpiDriver<SpiFlashPort>,
    qspi: QspiDriver<FlexQspi, CycleDelay>,
    isp: IspDriver<Spi<'static, SPI0, Blocking>, Output<'static>, Delay>,
    swd: SwdDriver<FlexSwd, CycleDelay>,
    bootloader: BootloaderDriver,
}

/// Reply frames waiting to go out over USB
struct TxBuffer(Vec<u8, MAX_FRAME>);

impl embedded_io::ErrorType for TxBuffer {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io::Write for TxBuffer {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0
            .extend_from_slice(buf)
            .map_err(|_| embedded_io::ErrorKind::OutOfMemory)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn usb_config() -> embassy_usb::Config<'static> {
    let mut config = embassy_usb::Config::new(USB_VID, USB_PID);
    config.manufacturer = Some("uniprog");
    config.product = Some("uniprog-pico");
    config.serial_number = Some("00000001");
    config.max_power = 100;
    config.max_packet_size_0 = MAX_PACKET as u8;

    // Required for composite devices with IADs (Interface Association Descriptors)
    config.device_class = 0xEF; // Miscellaneous
    config.device_sub_class = 0x02; // Common Class
    config.device_protocol = 0x01; // IAD

    config
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    logger::init();
    info!("uniprog-pico starting...");

    let p = embassy_rp::init(Default::default());

    let qspi = QspiDriver::new(QspiEngine::new(
        FlexQspi::new(p.PIN_17, p.PIN_18, p.PIN_19, p.PIN_16, p.PIN_21, p.PIN_22),
        CycleDelay,
    ));
    let swd = SwdDriver::new(SwdEngine::new(FlexSwd::new(p.PIN_2, p.PIN_3), CycleDelay));

    let i2c = I2c::new_blocking(p.I2C0, p.PIN_5, p.PIN_4, i2c::Config::default());

    let mut spi_config = spi::Config::default();
    spi_config.frequency = SPI_CLOCK_HZ;
    let spi1 = Spi::new_blocking(p.SPI1, p.PIN_10, p.PIN_11, p.PIN_12, spi_config);
    let spi_port = SpiFlashPort::new(spi1, Output::new(p.PIN_13, Level::High));

    let mut isp_config = spi::Config::default();
    isp_config.frequency = ISP_CLOCK_HZ;
    let spi0 = Spi::new_blocking(p.SPI0, p.PIN_6, p.PIN_7, p.PIN_0, isp_config);
    // AVR RESET is active low; released until programming is enabled
    let isp_reset = Output::new(p.PIN_14, Level::High);

    let drivers = Drivers {
        system: SystemDriver::new(PicoBoard),
        i2c: I2cDriver::new(i2c),
        spi: SpiDriver::new(spi_port),
        qspi,
        isp: IspDriver::new(spi0, isp_reset, Delay),
        swd,
        bootloader: BootloaderDriver,
    };
    let led = ActivityLed::new(Output::new(p.PIN_25, Level::Low));

    // Initialize USB
    let driver = Driver::new(p.USB, Irqs);
    let mut builder = Builder::new(
        driver,
        usb_config(),
        CONFIG_DESCRIPTOR.take(),
        BOS_DESCRIPTOR.take(),
        &mut [],
        CONTROL_BUF.take(),
    );
    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), MAX_PACKET as u16);
    let usb = builder.build();

    spawner.must_spawn(usb_task(usb));
    spawner.must_spawn(probe_task(class, drivers, led));

    info!("uniprog-pico ready");
}

/// USB device task
#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, AppDriver>) {
    usb.run().await;
}

/// Protocol task: USB bytes in, replies out
#[embassy_executor::task]
async fn probe_task(mut class: Serial, mut drivers: Drivers, led: ActivityLed) {
    let mut engine = ProtocolEngine::new(led);
    let registered = [
        engine.register(cmd::SYSTEM_RANGE.0, cmd::SYSTEM_RANGE.1, &mut drivers.system),
        engine.register(cmd::I2C_RANGE.0, cmd::I2C_RANGE.1, &mut drivers.i2c),
        engine.register(cmd::SPI_RANGE.0, cmd::SPI_RANGE.1, &mut drivers.spi),
        engine.register(cmd::QSPI_RANGE.0, cmd::QSPI_RANGE.1, &mut drivers.qspi),
        engine.register(cmd::ISP_RANGE.0, cmd::ISP_RANGE.1, &mut drivers.isp),
        engine.register(cmd::SWD_RANGE.0, cmd::SWD_RANGE.1, &mut drivers.swd),
        engine.register(
            cmd::BOOTLOADER_RANGE.0,
            cmd::BOOTLOADER_RANGE.1,
            &mut drivers.bootloader,
        ),
    ];
    for result in registered {
        if let Err(e) = result {
            warn!("Driver registration failed: {}", e);
        }
    }
    if let Err(e) = engine.initialize_all() {
        warn!("Driver initialization failed: {}", e);
    }

    let mut tx = TxBuffer(Vec::new());
    loop {
        class.wait_connection().await;
        info!("Host connected");
        engine.status_mut().set_status(Status::Connected);

        match serve(&mut class, &mut engine, &mut tx).await {
            Ok(action) => run_deferred(action).await,
            Err(_) => {
                warn!("Host disconnected, waiting for reconnect...");
                engine.status_mut().set_status(Status::Disconnected);
            }
        }
    }
}

/// Feed the engine until the host goes away or a command asks for a reboot
async fn serve(
    class: &mut Serial,
    engine: &mut ProtocolEngine<'_, ActivityLed>,
    tx: &mut TxBuffer,
) -> Result<DeferredAction, EndpointError> {
    let mut buf = [0u8; MAX_PACKET];
    loop {
        let n = class.read_packet(&mut buf).await?;
        // one byte at a time bounds the pending output to a single frame
        for byte in &buf[..n] {
            if let Err(e) = engine.feed(core::slice::from_ref(byte), tx) {
                warn!("Reply dropped: {}", defmt::Debug2Format(&e));
                tx.0.clear();
            }
            if !tx.0.is_empty() {
                send(class, &tx.0).await?;
                tx.0.clear();
            }
            if let Some(action) = engine.take_deferred() {
                return Ok(action);
            }
        }
    }
}

async fn send(class: &mut Serial, data: &[u8]) -> Result<(), EndpointError> {
    for packet in data.chunks(MAX_PACKET) {
        class.write_packet(packet).await?;
    }
    // a full last packet needs a zero-length packet to end the transfer
    if data.len() % MAX_PACKET == 0 {
        class.write_packet(&[]).await?;
    }
    Ok(())
}

async fn run_deferred(action: DeferredAction) {
    info!("Running deferred {}", action);
    // let the last reply drain from the USB FIFO
    Timer::after_millis(20).await;
    match action {
        DeferredAction::Reset => cortex_m::peripheral::SCB::sys_reset(),
        DeferredAction::Bootloader => {
            embassy_rp::rom_data::reset_to_usb_boot(0, 0);
            cortex_m::peripheral::SCB::sys_reset()
        }
    }
}
