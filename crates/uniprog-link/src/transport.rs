//! Byte transports between the host and the probe

use crate::error::{LinkError, Result};

/// Transport trait for reading and writing bytes
pub trait Transport {
    /// Write all of `data`
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`
    ///
    /// Returns the number of bytes read, or 0 on timeout.
    fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        (**self).read_nonblock(buf, timeout_ms)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

pub mod serial {
    //! USB CDC-ACM / serial port transport

    use super::*;
    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;

    /// Baud rate used when none is given; CDC-ACM ignores it
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port, 8N1 without flow control
        pub fn open(device: &str, baud: Option<u32>) -> Result<Self> {
            let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

            let port = serialport::new(device, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_secs(1))
                .open()
                .map_err(|e| LinkError::ConnectionFailed(format!("{}: {}", device, e)))?;

            log::info!("Opened serial port {} at {} baud", device, baud_rate);

            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            self.port
                .set_timeout(Duration::from_millis(timeout_ms as u64))?;

            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(LinkError::from(e)),
            }
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }
    }
}

#[cfg(feature = "sim")]
pub mod sim {
    //! In-process probe running on simulated hardware
    //!
    //! The device side runs the real protocol engine and drivers on a
    //! dedicated thread; bytes cross over channels the same way they would
    //! cross USB.

    use std::collections::VecDeque;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use uniprog_core::drivers::{
        BootloaderDriver, I2cDriver, IspDriver, QspiDriver, SpiDriver, SwdDriver, SystemDriver,
    };
    use uniprog_core::hal::{Board, GpioLevels};
    use uniprog_core::protocol::{cmd, ProtocolEngine};
    use uniprog_core::qspi::QspiEngine;
    use uniprog_core::sim::{
        NoDelay, SimAvr, SimEeprom, SimFlash, SimFlashConfig, SimPin, SimSpiFlash, SimTarget,
    };
    use uniprog_core::swd::SwdEngine;
    use uniprog_core::DeferredAction;

    use super::*;

    /// JEDEC ID answered by the simulated SPI flash
    pub const SIM_SPI_ID: [u8; 3] = [0xC2, 0x20, 0x17];

    /// Board services backed by the host clock
    struct HostBoard {
        start: Instant,
    }

    impl Board for HostBoard {
        fn uptime_ms(&self) -> u32 {
            self.start.elapsed().as_millis() as u32
        }

        fn free_memory(&self) -> u32 {
            // not tracked on the host
            0
        }

        fn gpio_levels(&mut self) -> GpioLevels {
            GpioLevels {
                cs: true,
                sck: false,
                io: [false, true, true, true],
            }
        }
    }

    /// Every driver, each on its simulated peripheral
    struct SimProbe {
        system: SystemDriver<HostBoard>,
        i2c: I2cDriver<SimEeprom>,
        spi: SpiDriver<SimSpiFlash>,
        qspi: QspiDriver<SimFlash, NoDelay>,
        isp: IspDriver<SimAvr, SimPin, NoDelay>,
        swd: SwdDriver<SimTarget, NoDelay>,
        bootloader: BootloaderDriver,
    }

    impl SimProbe {
        fn new(flash: SimFlashConfig) -> Self {
            Self {
                system: SystemDriver::new(HostBoard {
                    start: Instant::now(),
                }),
                i2c: I2cDriver::new(SimEeprom::default()),
                spi: SpiDriver::new(SimSpiFlash::new(SIM_SPI_ID)),
                qspi: QspiDriver::new(QspiEngine::new(SimFlash::new(flash), NoDelay)),
                isp: IspDriver::new(SimAvr::new(), SimPin::new(false), NoDelay),
                swd: SwdDriver::new(SwdEngine::new(SimTarget::new(), NoDelay)),
                bootloader: BootloaderDriver,
            }
        }

        fn engine(&mut self) -> uniprog_core::Result<ProtocolEngine<'_>> {
            let mut engine = ProtocolEngine::new(());
            engine.register(cmd::SYSTEM_RANGE.0, cmd::SYSTEM_RANGE.1, &mut self.system)?;
            engine.register(cmd::I2C_RANGE.0, cmd::I2C_RANGE.1, &mut self.i2c)?;
            engine.register(cmd::SPI_RANGE.0, cmd::SPI_RANGE.1, &mut self.spi)?;
            engine.register(cmd::QSPI_RANGE.0, cmd::QSPI_RANGE.1, &mut self.qspi)?;
            engine.register(cmd::ISP_RANGE.0, cmd::ISP_RANGE.1, &mut self.isp)?;
            engine.register(cmd::SWD_RANGE.0, cmd::SWD_RANGE.1, &mut self.swd)?;
            engine.register(
                cmd::BOOTLOADER_RANGE.0,
                cmd::BOOTLOADER_RANGE.1,
                &mut self.bootloader,
            )?;
            engine.initialize_all()?;
            Ok(engine)
        }
    }

    /// Collects reply bytes and hands them over on flush
    struct ReplySink<'a> {
        pending: Vec<u8>,
        replies: &'a Sender<Vec<u8>>,
    }

    impl embedded_io::ErrorType for ReplySink<'_> {
        type Error = embedded_io::ErrorKind;
    }

    impl embedded_io::Write for ReplySink<'_> {
        fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, Self::Error> {
            self.pending.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::result::Result<(), Self::Error> {
            if self.pending.is_empty() {
                return Ok(());
            }
            self.replies
                .send(std::mem::take(&mut self.pending))
                .map_err(|_| embedded_io::ErrorKind::BrokenPipe)
        }
    }

    fn run_device(flash: SimFlashConfig, requests: Receiver<Vec<u8>>, replies: Sender<Vec<u8>>) {
        let mut probe = SimProbe::new(flash);
        let mut engine = match probe.engine() {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("Simulated probe failed to start: {}", e);
                return;
            }
        };
        let mut sink = ReplySink {
            pending: Vec::new(),
            replies: &replies,
        };

        while let Ok(bytes) = requests.recv() {
            let mut data = &bytes[..];
            while !data.is_empty() {
                let consumed = match engine.feed(data, &mut sink) {
                    Ok(n) => n,
                    // host side went away
                    Err(_) => return,
                };
                data = &data[consumed..];

                match engine.take_deferred() {
                    Some(DeferredAction::Reset) => {
                        log::info!("Simulated probe reset");
                        if let Err(e) = engine.initialize_all() {
                            log::warn!("Re-initialization failed: {}", e);
                        }
                        // input in flight is lost across a reboot
                        break;
                    }
                    Some(DeferredAction::Bootloader) => {
                        log::info!("Simulated probe left for the bootloader");
                        return;
                    }
                    None => {}
                }
            }
        }
    }

    /// Transport to a simulated probe on a background thread
    pub struct SimTransport {
        requests: Option<Sender<Vec<u8>>>,
        replies: Receiver<Vec<u8>>,
        pending: VecDeque<u8>,
        device: Option<JoinHandle<()>>,
    }

    impl SimTransport {
        /// Start a probe with the default simulated QSPI flash
        pub fn spawn() -> Result<Self> {
            Self::with_flash(SimFlashConfig::default())
        }

        /// Start a probe whose QSPI flash uses `flash`
        pub fn with_flash(flash: SimFlashConfig) -> Result<Self> {
            let (request_tx, request_rx) = mpsc::channel();
            let (reply_tx, reply_rx) = mpsc::channel();
            let device = thread::Builder::new()
                .name("uniprog-sim".into())
                .spawn(move || run_device(flash, request_rx, reply_tx))
                .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;
            log::info!("Started simulated probe");

            Ok(Self {
                requests: Some(request_tx),
                replies: reply_rx,
                pending: VecDeque::new(),
                device: Some(device),
            })
        }
    }

    impl Transport for SimTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            let requests = self
                .requests
                .as_ref()
                .ok_or_else(|| LinkError::Io("simulated probe closed".into()))?;
            requests
                .send(data.to_vec())
                .map_err(|_| LinkError::Io("simulated probe disconnected".into()))
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            if self.pending.is_empty() {
                match self
                    .replies
                    .recv_timeout(Duration::from_millis(timeout_ms as u64))
                {
                    Ok(bytes) => self.pending.extend(bytes),
                    Err(RecvTimeoutError::Timeout) => return Ok(0),
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(LinkError::Io("simulated probe disconnected".into()))
                    }
                }
            }
            let n = buf.len().min(self.pending.len());
            for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Drop for SimTransport {
        fn drop(&mut self) {
            // closing the request channel stops the device loop
            self.requests.take();
            if let Some(device) = self.device.take() {
                let _ = device.join();
            }
        }
    }
}
