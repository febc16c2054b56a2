//! Command handlers for each bus
//!
//! One [`Driver`](crate::Driver) per command range of
//! [`protocol::cmd`](crate::protocol::cmd). Each handler is generic over the
//! `embedded-hal` traits (or the [`QspiPins`](crate::qspi::QspiPins) /
//! [`SwdPins`](crate::swd::SwdPins) collaborators) it drives, so the same
//! code runs on the probe and against the simulated peripherals.

mod bootloader;
mod i2c;
mod isp;
mod qspi;
mod spi;
mod swd;
mod system;

pub use bootloader::BootloaderDriver;
pub use i2c::I2cDriver;
pub use isp::IspDriver;
pub use qspi::{QspiDriver, MAX_PAGES, MAX_RAW_LEN, PAGE_SIZE};
pub use spi::SpiDriver;
pub use swd::SwdDriver;
pub use system::{SystemDriver, CAPABILITIES, PING_REPLY};

#[cfg(test)]
pub(crate) mod tests {
    use std::vec;
    use std::vec::Vec;

    use super::*;
    use crate::driver::{DeferredAction, Driver, Response};
    use crate::error::{CommandError, ErrorCode};
    use crate::hal::GpioLevels;
    use crate::protocol::{cmd, encode_frame, Event, Flags, FrameParser, ProtocolEngine, MAX_FRAME, MAX_PAYLOAD};
    use crate::qspi::QspiEngine;
    use crate::sim::{
        NoDelay, SimAvr, SimBoard, SimEeprom, SimFlash, SimFlashConfig, SimLed, SimPin,
        SimSpiFlash, SimTarget, SIM_IDCODE,
    };
    use crate::swd::SwdEngine;

    /// Run one command against a driver, outside the protocol engine
    pub(crate) fn call(
        driver: &mut dyn Driver,
        command: u8,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Option<DeferredAction>), CommandError> {
        let mut buf = [0u8; MAX_PAYLOAD];
        let mut response = Response::new(&mut buf);
        driver.handle_command(command, payload, &mut response)?;
        Ok((response.as_slice().to_vec(), response.deferred()))
    }

    #[derive(Default)]
    struct Sink {
        data: Vec<u8>,
    }

    impl embedded_io::ErrorType for Sink {
        type Error = core::convert::Infallible;
    }

    impl embedded_io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> core::result::Result<(), Self::Error> {
            Ok(())
        }
    }

    fn frame(sequence: u8, command: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; MAX_FRAME];
        let len = encode_frame(sequence, command, Flags::empty(), payload, &mut out).unwrap();
        out.truncate(len);
        out
    }

    /// (sequence, flags, payload) of every reply frame
    fn replies(bytes: &[u8]) -> Vec<(u8, Flags, Vec<u8>)> {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        for &byte in bytes {
            if let Some(Event::Packet(p)) = parser.push(byte) {
                out.push((p.sequence, p.flags, p.payload.to_vec()));
            }
        }
        out
    }

    /// Every driver on simulated hardware, registered on its command range
    struct Probe {
        system: SystemDriver<SimBoard>,
        i2c: I2cDriver<SimEeprom>,
        spi: SpiDriver<SimSpiFlash>,
        qspi: QspiDriver<SimFlash, NoDelay>,
        isp: IspDriver<SimAvr, SimPin, NoDelay>,
        swd: SwdDriver<SimTarget, NoDelay>,
        bootloader: BootloaderDriver,
    }

    impl Probe {
        fn new() -> Self {
            let board = SimBoard {
                uptime_ms: 1234,
                free_memory: 0x8000,
                levels: GpioLevels {
                    cs: true,
                    sck: false,
                    io: [false, true, true, true],
                },
            };
            let mut data = vec![0xFFu8; 4096];
            data[..4].copy_from_slice(b"UNIP");
            Self {
                system: SystemDriver::new(board),
                i2c: I2cDriver::new(SimEeprom::default()),
                spi: SpiDriver::new(SimSpiFlash::new([0xC2, 0x20, 0x17])),
                qspi: QspiDriver::new(QspiEngine::new(
                    SimFlash::with_data(SimFlashConfig::default(), &data),
                    NoDelay,
                )),
                isp: IspDriver::new(SimAvr::new(), SimPin::new(false), NoDelay),
                swd: SwdDriver::new(SwdEngine::new(SimTarget::new(), NoDelay)),
                bootloader: BootloaderDriver,
            }
        }

        fn engine(&mut self) -> ProtocolEngine<'_, SimLed> {
            let mut engine = ProtocolEngine::new(SimLed::default());
            engine.register(cmd::SYSTEM_RANGE.0, cmd::SYSTEM_RANGE.1, &mut self.system).unwrap();
            engine.register(cmd::I2C_RANGE.0, cmd::I2C_RANGE.1, &mut self.i2c).unwrap();
            engine.register(cmd::SPI_RANGE.0, cmd::SPI_RANGE.1, &mut self.spi).unwrap();
            engine.register(cmd::QSPI_RANGE.0, cmd::QSPI_RANGE.1, &mut self.qspi).unwrap();
            engine.register(cmd::ISP_RANGE.0, cmd::ISP_RANGE.1, &mut self.isp).unwrap();
            engine.register(cmd::SWD_RANGE.0, cmd::SWD_RANGE.1, &mut self.swd).unwrap();
            engine
                .register(cmd::BOOTLOADER_RANGE.0, cmd::BOOTLOADER_RANGE.1, &mut self.bootloader)
                .unwrap();
            engine.initialize_all().unwrap();
            engine
        }
    }

    #[test]
    fn test_session_across_all_drivers() {
        let mut probe = Probe::new();
        let mut engine = probe.engine();
        assert_eq!(engine.registry().len(), 7);

        let mut input = Vec::new();
        input.extend(frame(1, cmd::PING, &[]));
        input.extend(frame(2, cmd::GET_STATUS, &[]));
        input.extend(frame(3, cmd::I2C_SCAN, &[]));
        input.extend(frame(4, cmd::SPI_SCAN, &[]));
        input.extend(frame(5, cmd::QSPI_SET_MODE, &[4]));
        input.extend(frame(6, cmd::QSPI_FAST_READ, &[0, 0, 0, 1]));
        input.extend(frame(7, cmd::ISP_ENTER, &[]));
        input.extend(frame(8, cmd::ISP_XFER, &[0x30, 0x00, 0x01, 0x00]));
        input.extend(frame(9, cmd::SWD_INIT, &[]));
        input.extend(frame(10, cmd::GPIO_TEST, &[]));

        let mut sink = Sink::default();
        assert_eq!(engine.feed(&input, &mut sink).unwrap(), input.len());
        assert_eq!(engine.take_deferred(), None);

        let out = replies(&sink.data);
        assert_eq!(out.len(), 10);
        for (i, (sequence, flags, _)) in out.iter().enumerate() {
            assert_eq!(*sequence as usize, i + 1);
            assert_eq!(*flags, Flags::RESPONSE);
        }
        assert_eq!(out[0].2, PING_REPLY);
        assert_eq!(out[1].2, [0, 0xD2, 0x04, 0, 0, 0x00, 0x80, 0, 0]);
        assert_eq!(out[2].2, [1, 0x50]);
        assert_eq!(out[3].2, [1, 0xC2, 0x20, 0x17]);
        assert_eq!(out[4].2, [4]);
        assert_eq!(out[5].2.len(), 256);
        assert_eq!(out[5].2[..4], *b"UNIP");
        assert!(out[6].2.is_empty());
        assert_eq!(out[7].2[3], 0x95);
        assert_eq!(out[8].2, SIM_IDCODE.to_le_bytes());
        assert_eq!(out[9].2, [1, 0, 0, 1, 1, 1]);

        assert_eq!(engine.status_mut().pulses, 10);
    }

    #[test]
    fn test_driver_errors_come_back_as_error_packets() {
        let mut probe = Probe::new();
        let mut engine = probe.engine();

        let mut input = Vec::new();
        input.extend(frame(1, cmd::QSPI_SET_MODE, &[9]));
        input.extend(frame(2, cmd::I2C_READ, &[0x20, 1, 0]));
        input.extend(frame(3, 0x4F, &[]));
        input.extend(frame(4, 0x7F, &[]));

        let mut sink = Sink::default();
        engine.feed(&input, &mut sink).unwrap();
        let out = replies(&sink.data);
        let codes: Vec<u8> = out.iter().map(|(_, _, p)| p[0]).collect();
        assert_eq!(
            codes,
            [
                ErrorCode::InvalidParameter as u8,
                ErrorCode::BusError as u8,
                ErrorCode::UnknownCommand as u8,
                ErrorCode::UnknownCommand as u8,
            ]
        );
        assert!(out.iter().all(|(_, f, _)| *f == Flags::RESPONSE | Flags::ERROR));
    }

    #[test]
    fn test_bootloader_stops_consuming_input() {
        let mut probe = Probe::new();
        let mut engine = probe.engine();

        let first = frame(1, cmd::BOOTLOADER, &[]);
        let mut input = first.clone();
        input.extend(frame(2, cmd::PING, &[]));

        let mut sink = Sink::default();
        assert_eq!(engine.feed(&input, &mut sink).unwrap(), first.len());
        assert_eq!(engine.take_deferred(), Some(DeferredAction::Bootloader));
        let out = replies(&sink.data);
        assert_eq!(out.len(), 1);
        assert!(out[0].2.is_empty());
    }
}
