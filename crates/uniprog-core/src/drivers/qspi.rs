//! Bit-banged QSPI flash commands

use embedded_hal::delay::DelayNs;

use crate::driver::{Driver, Request, Response};
use crate::error::{CommandError, Result};
use crate::hal::ClockTiming;
use crate::protocol::{cmd, MAX_PAYLOAD};
use crate::qspi::{QspiEngine, QspiMode, QspiPins};

/// Bytes per page returned by FAST_READ
pub const PAGE_SIZE: usize = 256;

/// Pages a single FAST_READ may return
pub const MAX_PAGES: u8 = (MAX_PAYLOAD / PAGE_SIZE) as u8;

/// Largest data phase of a raw QSPI_CMD
pub const MAX_RAW_LEN: usize = 64;

/// Handler for the QSPI command range
pub struct QspiDriver<P, D> {
    engine: QspiEngine<P, D>,
}

impl<P: QspiPins, D: DelayNs> QspiDriver<P, D> {
    /// Wrap an engine
    pub fn new(engine: QspiEngine<P, D>) -> Self {
        Self { engine }
    }

    /// The engine
    pub fn engine(&self) -> &QspiEngine<P, D> {
        &self.engine
    }

    /// The engine, mutably
    pub fn engine_mut(&mut self) -> &mut QspiEngine<P, D> {
        &mut self.engine
    }

    /// Read `[addr_len][addr]` and validate the length
    fn address(req: &mut Request<'_>) -> core::result::Result<(u8, u32), CommandError> {
        let len = req.u8()?;
        if !matches!(len, 0 | 3 | 4) {
            return Err(CommandError::invalid_parameter("Invalid address length"));
        }
        Ok((len, req.uint(len as usize)?))
    }

    /// Opcode and optional address, with chip select already asserted
    fn header(&mut self, opcode: u8, addr_len: u8, addr: u32) -> Result<()> {
        self.engine.send_command(opcode);
        if addr_len > 0 {
            self.engine.send_address(addr, addr_len)?;
        }
        Ok(())
    }

    fn read(&mut self, payload: &[u8], response: &mut Response<'_>) -> core::result::Result<(), CommandError> {
        let mut req = Request::new(payload);
        let opcode = req.u8()?;
        let (addr_len, addr) = Self::address(&mut req)?;
        let dummy = req.u8()?;
        let len = req.u16()? as usize;
        if len > MAX_PAYLOAD {
            return Err(CommandError::invalid_parameter("Read too long"));
        }
        let buf = response.reserve(len)?;

        self.engine.cs_low();
        let result = self.header(opcode, addr_len, addr);
        if result.is_ok() {
            self.engine.send_dummy_cycles(dummy);
            self.engine.read_data(buf);
        }
        self.engine.cs_high();
        Ok(result?)
    }

    fn write(&mut self, payload: &[u8]) -> core::result::Result<(), CommandError> {
        let mut req = Request::new(payload);
        let opcode = req.u8()?;
        let (addr_len, addr) = Self::address(&mut req)?;
        let data = req.rest();

        self.engine.cs_low();
        let result = self.header(opcode, addr_len, addr);
        if result.is_ok() {
            self.engine.write_data(data);
        }
        self.engine.cs_high();
        Ok(result?)
    }

    fn fast_read(&mut self, payload: &[u8], response: &mut Response<'_>) -> core::result::Result<(), CommandError> {
        let mut req = Request::new(payload);
        let addr = req.uint(3)?;
        let pages = req.u8()?;
        if !(1..=MAX_PAGES).contains(&pages) {
            return Err(CommandError::invalid_parameter("Invalid page count"));
        }
        let buf = response.reserve(pages as usize * PAGE_SIZE)?;
        let (opcode, dummy) = self.engine.mode().fast_read();
        log::trace!("Fast read 0x{:06X} x{} pages ({})", addr, pages, self.engine.mode());

        self.engine.cs_low();
        let result = self.header(opcode, 3, addr);
        if result.is_ok() {
            self.engine.send_dummy_cycles(dummy);
            self.engine.read_data(buf);
        }
        self.engine.cs_high();
        Ok(result?)
    }

    fn raw(&mut self, payload: &[u8], response: &mut Response<'_>) -> core::result::Result<(), CommandError> {
        let mut req = Request::new(payload);
        let opcode = req.u8()?;
        let len = req.u8()? as usize;
        if len > MAX_RAW_LEN {
            return Err(CommandError::invalid_parameter("Data phase too long"));
        }
        let tx = req.rest();
        if !tx.is_empty() && tx.len() != len {
            return Err(CommandError::invalid_request("TX length mismatch"));
        }
        let qpi = self.engine.mode() == QspiMode::Qpi;

        self.engine.cs_low();
        self.engine.send_command(opcode);
        let result = match (tx.is_empty(), qpi) {
            (true, _) => response.reserve(len).map(|buf| self.engine.read_data(buf)),
            (false, true) => {
                self.engine.write_data(tx);
                Ok(())
            }
            (false, false) => response
                .reserve(len)
                .and_then(|buf| self.engine.transfer(tx, buf)),
        };
        self.engine.cs_high();
        Ok(result?)
    }
}

impl<P: QspiPins, D: DelayNs> Driver for QspiDriver<P, D> {
    fn name(&self) -> &'static str {
        "qspi"
    }

    fn initialize(&mut self) -> Result<()> {
        self.engine.init();
        Ok(())
    }

    fn handle_command(
        &mut self,
        command: u8,
        payload: &[u8],
        response: &mut Response<'_>,
    ) -> core::result::Result<(), CommandError> {
        match command {
            cmd::QSPI_SET_MODE => {
                let mode = QspiMode::from_u8(Request::new(payload).u8()?)?;
                self.engine.set_mode(mode);
                response.push(self.engine.mode() as u8)?;
            }
            cmd::QSPI_READ => self.read(payload, response)?,
            cmd::QSPI_WRITE => self.write(payload)?,
            cmd::QSPI_FAST_READ => self.fast_read(payload, response)?,
            cmd::QSPI_CMD => self.raw(payload, response)?,
            cmd::QSPI_ENTER_QPI => {
                self.engine.enter_qpi();
                response.push(self.engine.mode() as u8)?;
            }
            cmd::QSPI_EXIT_QPI => {
                self.engine.exit_qpi();
                response.push(self.engine.mode() as u8)?;
            }
            cmd::QSPI_SET_CLOCK => {
                let hz = Request::new(payload).u32()?;
                let timing = ClockTiming::from_hz(hz)?;
                self.engine.set_timing(timing);
                response.push_u32(timing.hz())?;
            }
            _ => return Err(CommandError::unknown_command()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::drivers::tests::call;
    use crate::error::ErrorCode;
    use crate::sim::{opcodes, NoDelay, SimFlash, SimFlashConfig};

    fn contents() -> Vec<u8> {
        (0..8192u32).map(|i| (i ^ (i >> 8)) as u8).collect()
    }

    fn driver() -> QspiDriver<SimFlash, NoDelay> {
        let flash = SimFlash::with_data(SimFlashConfig::default(), &contents());
        let mut qspi = QspiDriver::new(QspiEngine::new(flash, NoDelay));
        qspi.initialize().unwrap();
        qspi
    }

    fn flash(qspi: &QspiDriver<SimFlash, NoDelay>) -> &SimFlash {
        qspi.engine().pins()
    }

    #[test]
    fn test_set_mode() {
        let mut qspi = driver();
        let (reply, _) = call(&mut qspi, cmd::QSPI_SET_MODE, &[4]).unwrap();
        assert_eq!(reply, [4]);
        assert_eq!(qspi.engine().mode(), QspiMode::QuadIo);

        let err = call(&mut qspi, cmd::QSPI_SET_MODE, &[6]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        assert_eq!(qspi.engine().mode(), QspiMode::QuadIo);
    }

    #[test]
    fn test_fast_read_pages_in_every_mode() {
        let expected = contents();
        for mode in [0u8, 1, 2, 3, 4] {
            let mut qspi = driver();
            call(&mut qspi, cmd::QSPI_SET_MODE, &[mode]).unwrap();
            let (reply, _) = call(&mut qspi, cmd::QSPI_FAST_READ, &[0x00, 0x01, 0x00, 2]).unwrap();
            assert_eq!(reply.len(), 512);
            assert_eq!(reply[..], expected[0x100..0x300], "mode {}", mode);
            let (opcode, _) = QspiMode::from_u8(mode).unwrap().fast_read();
            assert_eq!(flash(&qspi).opcodes_seen().last(), Some(&opcode));
        }
    }

    #[test]
    fn test_fast_read_after_entering_qpi() {
        let mut qspi = driver();
        let (reply, _) = call(&mut qspi, cmd::QSPI_ENTER_QPI, &[]).unwrap();
        assert_eq!(reply, [QspiMode::Qpi as u8]);
        assert!(flash(&qspi).is_qpi());

        let (reply, _) = call(&mut qspi, cmd::QSPI_FAST_READ, &[0x00, 0x10, 0x00, 1]).unwrap();
        assert_eq!(reply[..], contents()[0x1000..0x1100]);

        let (reply, _) = call(&mut qspi, cmd::QSPI_EXIT_QPI, &[]).unwrap();
        assert_eq!(reply, [QspiMode::Standard as u8]);
        assert!(!flash(&qspi).is_qpi());
    }

    #[test]
    fn test_fast_read_page_count_bounds() {
        let mut qspi = driver();
        for pages in [0u8, 17] {
            let err = call(&mut qspi, cmd::QSPI_FAST_READ, &[0, 0, 0, pages]).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidParameter);
        }
        let (reply, _) = call(&mut qspi, cmd::QSPI_FAST_READ, &[0, 0, 0, 16]).unwrap();
        assert_eq!(reply.len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_generic_read_with_and_without_address() {
        let mut qspi = driver();
        // READ 0x03, 3-byte address 0x000123, no dummy, 4 bytes
        let (reply, _) =
            call(&mut qspi, cmd::QSPI_READ, &[0x03, 3, 0x23, 0x01, 0x00, 0, 4, 0]).unwrap();
        assert_eq!(reply[..], contents()[0x123..0x127]);

        // RDSR without address
        let (reply, _) = call(&mut qspi, cmd::QSPI_READ, &[opcodes::RDSR, 0, 0, 1, 0]).unwrap();
        assert_eq!(reply, [0]);

        let err = call(&mut qspi, cmd::QSPI_READ, &[0x03, 2, 0, 0, 0, 1, 0]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        let err = call(&mut qspi, cmd::QSPI_READ, &[0x03, 3, 0, 0]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_write_enable_program_and_verify() {
        let mut qspi = driver();
        call(&mut qspi, cmd::QSPI_WRITE, &[opcodes::WREN, 0]).unwrap();
        assert!(flash(&qspi).write_enabled());

        call(&mut qspi, cmd::QSPI_WRITE, &[opcodes::SE, 3, 0x00, 0x10, 0x00]).unwrap();
        assert!(flash(&qspi).data()[0x1000..0x2000].iter().all(|&b| b == 0xFF));

        call(&mut qspi, cmd::QSPI_WRITE, &[opcodes::WREN, 0]).unwrap();
        call(&mut qspi, cmd::QSPI_WRITE, &[opcodes::PP, 3, 0x10, 0x10, 0x00, 0xDE, 0xAD, 0xBE, 0xEF])
            .unwrap();
        let (reply, _) =
            call(&mut qspi, cmd::QSPI_READ, &[0x03, 3, 0x10, 0x10, 0x00, 0, 4, 0]).unwrap();
        assert_eq!(reply, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_raw_command_variants() {
        let mut qspi = driver();
        // full duplex: opcode then 3 bytes out, 3 bytes in
        let (reply, _) = call(&mut qspi, cmd::QSPI_CMD, &[opcodes::RDID, 3, 0, 0, 0]).unwrap();
        assert_eq!(reply, [0xEF, 0x40, 0x18]);

        // read only
        let (reply, _) = call(&mut qspi, cmd::QSPI_CMD, &[opcodes::RDID, 2]).unwrap();
        assert_eq!(reply, [0xEF, 0x40]);

        // opcode only
        let (reply, _) = call(&mut qspi, cmd::QSPI_CMD, &[opcodes::WREN, 0]).unwrap();
        assert!(reply.is_empty());
        assert!(flash(&qspi).write_enabled());

        let err = call(&mut qspi, cmd::QSPI_CMD, &[opcodes::RDID, 65]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        let err = call(&mut qspi, cmd::QSPI_CMD, &[opcodes::RDID, 3, 0]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_raw_command_in_qpi_writes_on_four_lines() {
        let mut qspi = driver();
        call(&mut qspi, cmd::QSPI_ENTER_QPI, &[]).unwrap();
        let (reply, _) = call(&mut qspi, cmd::QSPI_CMD, &[opcodes::RDID, 3]).unwrap();
        assert_eq!(reply, [0xEF, 0x40, 0x18]);
        let (reply, _) = call(&mut qspi, cmd::QSPI_CMD, &[0x01, 1, 0x00]).unwrap();
        assert!(reply.is_empty());
        assert_eq!(flash(&qspi).opcodes_seen().last(), Some(&0x01));
    }

    #[test]
    fn test_set_clock() {
        let mut qspi = driver();
        let (reply, _) = call(&mut qspi, cmd::QSPI_SET_CLOCK, &8_000_000u32.to_le_bytes()).unwrap();
        // 62.5 ns rounds up to the next slower clock
        assert_eq!(qspi.engine().timing().half_period_ns, 63);
        assert_eq!(u32::from_le_bytes(reply[..].try_into().unwrap()), 500_000_000 / 63);

        let err = call(&mut qspi, cmd::QSPI_SET_CLOCK, &[0, 0, 0, 0]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }
}
