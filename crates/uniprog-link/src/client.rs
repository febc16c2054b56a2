//! Typed command client
//!
//! [`Client`] frames a request, waits for the reply carrying the same
//! sequence number and turns error packets into [`LinkError::Device`]. The
//! helpers below it encode each command's payload layout so callers never
//! build raw payloads by hand.

use std::time::{Duration, Instant};

use uniprog_core::drivers::{MAX_PAGES, MAX_RAW_LEN, PAGE_SIZE, PING_REPLY};
use uniprog_core::hal::GpioLevels;
use uniprog_core::protocol::{cmd, encode_frame, Event, Flags, FrameParser, MAX_FRAME, MAX_PAYLOAD};
use uniprog_core::qspi::QspiMode;
use uniprog_core::ErrorCode;

use crate::error::{LinkError, Result};
use crate::transport::Transport;

/// Reply timeout used unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport read chunk
const READ_CHUNK: usize = 512;

/// GET_STATUS reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStatus {
    /// Probe state, 0 when idle
    pub state: u8,
    /// Milliseconds since the probe booted
    pub uptime_ms: u32,
    /// Free RAM reported by the probe
    pub free_memory: u32,
}

/// SPI_SCAN reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiScan {
    /// A chip answered the JEDEC ID read
    Found {
        /// Manufacturer ID
        manufacturer: u8,
        /// Device ID (memory type and capacity)
        device: u16,
    },
    /// Nothing answered; the raw bytes clocked in
    Absent([u8; 4]),
}

/// Command client over any [`Transport`]
pub struct Client<T: Transport> {
    transport: T,
    parser: Box<FrameParser>,
    sequence: u8,
    timeout: Duration,
}

impl<T: Transport> Client<T> {
    /// Create a client with the default timeout
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            parser: Box::new(FrameParser::new()),
            sequence: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the reply timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current reply timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Send `command` with `payload` and return the reply payload
    pub fn command(&mut self, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::InvalidParameter(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD
            )));
        }
        let sequence = self.next_sequence();
        let mut frame = vec![0u8; MAX_FRAME];
        let len = encode_frame(sequence, command, Flags::empty(), payload, &mut frame)?;

        log::trace!("-> seq {} cmd 0x{:02X} len {}", sequence, command, payload.len());
        self.parser.reset();
        self.transport.write(&frame[..len])?;
        self.transport.flush()?;
        self.receive(sequence, command)
    }

    fn receive(&mut self, sequence: u8, command: u8) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(LinkError::Timeout(command));
            }
            let wait_ms = (deadline - now).as_millis().clamp(1, u32::MAX as u128) as u32;
            let n = self.transport.read_nonblock(&mut buf, wait_ms)?;

            for &byte in &buf[..n] {
                match self.parser.push(byte) {
                    None => {}
                    Some(Event::Packet(packet)) => {
                        if packet.sequence != sequence || !packet.flags.contains(Flags::RESPONSE) {
                            log::debug!(
                                "Ignoring packet seq {} cmd 0x{:02X}",
                                packet.sequence,
                                packet.command
                            );
                            continue;
                        }
                        log::trace!("<- seq {} len {}", packet.sequence, packet.payload.len());
                        if packet.flags.contains(Flags::ERROR) {
                            return Err(device_error(command, packet.payload));
                        }
                        return Ok(packet.payload.to_vec());
                    }
                    Some(Event::CrcMismatch {
                        received, computed, ..
                    }) => return Err(LinkError::Crc { received, computed }),
                    Some(Event::PayloadTooLarge(header)) => {
                        return Err(LinkError::Framing(header.length))
                    }
                }
            }
        }
    }

    /// Send a command whose reply must be exactly `N` bytes
    fn command_exact<const N: usize>(&mut self, command: u8, payload: &[u8]) -> Result<[u8; N]> {
        let reply = self.command(command, payload)?;
        reply.as_slice().try_into().map_err(|_| LinkError::InvalidResponse {
            command,
            reason: format!("expected {} bytes, got {}", N, reply.len()),
        })
    }

    /// Send a command whose reply must be empty
    fn command_empty(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        self.command_exact::<0>(command, payload).map(drop)
    }

    // System

    /// Check that the probe answers
    pub fn ping(&mut self) -> Result<()> {
        let reply = self.command_exact::<2>(cmd::PING, &[])?;
        if reply != PING_REPLY {
            return Err(LinkError::InvalidResponse {
                command: cmd::PING,
                reason: format!("bad ping reply {:02X?}", reply),
            });
        }
        Ok(())
    }

    /// Capability document
    pub fn capabilities(&mut self) -> Result<String> {
        let reply = self.command(cmd::GET_CAPS, &[])?;
        String::from_utf8(reply).map_err(|_| LinkError::InvalidResponse {
            command: cmd::GET_CAPS,
            reason: "capabilities are not UTF-8".into(),
        })
    }

    /// Probe state, uptime and free memory
    pub fn status(&mut self) -> Result<ProbeStatus> {
        let reply = self.command_exact::<9>(cmd::GET_STATUS, &[])?;
        Ok(ProbeStatus {
            state: reply[0],
            uptime_ms: u32::from_le_bytes([reply[1], reply[2], reply[3], reply[4]]),
            free_memory: u32::from_le_bytes([reply[5], reply[6], reply[7], reply[8]]),
        })
    }

    /// Raw levels of the flash interface lines
    pub fn gpio_test(&mut self) -> Result<GpioLevels> {
        let reply = self.command_exact::<6>(cmd::GPIO_TEST, &[])?;
        Ok(GpioLevels {
            cs: reply[0] != 0,
            sck: reply[1] != 0,
            io: [reply[2] != 0, reply[3] != 0, reply[4] != 0, reply[5] != 0],
        })
    }

    /// Restart the probe once the acknowledgement is sent
    pub fn reset(&mut self) -> Result<()> {
        self.command_empty(cmd::RESET, &[])
    }

    /// Reboot the probe into its ROM bootloader
    pub fn enter_bootloader(&mut self) -> Result<()> {
        self.command_empty(cmd::BOOTLOADER, &[])
    }

    // I2C

    /// 7-bit addresses that acknowledged
    pub fn i2c_scan(&mut self) -> Result<Vec<u8>> {
        let reply = self.command(cmd::I2C_SCAN, &[])?;
        match reply.split_first() {
            Some((&count, addrs)) if addrs.len() == count as usize => Ok(addrs.to_vec()),
            _ => Err(LinkError::InvalidResponse {
                command: cmd::I2C_SCAN,
                reason: "count does not match address list".into(),
            }),
        }
    }

    /// Read `len` bytes from the device at `addr`
    pub fn i2c_read(&mut self, addr: u8, len: u16) -> Result<Vec<u8>> {
        let mut payload = vec![addr];
        payload.extend_from_slice(&len.to_le_bytes());
        let reply = self.command(cmd::I2C_READ, &payload)?;
        expect_len(cmd::I2C_READ, reply, len as usize)
    }

    /// Write `data` to the device at `addr`
    pub fn i2c_write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        let mut payload = vec![addr];
        payload.extend_from_slice(data);
        self.command_empty(cmd::I2C_WRITE, &payload)
    }

    // SPI

    /// JEDEC ID read on the hardware SPI port
    pub fn spi_scan(&mut self) -> Result<SpiScan> {
        let reply = self.command(cmd::SPI_SCAN, &[])?;
        match reply.as_slice() {
            [1, manufacturer, hi, lo] => Ok(SpiScan::Found {
                manufacturer: *manufacturer,
                device: u16::from_be_bytes([*hi, *lo]),
            }),
            [0, raw @ ..] if raw.len() == 4 => Ok(SpiScan::Absent([raw[0], raw[1], raw[2], raw[3]])),
            _ => Err(LinkError::InvalidResponse {
                command: cmd::SPI_SCAN,
                reason: format!("unexpected scan reply {:02X?}", reply),
            }),
        }
    }

    /// Set SPI mode (0..3) and clock
    pub fn spi_config(&mut self, mode: u8, hz: u32) -> Result<()> {
        let mut payload = vec![mode];
        payload.extend_from_slice(&hz.to_le_bytes());
        self.command_exact::<1>(cmd::SPI_CONFIG, &payload).map(drop)
    }

    /// Full-duplex transfer
    pub fn spi_transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        let reply = self.command(cmd::SPI_XFER, tx)?;
        expect_len(cmd::SPI_XFER, reply, tx.len())
    }

    // QSPI

    /// Select the bus width mode
    pub fn qspi_set_mode(&mut self, mode: QspiMode) -> Result<QspiMode> {
        let reply = self.command_exact::<1>(cmd::QSPI_SET_MODE, &[mode as u8])?;
        mode_reply(cmd::QSPI_SET_MODE, reply[0])
    }

    /// Set the bit-bang clock, returning the clock actually used
    pub fn qspi_set_clock(&mut self, hz: u32) -> Result<u32> {
        let reply = self.command_exact::<4>(cmd::QSPI_SET_CLOCK, &hz.to_le_bytes())?;
        Ok(u32::from_le_bytes(reply))
    }

    /// Opcode, optional `(address, address length)`, dummy cycles, then read
    pub fn qspi_read(
        &mut self,
        opcode: u8,
        address: Option<(u32, u8)>,
        dummy: u8,
        len: u16,
    ) -> Result<Vec<u8>> {
        let mut payload = vec![opcode];
        push_address(&mut payload, address)?;
        payload.push(dummy);
        payload.extend_from_slice(&len.to_le_bytes());
        let reply = self.command(cmd::QSPI_READ, &payload)?;
        expect_len(cmd::QSPI_READ, reply, len as usize)
    }

    /// Opcode, optional `(address, address length)`, then write `data`
    pub fn qspi_write(&mut self, opcode: u8, address: Option<(u32, u8)>, data: &[u8]) -> Result<()> {
        let mut payload = vec![opcode];
        push_address(&mut payload, address)?;
        payload.extend_from_slice(data);
        self.command_empty(cmd::QSPI_WRITE, &payload)
    }

    /// Read `pages` 256-byte pages starting at `addr` with the mode's fast read
    pub fn qspi_fast_read(&mut self, addr: u32, pages: u8) -> Result<Vec<u8>> {
        if pages == 0 || pages > MAX_PAGES {
            return Err(LinkError::InvalidParameter(format!("page count {}", pages)));
        }
        if addr > 0xFF_FFFF {
            return Err(LinkError::InvalidParameter(format!("address 0x{:X} needs 4 bytes", addr)));
        }
        let mut payload = addr.to_le_bytes()[..3].to_vec();
        payload.push(pages);
        let reply = self.command(cmd::QSPI_FAST_READ, &payload)?;
        expect_len(cmd::QSPI_FAST_READ, reply, pages as usize * PAGE_SIZE)
    }

    /// Raw command with an `n`-byte data phase
    ///
    /// With `tx` empty, `n` bytes are read. Otherwise `tx` must be `n` bytes
    /// long and is clocked out full duplex (written only, in QPI).
    pub fn qspi_command(&mut self, opcode: u8, tx: &[u8], n: usize) -> Result<Vec<u8>> {
        if n > MAX_RAW_LEN || (!tx.is_empty() && tx.len() != n) {
            return Err(LinkError::InvalidParameter(format!(
                "data phase of {} bytes with {} tx bytes",
                n,
                tx.len()
            )));
        }
        let mut payload = vec![opcode, n as u8];
        payload.extend_from_slice(tx);
        self.command(cmd::QSPI_CMD, &payload)
    }

    /// Switch the flash and the probe into QPI
    pub fn qspi_enter_qpi(&mut self) -> Result<QspiMode> {
        let reply = self.command_exact::<1>(cmd::QSPI_ENTER_QPI, &[])?;
        mode_reply(cmd::QSPI_ENTER_QPI, reply[0])
    }

    /// Switch the flash and the probe back to single-wire SPI
    pub fn qspi_exit_qpi(&mut self) -> Result<QspiMode> {
        let reply = self.command_exact::<1>(cmd::QSPI_EXIT_QPI, &[])?;
        mode_reply(cmd::QSPI_EXIT_QPI, reply[0])
    }

    // ISP

    /// Hold the AVR in reset and enable programming
    pub fn isp_enter(&mut self) -> Result<()> {
        self.command_empty(cmd::ISP_ENTER, &[])
    }

    /// One 4-byte ISP instruction
    pub fn isp_transfer(&mut self, instruction: [u8; 4]) -> Result<[u8; 4]> {
        self.command_exact::<4>(cmd::ISP_XFER, &instruction)
    }

    /// Release the AVR from reset
    pub fn isp_exit(&mut self) -> Result<()> {
        self.command_empty(cmd::ISP_EXIT, &[])
    }

    /// Read the 3-byte AVR signature
    pub fn avr_signature(&mut self) -> Result<[u8; 3]> {
        let mut signature = [0u8; 3];
        for (i, byte) in signature.iter_mut().enumerate() {
            *byte = self.isp_transfer([0x30, 0x00, i as u8, 0x00])?[3];
        }
        Ok(signature)
    }

    // SWD

    /// Switch the target to SWD and read its IDCODE
    pub fn swd_init(&mut self) -> Result<u32> {
        self.command_exact::<4>(cmd::SWD_INIT, &[]).map(u32::from_le_bytes)
    }

    /// Read an access port register
    pub fn swd_read_ap(&mut self, ap: u8, addr: u8) -> Result<u32> {
        self.command_exact::<4>(cmd::SWD_READ, &[ap, addr])
            .map(u32::from_le_bytes)
    }

    /// Write an access port register
    pub fn swd_write_ap(&mut self, ap: u8, addr: u8, value: u32) -> Result<()> {
        let mut payload = vec![ap, addr];
        payload.extend_from_slice(&value.to_le_bytes());
        self.command_empty(cmd::SWD_WRITE, &payload)
    }

    /// Read a debug port register
    pub fn swd_read_dp(&mut self, addr: u8) -> Result<u32> {
        self.command_exact::<4>(cmd::SWD_READ_DP, &[addr])
            .map(u32::from_le_bytes)
    }

    /// Write a debug port register
    pub fn swd_write_dp(&mut self, addr: u8, value: u32) -> Result<()> {
        let mut payload = vec![addr];
        payload.extend_from_slice(&value.to_le_bytes());
        self.command_empty(cmd::SWD_WRITE_DP, &payload)
    }
}

fn device_error(command: u8, payload: &[u8]) -> LinkError {
    match payload.split_first() {
        Some((&code, message)) => match ErrorCode::from_u8(code) {
            Some(code) => LinkError::Device {
                code,
                message: String::from_utf8_lossy(message).into_owned(),
            },
            None => LinkError::UnknownErrorCode(code),
        },
        None => LinkError::InvalidResponse {
            command,
            reason: "empty error packet".into(),
        },
    }
}

fn expect_len(command: u8, reply: Vec<u8>, len: usize) -> Result<Vec<u8>> {
    if reply.len() != len {
        return Err(LinkError::InvalidResponse {
            command,
            reason: format!("expected {} bytes, got {}", len, reply.len()),
        });
    }
    Ok(reply)
}

fn mode_reply(command: u8, value: u8) -> Result<QspiMode> {
    QspiMode::from_u8(value).map_err(|_| LinkError::InvalidResponse {
        command,
        reason: format!("unknown mode {}", value),
    })
}

/// `[addr_len][addr LE]`
fn push_address(payload: &mut Vec<u8>, address: Option<(u32, u8)>) -> Result<()> {
    match address {
        None => payload.push(0),
        Some((addr, len @ (3 | 4))) => {
            payload.push(len);
            payload.extend_from_slice(&addr.to_le_bytes()[..len as usize]);
        }
        Some((_, len)) => {
            return Err(LinkError::InvalidParameter(format!("address length {}", len)));
        }
    }
    Ok(())
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::transport::sim::{SimTransport, SIM_SPI_ID};
    use uniprog_core::drivers::CAPABILITIES;
    use uniprog_core::sim::SIM_IDCODE;

    fn client() -> Client<SimTransport> {
        Client::new(SimTransport::spawn().unwrap())
    }

    #[test]
    fn test_system_commands() {
        let mut probe = client();
        probe.ping().unwrap();
        assert_eq!(probe.capabilities().unwrap(), CAPABILITIES);
        assert_eq!(probe.status().unwrap().state, 0);
        let levels = probe.gpio_test().unwrap();
        assert!(levels.cs);
    }

    #[test]
    fn test_bus_commands() {
        let mut probe = client();
        assert_eq!(probe.i2c_scan().unwrap(), [0x50]);
        probe.i2c_write(0x50, &[0x00, 1, 2, 3]).unwrap();
        probe.i2c_write(0x50, &[0x00]).unwrap();
        assert_eq!(probe.i2c_read(0x50, 3).unwrap(), [1, 2, 3]);

        assert_eq!(
            probe.spi_scan().unwrap(),
            SpiScan::Found {
                manufacturer: SIM_SPI_ID[0],
                device: u16::from_be_bytes([SIM_SPI_ID[1], SIM_SPI_ID[2]]),
            }
        );
        probe.spi_config(0, 4_000_000).unwrap();

        probe.isp_enter().unwrap();
        assert_eq!(probe.avr_signature().unwrap(), [0x1E, 0x95, 0x0F]);
        probe.isp_exit().unwrap();

        assert_eq!(probe.swd_init().unwrap(), SIM_IDCODE);
        probe.swd_write_dp(0x04, 0x5000_0000).unwrap();
        assert_eq!(probe.swd_read_dp(0x04).unwrap(), 0xF000_0000);
    }

    #[test]
    fn test_qspi_modes() {
        let mut probe = client();
        assert_eq!(probe.qspi_set_mode(QspiMode::DualIo).unwrap(), QspiMode::DualIo);
        assert_eq!(probe.qspi_fast_read(0, 1).unwrap(), vec![0xFF; 256]);
        assert_eq!(probe.qspi_enter_qpi().unwrap(), QspiMode::Qpi);
        assert_eq!(probe.qspi_command(0x9F, &[], 3).unwrap(), [0xEF, 0x40, 0x18]);
        assert_eq!(probe.qspi_exit_qpi().unwrap(), QspiMode::Standard);
    }

    #[test]
    fn test_device_errors_are_typed() {
        let mut probe = client();
        let err = probe.command(0x7F, &[]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnknownCommand));

        let err = probe.i2c_read(0x20, 1).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BusError));

        // the session stays usable after an error
        probe.ping().unwrap();
    }

    #[test]
    fn test_bootloader_disconnects() {
        let mut probe = client().with_timeout(Duration::from_millis(200));
        probe.enter_bootloader().unwrap();
        assert!(matches!(probe.ping(), Err(LinkError::Io(_))));
    }

    #[test]
    fn test_client_side_validation() {
        let mut probe = client();
        assert!(matches!(
            probe.qspi_fast_read(0, 17),
            Err(LinkError::InvalidParameter(_))
        ));
        assert!(matches!(
            probe.qspi_read(0x03, Some((0, 2)), 0, 1),
            Err(LinkError::InvalidParameter(_))
        ));
        assert!(matches!(
            probe.command(cmd::SPI_XFER, &vec![0; MAX_PAYLOAD + 1]),
            Err(LinkError::InvalidParameter(_))
        ));
    }
}
