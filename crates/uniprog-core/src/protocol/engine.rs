//! Protocol engine: parser + registry + response path

use embedded_io::{Read, ReadReady, Write};

use super::frame::{write_frame, Event, FrameParser};
use super::{Flags, Packet, MAX_PAYLOAD};
use crate::driver::{DeferredAction, Driver, Response};
use crate::error::{CommandError, ErrorCode, Result};
use crate::hal::{Status, StatusIndicator};
use crate::registry::Registry;

/// Longest message carried after the error code
const MAX_ERROR_MESSAGE: usize = 62;

/// Transport read chunk used by [`ProtocolEngine::poll`]
const POLL_CHUNK: usize = 64;

/// Framed command engine
///
/// Owns the frame parser, the driver registry and the response buffer.
/// Processing is synchronous: every complete frame fed in is dispatched and
/// answered before the next byte is looked at.
pub struct ProtocolEngine<'d, S: StatusIndicator = ()> {
    parser: FrameParser,
    registry: Registry<'d>,
    status: S,
    response: [u8; MAX_PAYLOAD],
    deferred: Option<DeferredAction>,
}

impl<'d, S: StatusIndicator> ProtocolEngine<'d, S> {
    /// Create an engine with an empty registry
    pub fn new(status: S) -> Self {
        Self {
            parser: FrameParser::new(),
            registry: Registry::new(),
            status,
            response: [0; MAX_PAYLOAD],
            deferred: None,
        }
    }

    /// Bind a command range to a driver
    pub fn register(&mut self, start: u8, end: u8, driver: &'d mut dyn Driver) -> Result<()> {
        self.registry.register(start, end, driver)
    }

    /// Run every driver's initialization hook
    pub fn initialize_all(&mut self) -> Result<()> {
        let result = self.registry.initialize_all();
        self.status.set_status(Status::Idle);
        result
    }

    /// The driver registry
    pub fn registry(&self) -> &Registry<'d> {
        &self.registry
    }

    /// The status indicator
    pub fn status_mut(&mut self) -> &mut S {
        &mut self.status
    }

    /// Pending deferred action, if one was requested
    ///
    /// Only ever set after the triggering response was written and flushed.
    pub fn take_deferred(&mut self) -> Option<DeferredAction> {
        self.deferred.take()
    }

    /// Process `data`, writing any responses to `out`
    ///
    /// Returns the number of bytes consumed. Consumption stops right after a
    /// command that requested a [`DeferredAction`]; the caller is expected to
    /// run it (see [`take_deferred`](Self::take_deferred)) instead of feeding
    /// more input.
    ///
    /// Every framing error (oversized length, CRC mismatch) is answered with
    /// its own error packet. The payload of an oversized frame is not waited
    /// for: the sender must stop transmitting once the error arrives.
    pub fn feed<W: Write>(&mut self, data: &[u8], out: &mut W) -> core::result::Result<usize, W::Error> {
        let mut consumed = 0;
        for &byte in data {
            if self.deferred.is_some() {
                break;
            }
            consumed += 1;

            let Self {
                parser,
                registry,
                status,
                response,
                deferred,
            } = self;

            let Some(event) = parser.push(byte) else {
                continue;
            };

            match event {
                Event::Packet(packet) => {
                    *deferred = dispatch(registry, status, response, &packet, out)?;
                }
                Event::PayloadTooLarge(header) => {
                    log::warn!(
                        "Payload too large: cmd 0x{:02X} declared {} bytes",
                        header.command,
                        header.length
                    );
                    status.set_status(Status::Error);
                    send_error(
                        out,
                        header.sequence,
                        header.command,
                        CommandError::new(ErrorCode::PayloadTooLarge, "Payload too large"),
                    )?;
                }
                Event::CrcMismatch {
                    header,
                    received,
                    computed,
                } => {
                    log::warn!(
                        "CRC mismatch on cmd 0x{:02X}: received {:08X}, computed {:08X}",
                        header.command,
                        received,
                        computed
                    );
                    status.set_status(Status::Error);
                    send_error(
                        out,
                        header.sequence,
                        header.command,
                        CommandError::new(ErrorCode::CrcMismatch, "CRC Error"),
                    )?;
                }
            }
        }
        Ok(consumed)
    }

    /// Drain every byte the transport already has, without blocking
    ///
    /// Returns the deferred action to execute, if a command requested one.
    /// Input following that command is left unread.
    pub fn poll<T: Read + ReadReady + Write>(
        &mut self,
        transport: &mut T,
    ) -> core::result::Result<Option<DeferredAction>, T::Error> {
        let mut chunk = [0u8; POLL_CHUNK];
        while self.deferred.is_none() && transport.read_ready()? {
            let n = transport.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            let consumed = self.feed(&chunk[..n], transport)?;
            if consumed < n {
                log::debug!("Dropping {} bytes after deferred command", n - consumed);
            }
        }
        Ok(self.take_deferred())
    }
}

/// Route one packet to its driver and send the reply
fn dispatch<W: Write, S: StatusIndicator>(
    registry: &mut Registry<'_>,
    status: &mut S,
    buf: &mut [u8; MAX_PAYLOAD],
    packet: &Packet<'_>,
    out: &mut W,
) -> core::result::Result<Option<DeferredAction>, W::Error> {
    status.set_activity(true);
    log::trace!(
        "Packet seq {} cmd 0x{:02X} len {}",
        packet.sequence,
        packet.command,
        packet.payload.len()
    );

    let result = match registry.lookup(packet.command) {
        Some(driver) => {
            let mut response = Response::new(buf);
            match driver.handle_command(packet.command, packet.payload, &mut response) {
                Ok(()) => Ok((response.len(), response.deferred())),
                Err(e) => {
                    log::debug!("{} failed cmd 0x{:02X}: {}", driver.name(), packet.command, e);
                    Err(e)
                }
            }
        }
        None => {
            log::debug!("No driver for cmd 0x{:02X}", packet.command);
            Err(CommandError::unknown_command())
        }
    };

    let deferred = match result {
        Ok((len, deferred)) => {
            write_frame(out, packet.sequence, packet.command, Flags::RESPONSE, &buf[..len])?;
            out.flush()?;
            status.set_status(Status::Success);
            deferred
        }
        Err(e) => {
            send_error(out, packet.sequence, packet.command, e)?;
            status.set_status(Status::Error);
            None
        }
    };

    status.set_activity(false);
    Ok(deferred)
}

/// Send `[code][message]` with the ERROR flag
fn send_error<W: Write>(
    out: &mut W,
    sequence: u8,
    command: u8,
    error: CommandError,
) -> core::result::Result<(), W::Error> {
    let mut payload = [0u8; 1 + MAX_ERROR_MESSAGE];
    payload[0] = error.code as u8;
    let message = error.message.as_bytes();
    let len = message.len().min(MAX_ERROR_MESSAGE);
    payload[1..1 + len].copy_from_slice(&message[..len]);

    write_frame(
        out,
        sequence,
        command,
        Flags::RESPONSE | Flags::ERROR,
        &payload[..1 + len],
    )?;
    out.flush()
}
