//! Driver capability interface
//!
//! Every bus handler implements [`Driver`]. The protocol engine hands it the
//! command ID, the request payload and a bounded [`Response`] to fill.

use crate::error::{CommandError, Error, Result};

/// Action that must only run after its response has left the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeferredAction {
    /// Restart the probe firmware
    Reset,
    /// Reboot into the ROM bootloader
    Bootloader,
}

/// A bus-specific command handler
pub trait Driver {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Set up the hardware this driver owns
    ///
    /// Must be idempotent: the registry may call it again after a reset.
    fn initialize(&mut self) -> Result<()>;

    /// Execute `command` with `payload`, writing the reply into `response`
    ///
    /// On error, anything already written to `response` is discarded and the
    /// engine sends an error packet built from the returned [`CommandError`].
    fn handle_command(
        &mut self,
        command: u8,
        payload: &[u8],
        response: &mut Response<'_>,
    ) -> core::result::Result<(), CommandError>;
}

/// Bounded response buffer handed to a driver
///
/// Every write is checked against the capacity of the backing slice.
pub struct Response<'a> {
    buf: &'a mut [u8],
    len: usize,
    deferred: Option<DeferredAction>,
}

impl<'a> Response<'a> {
    /// Wrap a caller-owned buffer
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            deferred: None,
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Nothing written yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Space left
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// The written bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Append one byte
    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.extend_from_slice(&[byte])
    }

    /// Append a little-endian u16
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.extend_from_slice(&value.to_le_bytes())
    }

    /// Append a little-endian u32
    pub fn push_u32(&mut self, value: u32) -> Result<()> {
        self.extend_from_slice(&value.to_le_bytes())
    }

    /// Append a slice
    pub fn extend_from_slice(&mut self, data: &[u8]) -> Result<()> {
        let dest = self.reserve(data.len())?;
        dest.copy_from_slice(data);
        Ok(())
    }

    /// Claim the next `n` bytes so a bus read can land in place
    pub fn reserve(&mut self, n: usize) -> Result<&mut [u8]> {
        if n > self.remaining() {
            return Err(Error::ResponseOverflow);
        }
        let start = self.len;
        self.len += n;
        let dest = &mut self.buf[start..self.len];
        dest.fill(0);
        Ok(dest)
    }

    /// Discard the written bytes and any pending action
    pub fn clear(&mut self) {
        self.len = 0;
        self.deferred = None;
    }

    /// Request an action to run once this response has been flushed
    pub fn defer(&mut self, action: DeferredAction) {
        self.deferred = Some(action);
    }

    /// Pending action, if any
    pub fn deferred(&self) -> Option<DeferredAction> {
        self.deferred
    }
}

/// Cursor over a request payload
///
/// All reads fail with [`CommandError::invalid_request`] when the payload is
/// shorter than the field being read.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Request<'a> {
    /// Start reading a payload
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Next `n` bytes
    pub fn bytes(&mut self, n: usize) -> core::result::Result<&'a [u8], CommandError> {
        if n > self.remaining() {
            return Err(CommandError::invalid_request("Truncated request"));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Next byte
    pub fn u8(&mut self) -> core::result::Result<u8, CommandError> {
        Ok(self.bytes(1)?[0])
    }

    /// Next little-endian u16
    pub fn u16(&mut self) -> core::result::Result<u16, CommandError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Next little-endian u32
    pub fn u32(&mut self) -> core::result::Result<u32, CommandError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Little-endian integer of `len` bytes (0..=4)
    pub fn uint(&mut self, len: usize) -> core::result::Result<u32, CommandError> {
        if len > 4 {
            return Err(CommandError::invalid_parameter("Integer too wide"));
        }
        let b = self.bytes(len)?;
        Ok(b.iter().rev().fold(0u32, |acc, &byte| (acc << 8) | byte as u32))
    }

    /// Everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_response_capacity_checked() {
        let mut buf = [0u8; 4];
        let mut resp = Response::new(&mut buf);
        resp.push(0xCA).unwrap();
        resp.push_u16(0x1234).unwrap();
        assert_eq!(resp.remaining(), 1);
        assert_eq!(resp.push_u32(1), Err(Error::ResponseOverflow));
        // A failed write leaves the buffer untouched
        assert_eq!(resp.as_slice(), &[0xCA, 0x34, 0x12]);
        resp.push(0xFE).unwrap();
        assert_eq!(resp.reserve(1), Err(Error::ResponseOverflow));
    }

    #[test]
    fn test_response_clear_drops_deferred_action() {
        let mut buf = [0u8; 4];
        let mut resp = Response::new(&mut buf);
        resp.push(1).unwrap();
        resp.defer(DeferredAction::Reset);
        assert_eq!(resp.deferred(), Some(DeferredAction::Reset));
        resp.clear();
        assert!(resp.is_empty());
        assert_eq!(resp.deferred(), None);
    }

    #[test]
    fn test_request_fields() {
        let data = [0x03, 0x03, 0x56, 0x34, 0x12, 0x08, 0x00, 0x01, 0xAA];
        let mut req = Request::new(&data);
        assert_eq!(req.u8().unwrap(), 0x03);
        let addr_len = req.u8().unwrap() as usize;
        assert_eq!(req.uint(addr_len).unwrap(), 0x12_3456);
        assert_eq!(req.u8().unwrap(), 0x08);
        assert_eq!(req.u16().unwrap(), 0x0100);
        assert_eq!(req.rest(), &[0xAA]);
        assert_eq!(req.remaining(), 0);

        let err = req.u8().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }
}
