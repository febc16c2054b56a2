//! SPI NOR flash operations over the probe's QSPI commands
//!
//! Reads use the current mode's fast read. Erase, program and status
//! commands go out in the probe's current mode as well, so callers switch
//! to `QspiMode::Standard` before using them.

use std::time::{Duration, Instant};

use uniprog_core::drivers::{MAX_PAGES, PAGE_SIZE};

use crate::client::Client;
use crate::error::{LinkError, Result};
use crate::transport::Transport;

/// SPI NOR opcodes used here
pub mod opcodes {
    /// Read JEDEC ID
    pub const RDID: u8 = 0x9F;
    /// Read status register 1
    pub const RDSR: u8 = 0x05;
    /// Write enable
    pub const WREN: u8 = 0x06;
    /// Page program
    pub const PP: u8 = 0x02;
    /// 4 KiB sector erase
    pub const SE: u8 = 0x20;
    /// Status register 1: write in progress
    pub const SR1_WIP: u8 = 0x01;
}

/// Sector erased by [`erase_sector`]
pub const SECTOR_SIZE: u32 = 4096;

/// Typical page program takes well under this
pub const PROGRAM_TIMEOUT: Duration = Duration::from_millis(100);

/// 4 KiB sector erase worst case
pub const ERASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest address reachable with 3-byte addressing
const MAX_ADDRESS: u32 = 0xFF_FFFF;

/// Read the JEDEC ID as (manufacturer, device)
pub fn read_jedec_id<T: Transport>(client: &mut Client<T>) -> Result<(u8, u16)> {
    let id = client.qspi_command(opcodes::RDID, &[], 3)?;
    match id.as_slice() {
        &[manufacturer, hi, lo] => Ok((manufacturer, u16::from_be_bytes([hi, lo]))),
        _ => Err(LinkError::InvalidResponse {
            command: opcodes::RDID,
            reason: "short JEDEC ID".into(),
        }),
    }
}

/// Read status register 1
pub fn read_status<T: Transport>(client: &mut Client<T>) -> Result<u8> {
    let status = client.qspi_read(opcodes::RDSR, None, 0, 1)?;
    Ok(status[0])
}

/// Poll until the write-in-progress bit clears
///
/// Returns the number of status reads that reported busy.
pub fn wait_ready<T: Transport>(client: &mut Client<T>, timeout: Duration) -> Result<u32> {
    let deadline = Instant::now() + timeout;
    let mut busy = 0;
    loop {
        if read_status(client)? & opcodes::SR1_WIP == 0 {
            return Ok(busy);
        }
        busy += 1;
        if Instant::now() >= deadline {
            return Err(LinkError::Timeout(opcodes::RDSR));
        }
    }
}

/// Set the write enable latch
pub fn write_enable<T: Transport>(client: &mut Client<T>) -> Result<()> {
    client.qspi_write(opcodes::WREN, None, &[])
}

fn check_range(addr: u32, len: usize) -> Result<()> {
    let end = addr as u64 + len as u64;
    if end > MAX_ADDRESS as u64 + 1 {
        return Err(LinkError::InvalidParameter(format!(
            "range 0x{:X}+{} exceeds 3-byte addressing",
            addr, len
        )));
    }
    Ok(())
}

/// Read `len` bytes from `addr`, reporting progress in bytes
pub fn read<T: Transport>(
    client: &mut Client<T>,
    addr: u32,
    len: usize,
    mut progress: impl FnMut(usize),
) -> Result<Vec<u8>> {
    check_range(addr, len)?;
    let mut data = Vec::with_capacity(len);
    let mut current = addr;
    while data.len() < len {
        let remaining = len - data.len();
        let pages = remaining.div_ceil(PAGE_SIZE).min(MAX_PAGES as usize);
        let chunk = client.qspi_fast_read(current, pages as u8)?;
        let take = chunk.len().min(remaining);
        data.extend_from_slice(&chunk[..take]);
        current += take as u32;
        progress(take);
    }
    Ok(data)
}

/// Erase the 4 KiB sector containing `addr`
pub fn erase_sector<T: Transport>(client: &mut Client<T>, addr: u32) -> Result<()> {
    check_range(addr, 1)?;
    let base = addr & !(SECTOR_SIZE - 1);
    write_enable(client)?;
    client.qspi_write(opcodes::SE, Some((base, 3)), &[])?;
    let polls = wait_ready(client, ERASE_TIMEOUT)?;
    log::debug!("Erased sector 0x{:06X} after {} busy polls", base, polls);
    Ok(())
}

/// Program `data` at `addr`, split at page boundaries
///
/// The region must already be erased.
pub fn write<T: Transport>(
    client: &mut Client<T>,
    addr: u32,
    data: &[u8],
    mut progress: impl FnMut(usize),
) -> Result<()> {
    check_range(addr, data.len())?;
    let mut offset = 0;
    let mut current = addr;
    while offset < data.len() {
        let page_offset = current as usize % PAGE_SIZE;
        let chunk_size = (PAGE_SIZE - page_offset).min(data.len() - offset);
        let chunk = &data[offset..offset + chunk_size];

        write_enable(client)?;
        client.qspi_write(opcodes::PP, Some((current, 3)), chunk)?;
        wait_ready(client, PROGRAM_TIMEOUT)?;

        offset += chunk_size;
        current += chunk_size as u32;
        progress(chunk_size);
    }
    Ok(())
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::transport::sim::SimTransport;
    use uniprog_core::qspi::QspiMode;

    fn client() -> Client<SimTransport> {
        Client::new(SimTransport::spawn().unwrap())
    }

    #[test]
    fn test_jedec_id() {
        let mut probe = client();
        assert_eq!(read_jedec_id(&mut probe).unwrap(), (0xEF, 0x4018));
    }

    #[test]
    fn test_erase_program_read_back() {
        let mut probe = client();
        let data: Vec<u8> = (0..600u32).map(|i| (i * 7) as u8).collect();

        erase_sector(&mut probe, 0x1080).unwrap();
        let mut written = 0;
        write(&mut probe, 0x10F0, &data, |n| written += n).unwrap();
        assert_eq!(written, data.len());
        assert_eq!(read_status(&mut probe).unwrap() & opcodes::SR1_WIP, 0);

        probe.qspi_set_mode(QspiMode::QuadIo).unwrap();
        let mut read_total = 0;
        let back = read(&mut probe, 0x10F0, data.len(), |n| read_total += n).unwrap();
        assert_eq!(back, data);
        assert_eq!(read_total, data.len());
    }

    #[test]
    fn test_read_spanning_several_fast_reads() {
        let mut probe = client();
        let back = read(&mut probe, 0x100, 5000, |_| {}).unwrap();
        assert_eq!(back.len(), 5000);
        assert!(back.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_range_beyond_three_byte_addressing() {
        let mut probe = client();
        assert!(matches!(
            read(&mut probe, 0xFF_FF00, 0x200, |_| {}),
            Err(LinkError::InvalidParameter(_))
        ));
    }
}
