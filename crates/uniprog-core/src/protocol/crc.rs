//! CRC-32 (IEEE 802.3, reflected) used as the frame check

/// Reflected IEEE polynomial
const POLY: u32 = 0xEDB8_8320;

/// Byte lookup table, computed at compile time
static TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-32 state
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Start a new checksum
    pub const fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        for &byte in data {
            self.state = (self.state >> 8) ^ TABLE[((self.state ^ byte as u32) & 0xFF) as usize];
        }
        self
    }

    /// Final value
    pub const fn finish(&self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32 of a byte slice
pub fn crc32(data: &[u8]) -> u32 {
    Crc32::new().update(data).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_table_matches_published_entries() {
        assert_eq!(TABLE[0], 0x0000_0000);
        assert_eq!(TABLE[1], 0x7707_3096);
        assert_eq!(TABLE[128], 0xEDB8_8320);
        assert_eq!(TABLE[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_matches_crc32fast() {
        let mut data = [0u8; 1024];
        let mut x = 0x1234_5678u32;
        for byte in data.iter_mut() {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12345);
            *byte = (x >> 16) as u8;
        }
        for len in [0, 1, 5, 64, 255, 1024] {
            assert_eq!(crc32(&data[..len]), crc32fast::hash(&data[..len]), "len {}", len);
        }
    }

    #[test]
    fn test_incremental_equals_oneshot() {
        let data = b"uniprog framed protocol";
        let mut crc = Crc32::new();
        crc.update(&data[..7]).update(&data[7..]);
        assert_eq!(crc.finish(), crc32(data));
    }
}
