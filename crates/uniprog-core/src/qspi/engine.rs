//! Mode-aware QSPI bit-bang engine

use embedded_hal::delay::DelayNs;

use super::{QspiMode, QspiPins, IO0, IO1, IO2_IO3, IO_ALL, OP_ENTER_QPI, OP_EXIT_QPI};
use crate::error::{Error, Result};
use crate::hal::ClockTiming;

/// Output lines for a write phase of the given width
const fn write_direction(width: u8) -> u8 {
    match width {
        1 => IO0 | IO2_IO3,
        _ => IO_ALL,
    }
}

/// Output lines for a read phase of the given width
///
/// In single-wire mode IO0 keeps driving (MOSI low) while IO1 is sampled.
const fn read_direction(width: u8) -> u8 {
    match width {
        1 => IO0 | IO2_IO3,
        2 => IO2_IO3,
        _ => 0,
    }
}

/// Lines held high while they carry no data
const fn idle_high(width: u8) -> u8 {
    match width {
        1 | 2 => IO2_IO3,
        _ => 0,
    }
}

/// Bit-banged QSPI master
///
/// Chip select is left to the caller: bracket each transaction with
/// [`cs_low`](Self::cs_low) and [`cs_high`](Self::cs_high). Every byte is
/// clocked with interrupts masked so an interrupt cannot stretch a clock
/// edge in the middle of a symbol.
pub struct QspiEngine<P, D> {
    pins: P,
    delay: D,
    mode: QspiMode,
    timing: ClockTiming,
}

impl<P: QspiPins, D: DelayNs> QspiEngine<P, D> {
    /// Create an engine in standard mode at the default clock
    pub fn new(pins: P, delay: D) -> Self {
        Self {
            pins,
            delay,
            mode: QspiMode::Standard,
            timing: ClockTiming::default(),
        }
    }

    /// Use a different clock
    pub fn with_timing(mut self, timing: ClockTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Put the bus in its idle state: CS inactive, clock low, single-wire
    pub fn init(&mut self) {
        self.pins.set_cs(false);
        self.pins.set_sck(false);
        self.pins.set_io_direction(write_direction(1));
        self.pins.write_io(idle_high(1));
    }

    /// Current session mode
    pub fn mode(&self) -> QspiMode {
        self.mode
    }

    /// Change the session mode
    ///
    /// This only changes how the engine drives the lines; use
    /// [`enter_qpi`](Self::enter_qpi) to also switch the flash into QPI.
    pub fn set_mode(&mut self, mode: QspiMode) {
        if mode != self.mode {
            log::debug!("QSPI mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
    }

    /// Current clock timing
    pub fn timing(&self) -> ClockTiming {
        self.timing
    }

    /// Change the clock timing
    pub fn set_timing(&mut self, timing: ClockTiming) {
        log::debug!("QSPI clock {} Hz", timing.hz());
        self.timing = timing;
    }

    /// The pins
    pub fn pins(&self) -> &P {
        &self.pins
    }

    /// The pins, mutably
    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// Give back the pins and the delay
    pub fn release(self) -> (P, D) {
        (self.pins, self.delay)
    }

    /// Assert chip select
    pub fn cs_low(&mut self) {
        self.pins.set_cs(true);
    }

    /// Release chip select
    pub fn cs_high(&mut self) {
        self.pins.set_cs(false);
    }

    /// Send an opcode (four lines in QPI, one otherwise)
    pub fn send_command(&mut self, opcode: u8) {
        let width = self.mode.cmd_lines();
        self.write_bytes(&[opcode], width);
    }

    /// Send a 3- or 4-byte address, most significant byte first
    pub fn send_address(&mut self, addr: u32, len: u8) -> Result<()> {
        if !matches!(len, 3 | 4) {
            return Err(Error::InvalidAddressLength(len));
        }
        let bytes = addr.to_be_bytes();
        let width = self.mode.addr_lines();
        self.write_bytes(&bytes[4 - len as usize..], width);
        Ok(())
    }

    /// Tri-state every IO line and issue `cycles` clocks
    pub fn send_dummy_cycles(&mut self, cycles: u8) {
        if cycles == 0 {
            return;
        }
        self.pins.set_io_direction(0);
        critical_section::with(|_| {
            for _ in 0..cycles {
                self.pulse();
            }
        });
    }

    /// Write bytes in the data-phase width of the current mode
    pub fn write_data(&mut self, data: &[u8]) {
        let width = self.mode.data_lines();
        self.write_bytes(data, width);
    }

    /// Read bytes in the data-phase width of the current mode
    pub fn read_data(&mut self, buf: &mut [u8]) {
        let width = self.mode.data_lines();
        self.read_bytes(buf, width);
    }

    /// Full-duplex single-wire transfer
    ///
    /// `tx` is shifted out on IO0 while IO1 is sampled into `rx`; the shorter
    /// of the two sets the length. Not available in QPI, where the flash no
    /// longer listens on a single line.
    pub fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if self.mode == QspiMode::Qpi {
            return Err(Error::UnsupportedMode);
        }
        self.pins.set_io_direction(write_direction(1));
        for (out, byte) in rx.iter_mut().zip(tx) {
            *out = critical_section::with(|_| self.exchange_byte(*byte));
        }
        Ok(())
    }

    /// Switch the flash and the engine into QPI
    pub fn enter_qpi(&mut self) {
        self.mode = QspiMode::Standard;
        self.cs_low();
        self.send_command(OP_ENTER_QPI);
        self.cs_high();
        self.set_mode(QspiMode::Qpi);
    }

    /// Switch the flash and the engine back to standard SPI
    pub fn exit_qpi(&mut self) {
        self.mode = QspiMode::Qpi;
        self.cs_low();
        self.send_command(OP_EXIT_QPI);
        self.cs_high();
        self.set_mode(QspiMode::Standard);
    }

    fn write_bytes(&mut self, data: &[u8], width: u8) {
        self.pins.set_io_direction(write_direction(width));
        for &byte in data {
            critical_section::with(|_| self.shift_out(byte, width));
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8], width: u8) {
        self.pins.set_io_direction(read_direction(width));
        // MOSI idles low during a single-wire read
        self.pins.write_io(idle_high(width));
        for byte in buf.iter_mut() {
            *byte = critical_section::with(|_| self.shift_in(width));
        }
    }

    fn half_period(&mut self) {
        self.delay.delay_ns(self.timing.half_period_ns);
    }

    /// One clock with nothing driven or sampled
    fn pulse(&mut self) {
        self.half_period();
        self.pins.set_sck(true);
        self.half_period();
        self.pins.set_sck(false);
    }

    fn shift_out(&mut self, byte: u8, width: u8) {
        let mask = (1u8 << width) - 1;
        let symbols = 8 / width;
        for i in (0..symbols).rev() {
            let symbol = (byte >> (i * width)) & mask;
            self.pins.write_io(symbol | idle_high(width));
            self.pulse();
        }
    }

    fn shift_in(&mut self, width: u8) -> u8 {
        let mask = (1u8 << width) - 1;
        let symbols = 8 / width;
        let mut byte = 0u8;
        for _ in 0..symbols {
            self.half_period();
            self.pins.set_sck(true);
            let io = self.pins.read_io();
            let symbol = if width == 1 { (io & IO1) >> 1 } else { io & mask };
            byte = (byte << width) | symbol;
            self.half_period();
            self.pins.set_sck(false);
        }
        byte
    }

    fn exchange_byte(&mut self, out: u8) -> u8 {
        let mut byte = 0u8;
        for bit in (0..8).rev() {
            self.pins.write_io(((out >> bit) & 1) | idle_high(1));
            self.half_period();
            self.pins.set_sck(true);
            byte = (byte << 1) | ((self.pins.read_io() & IO1) >> 1);
            self.half_period();
            self.pins.set_sck(false);
        }
        byte
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::vec::Vec;

    use super::*;
    use crate::sim::NoDelay;

    /// Records what is on the lines at every rising clock edge and replays
    /// queued symbols on reads
    #[derive(Default)]
    struct Probe {
        cs_active: bool,
        direction: u8,
        levels: u8,
        edges: Vec<(u8, u8)>,
        replay: VecDeque<u8>,
        cs_edges: Vec<bool>,
    }

    impl QspiPins for Probe {
        fn set_cs(&mut self, active: bool) {
            self.cs_active = active;
            self.cs_edges.push(active);
        }

        fn set_sck(&mut self, high: bool) {
            if high {
                self.edges.push((self.direction, self.levels & self.direction));
            }
        }

        fn set_io_direction(&mut self, outputs: u8) {
            self.direction = outputs;
        }

        fn write_io(&mut self, levels: u8) {
            self.levels = levels;
        }

        fn read_io(&mut self) -> u8 {
            self.replay.pop_front().unwrap_or(0)
        }
    }

    fn engine(mode: QspiMode) -> QspiEngine<Probe, NoDelay> {
        let mut engine = QspiEngine::new(Probe::default(), NoDelay);
        engine.init();
        engine.set_mode(mode);
        engine
    }

    /// Turn the symbols clocked out by a write into what a read expects
    fn looped_back(edges: &[(u8, u8)], width: u8) -> VecDeque<u8> {
        edges
            .iter()
            .map(|&(_, levels)| match width {
                1 => (levels & IO0) << 1,
                2 => levels & 0b11,
                _ => levels & 0b1111,
            })
            .collect()
    }

    #[test]
    fn test_data_round_trip_and_clock_count_per_mode() {
        for mode in QspiMode::ALL {
            let width = mode.data_lines();
            for byte in [0x00u8, 0xFF, 0xA5, 0x3C, 0x81] {
                let mut qspi = engine(mode);
                qspi.write_data(&[byte]);
                let edges = core::mem::take(&mut qspi.pins_mut().edges);
                assert_eq!(edges.len(), 8 / width as usize, "{} write", mode);

                qspi.pins_mut().replay = looped_back(&edges, width);
                let mut read = [0u8];
                qspi.read_data(&mut read);
                assert_eq!(read[0], byte, "{}", mode);
                assert_eq!(qspi.pins().edges.len(), 8 / width as usize, "{} read", mode);
            }
        }
    }

    #[test]
    fn test_dual_pairs_msb_first_with_io1_upper() {
        let mut qspi = engine(QspiMode::DualOut);
        qspi.write_data(&[0b10_01_11_00]);
        let symbols: Vec<u8> = qspi.pins().edges.iter().map(|&(_, l)| l & 0b11).collect();
        assert_eq!(symbols, [0b10, 0b01, 0b11, 0b00]);
        // /WP and /HOLD stay high
        assert!(qspi.pins().edges.iter().all(|&(_, l)| l & IO2_IO3 == IO2_IO3));
    }

    #[test]
    fn test_quad_high_nibble_first() {
        let mut qspi = engine(QspiMode::QuadIo);
        qspi.write_data(&[0xA5]);
        let symbols: Vec<u8> = qspi.pins().edges.iter().map(|&(_, l)| l).collect();
        assert_eq!(symbols, [0x0A, 0x05]);
    }

    #[test]
    fn test_command_width_follows_mode() {
        let mut qspi = engine(QspiMode::QuadIo);
        qspi.send_command(0xEB);
        assert_eq!(qspi.pins().edges.len(), 8);

        let mut qspi = engine(QspiMode::Qpi);
        qspi.send_command(0xEB);
        assert_eq!(qspi.pins().edges.len(), 2);
    }

    #[test]
    fn test_address_msb_first_per_mode() {
        let mut qspi = engine(QspiMode::QuadIo);
        qspi.send_address(0x12_3456, 3).unwrap();
        let symbols: Vec<u8> = qspi.pins().edges.iter().map(|&(_, l)| l).collect();
        assert_eq!(symbols, [1, 2, 3, 4, 5, 6]);

        let mut qspi = engine(QspiMode::DualIo);
        qspi.send_address(0x0100_0000, 4).unwrap();
        assert_eq!(qspi.pins().edges.len(), 16);
        assert_eq!(qspi.pins().edges[3].1 & 0b11, 0b01);

        let mut qspi = engine(QspiMode::Standard);
        assert_eq!(qspi.send_address(0, 2), Err(Error::InvalidAddressLength(2)));
        assert!(qspi.pins().edges.is_empty());
    }

    #[test]
    fn test_dummy_cycles_tristate_all_lines() {
        let mut qspi = engine(QspiMode::QuadIo);
        qspi.send_dummy_cycles(6);
        assert_eq!(qspi.pins().edges.len(), 6);
        assert!(qspi.pins().edges.iter().all(|&(dir, _)| dir == 0));
    }

    #[test]
    fn test_transfer_full_duplex_single_wire() {
        let mut qspi = engine(QspiMode::DualOut);
        // 0xC2 on MISO, bit by bit, MSB first
        qspi.pins_mut().replay = (0..8).rev().map(|bit| ((0xC2u8 >> bit) & 1) << 1).collect();
        let mut rx = [0u8; 1];
        qspi.transfer(&[0x9F], &mut rx).unwrap();
        assert_eq!(rx, [0xC2]);
        let mosi: Vec<u8> = qspi.pins().edges.iter().map(|&(_, l)| l & IO0).collect();
        assert_eq!(mosi, [1, 0, 0, 1, 1, 1, 1, 1]);

        let mut qspi = engine(QspiMode::Qpi);
        assert_eq!(qspi.transfer(&[0x9F], &mut rx), Err(Error::UnsupportedMode));
    }

    #[test]
    fn test_enter_and_exit_qpi() {
        let mut qspi = engine(QspiMode::QuadIo);
        qspi.enter_qpi();
        assert_eq!(qspi.mode(), QspiMode::Qpi);
        // 0x38 on one line, bracketed by chip select
        let mosi: Vec<u8> = qspi.pins().edges.iter().map(|&(_, l)| l & IO0).collect();
        assert_eq!(mosi, [0, 0, 1, 1, 1, 0, 0, 0]);
        assert_eq!(qspi.pins().cs_edges[1..], [true, false]);

        qspi.pins_mut().edges.clear();
        qspi.exit_qpi();
        assert_eq!(qspi.mode(), QspiMode::Standard);
        let symbols: Vec<u8> = qspi.pins().edges.iter().map(|&(_, l)| l).collect();
        assert_eq!(symbols, [0x0F, 0x0F]);
    }
}
