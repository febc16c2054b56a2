//! Bit-level SWD target on [`SwdPins`]
//!
//! Starts in JTAG mode and only answers after a line reset, the JTAG-to-SWD
//! sequence and a second line reset. The target samples SWDIO on rising
//! SWCLK edges and shifts its own output on the same edges. A malformed
//! request locks the target out until the next line reset.

use std::vec;
use std::vec::Vec;

use crate::swd::{dp, parity, SwdPins, ACK_OK, JTAG_TO_SWD};

/// IDCODE reported by [`SimTarget`] (Cortex-M0+ DP)
pub const SIM_IDCODE: u32 = 0x0BC1_2477;

/// IDR of the simulated MEM-AP
pub const SIM_AP_IDR: u32 = 0x0477_0031;

/// MEM-AP register offsets
mod ap {
    pub const CSW: u8 = 0x00;
    pub const TAR: u8 = 0x04;
    pub const DRW: u8 = 0x0C;
    pub const IDR: u8 = 0xFC;
}

/// Consecutive high bits that make a line reset
const LINE_RESET_BITS: u32 = 50;

const CSYSPWRUPREQ: u32 = 1 << 30;
const CDBGPWRUPREQ: u32 = 1 << 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// JTAG or after a protocol error, waiting for a line reset
    Lockout,
    /// Line reset seen, waiting for the line to go low
    Reset,
    /// Collecting the JTAG-to-SWD sequence
    Switch { value: u16, count: u8 },
    /// Waiting for a start bit
    Idle,
    Header { value: u8, count: u8 },
    /// Turnaround before the ACK
    Turn,
    Ack { index: u8 },
    ReadData { index: u8 },
    /// Turnaround with the line released, then back to idle
    TurnEnd,
    /// Turnaround before write data
    TurnWrite,
    WriteData { value: u64, count: u8 },
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    ap: bool,
    read: bool,
    addr: u8,
    ack: u8,
    data: u32,
}

/// Simulated ARM debug port with one MEM-AP
pub struct SimTarget {
    connected: bool,
    swd_mode: bool,
    state: State,
    ones: u32,

    swclk: bool,
    host_output: bool,
    host_level: bool,
    target_drive: Option<bool>,

    forced_ack: Option<u8>,
    corrupt_parity: bool,
    requests: u32,
    pending: Option<Pending>,

    ctrl_stat: u32,
    select: u32,
    rdbuff: u32,
    csw: u32,
    tar: u32,
    memory: Vec<u32>,
}

impl SimTarget {
    /// Create a powered, connected target in JTAG mode
    pub fn new() -> Self {
        Self {
            connected: true,
            swd_mode: false,
            state: State::Lockout,
            ones: 0,
            swclk: false,
            host_output: false,
            host_level: false,
            target_drive: None,
            forced_ack: None,
            corrupt_parity: false,
            requests: 0,
            pending: None,
            ctrl_stat: 0,
            select: 0,
            rdbuff: 0,
            csw: 0,
            tar: 0,
            memory: vec![0; 256],
        }
    }

    /// Simulate an unconnected probe: the line floats high
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.target_drive = None;
    }

    /// Answer every request with this ACK instead of OK
    pub fn force_ack(&mut self, ack: Option<u8>) {
        self.forced_ack = ack;
    }

    /// Flip the parity bit of read data
    pub fn corrupt_parity(&mut self, corrupt: bool) {
        self.corrupt_parity = corrupt;
    }

    /// Whether the JTAG-to-SWD switch has been seen
    pub fn is_swd(&self) -> bool {
        self.swd_mode
    }

    /// Well-formed requests received
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Current DP SELECT value
    pub fn select(&self) -> u32 {
        self.select
    }

    /// Word of target memory behind the MEM-AP
    pub fn memory_word(&self, address: u32) -> u32 {
        self.memory[self.word_index(address)]
    }

    fn word_index(&self, address: u32) -> usize {
        (address as usize >> 2) % self.memory.len()
    }

    /// Level seen on SWDIO: host, then target, then pull-up
    fn line(&self) -> bool {
        if self.host_output {
            self.host_level
        } else {
            self.target_drive.unwrap_or(true)
        }
    }

    fn on_rising_edge(&mut self) {
        if !self.connected {
            return;
        }

        if self.host_output {
            let bit = self.host_level;
            self.ones = if bit { self.ones + 1 } else { 0 };
            if self.ones >= LINE_RESET_BITS && !matches!(self.state, State::WriteData { .. }) {
                self.state = State::Reset;
                return;
            }
            self.host_bit(bit);
        } else {
            self.ones = 0;
            self.target_bit();
        }
    }

    /// States in which the host drives the line
    fn host_bit(&mut self, bit: bool) {
        self.state = match self.state {
            State::Lockout => State::Lockout,
            State::Reset if bit => State::Reset,
            State::Reset if self.swd_mode => State::Idle,
            State::Reset => State::Switch { value: 0, count: 1 },
            State::Switch { value, count } => {
                let value = value | ((bit as u16) << count);
                if count + 1 == 16 {
                    if value == JTAG_TO_SWD {
                        self.swd_mode = true;
                    }
                    State::Lockout
                } else {
                    State::Switch { value, count: count + 1 }
                }
            }
            State::Idle if bit => State::Header { value: 1, count: 1 },
            State::Idle => State::Idle,
            State::Header { value, count } => {
                let value = value | ((bit as u8) << count);
                if count + 1 == 8 {
                    self.decode_header(value)
                } else {
                    State::Header { value, count: count + 1 }
                }
            }
            State::WriteData { value, count } => {
                let value = value | ((bit as u64) << count);
                if count + 1 == 33 {
                    self.finish_write(value);
                    State::Idle
                } else {
                    State::WriteData { value, count: count + 1 }
                }
            }
            // the host took the line early; treat it as a protocol error
            _ => State::Lockout,
        };
    }

    /// States in which the target owns the line
    fn target_bit(&mut self) {
        let Some(pending) = self.pending else {
            self.state = match self.state {
                State::TurnEnd => State::Idle,
                other => other,
            };
            self.target_drive = None;
            return;
        };

        self.state = match self.state {
            State::Turn => {
                self.target_drive = Some(pending.ack & 1 == 1);
                State::Ack { index: 0 }
            }
            State::Ack { index } if index < 2 => {
                self.target_drive = Some((pending.ack >> (index + 1)) & 1 == 1);
                State::Ack { index: index + 1 }
            }
            State::Ack { .. } => {
                if pending.ack != ACK_OK {
                    self.release();
                    State::TurnEnd
                } else if pending.read {
                    self.target_drive = Some(pending.data & 1 == 1);
                    State::ReadData { index: 0 }
                } else {
                    self.target_drive = None;
                    State::TurnWrite
                }
            }
            State::ReadData { index } if index < 31 => {
                self.target_drive = Some((pending.data >> (index + 1)) & 1 == 1);
                State::ReadData { index: index + 1 }
            }
            State::ReadData { index: 31 } => {
                self.target_drive = Some(parity(pending.data) != self.corrupt_parity);
                State::ReadData { index: 32 }
            }
            State::ReadData { .. } => {
                self.release();
                State::TurnEnd
            }
            State::TurnWrite => State::WriteData { value: 0, count: 0 },
            other => other,
        };
    }

    fn release(&mut self) {
        self.target_drive = None;
        self.pending = None;
    }

    fn decode_header(&mut self, header: u8) -> State {
        let ap = header & 0x02 != 0;
        let read = header & 0x04 != 0;
        let a23 = (header >> 3) & 0x03;
        let fields = (header >> 1) & 0x0F;
        let parity_ok = ((header >> 5) & 1) as u32 == fields.count_ones() % 2;
        let framing_ok = header & 0x40 == 0 && header & 0x80 != 0;
        if !parity_ok || !framing_ok {
            return State::Lockout;
        }

        self.requests += 1;
        let addr = a23 << 2;
        let ack = self.forced_ack.unwrap_or(ACK_OK);
        let data = if ack == ACK_OK && read {
            self.read_register(ap, addr)
        } else {
            0
        };
        self.pending = Some(Pending {
            ap,
            read,
            addr,
            ack,
            data,
        });
        State::Turn
    }

    fn finish_write(&mut self, value: u64) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let data = value as u32;
        let parity_bit = (value >> 32) & 1 == 1;
        if parity_bit != parity(data) {
            return;
        }
        if pending.ap {
            self.write_ap(pending.addr, data);
        } else {
            self.write_dp(pending.addr, data);
        }
    }

    fn read_register(&mut self, ap: bool, addr: u8) -> u32 {
        if !ap {
            return match addr {
                dp::IDCODE => SIM_IDCODE,
                dp::CTRL_STAT => self.ctrl_stat,
                dp::SELECT => self.select,
                _ => self.rdbuff,
            };
        }
        // posted: return the previous result, latch the new one
        let previous = self.rdbuff;
        self.rdbuff = self.ap_register(addr);
        previous
    }

    fn ap_register(&self, addr: u8) -> u32 {
        if self.select >> 24 != 0 {
            return 0;
        }
        match (self.select as u8 & 0xF0) | addr {
            ap::CSW => self.csw,
            ap::TAR => self.tar,
            ap::DRW => self.memory[self.word_index(self.tar)],
            ap::IDR => SIM_AP_IDR,
            _ => 0,
        }
    }

    fn write_dp(&mut self, addr: u8, value: u32) {
        match addr {
            dp::ABORT => {}
            dp::CTRL_STAT => {
                let mut acks = 0;
                if value & CSYSPWRUPREQ != 0 {
                    acks |= CSYSPWRUPREQ << 1;
                }
                if value & CDBGPWRUPREQ != 0 {
                    acks |= CDBGPWRUPREQ << 1;
                }
                self.ctrl_stat = value | acks;
            }
            dp::SELECT => self.select = value,
            _ => {}
        }
    }

    fn write_ap(&mut self, addr: u8, value: u32) {
        if self.select >> 24 != 0 {
            return;
        }
        match (self.select as u8 & 0xF0) | addr {
            ap::CSW => self.csw = value,
            ap::TAR => self.tar = value,
            ap::DRW => {
                let index = self.word_index(self.tar);
                self.memory[index] = value;
            }
            _ => {}
        }
    }
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SwdPins for SimTarget {
    fn set_swclk(&mut self, high: bool) {
        let rising = high && !self.swclk;
        self.swclk = high;
        if rising {
            self.on_rising_edge();
        }
    }

    fn set_swdio(&mut self, high: bool) {
        self.host_level = high;
    }

    fn read_swdio(&mut self) -> bool {
        self.line()
    }

    fn swdio_output(&mut self) {
        self.host_output = true;
    }

    fn swdio_input(&mut self) {
        self.host_output = false;
    }
}
