//! Test doubles for the control plane.
//!
//! [`EmulatedNor`] models a small SPI NOR device behind the [`SpiPort`]
//! primitives: erase-before-write bit semantics, the write-enable latch, a
//! busy countdown after erase, and injectable faults. [`RecordingDelay`],
//! [`FakeChannel`] and [`FakeBoard`] stand in for the remaining collaborators.

use crate::consts::{
    CMD_PAGE_PROGRAM, CMD_READ, CMD_READ_STATUS, CMD_SECTOR_ERASE, CMD_WRITE_ENABLE,
    FLASH_CAPACITY, IMU_RAW_LEN, SECTOR_COUNT, SECTOR_SIZE, STATUS_WEL, STATUS_WIP,
};
use crate::error::BlockError;
use crate::platform::{Board, ControlChannel, SensorFault, SensorVariant};
use crate::port::SpiPort;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorKind, ErrorType};
use std::collections::{BTreeMap, VecDeque};

/// Bus activity recorded by [`EmulatedNor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NorEvent {
    /// A write-enable command.
    WriteEnable,
    /// A page read.
    Read {
        /// Byte address.
        address: u32,
        /// Bytes moved.
        len: usize,
    },
    /// A page program that the device accepted.
    Program {
        /// Byte address.
        address: u32,
        /// Bytes moved.
        len: usize,
    },
    /// A sector erase that the device accepted.
    Erase {
        /// Sector index.
        sector: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Idle,
    Status,
    Read(u32),
    Program(u32),
}

/// Emulated SPI NOR flash device.
#[derive(Debug)]
pub struct EmulatedNor {
    memory: Vec<u8>,
    selected: bool,
    pending: Pending,
    wel: bool,
    busy: u32,
    erase_busy_polls: u32,
    stuck_busy: bool,
    blocks_before_timeout: Option<usize>,
    fail_status: bool,
    events: Vec<NorEvent>,
    erases: [u32; SECTOR_COUNT as usize],
}

impl Default for EmulatedNor {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedNor {
    /// A blank (all ones) device that stays busy for two status polls after
    /// each erase.
    pub fn new() -> Self {
        Self {
            memory: vec![0xFF; FLASH_CAPACITY as usize],
            selected: false,
            pending: Pending::Idle,
            wel: false,
            busy: 0,
            erase_busy_polls: 2,
            stuck_busy: false,
            blocks_before_timeout: None,
            fail_status: false,
            events: Vec::new(),
            erases: [0; SECTOR_COUNT as usize],
        }
    }

    /// Number of status polls an erase keeps the device busy for.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.erase_busy_polls = polls;
        self
    }

    /// The device reports write-in-progress forever.
    pub fn stuck_busy(mut self) -> Self {
        self.stuck_busy = true;
        self
    }

    /// Block transfers after the first `blocks` time out.
    pub fn fail_block_after(mut self, blocks: usize) -> Self {
        self.blocks_before_timeout = Some(blocks);
        self
    }

    /// Status register reads fail on the bus.
    pub fn fail_status_reads(mut self) -> Self {
        self.fail_status = true;
        self
    }

    /// Recorded bus activity.
    pub fn events(&self) -> &[NorEvent] {
        &self.events
    }

    /// Accepted erases of `sector`.
    pub fn sector_erases(&self, sector: u8) -> u32 {
        self.erases[usize::from(sector)]
    }

    /// Raw device contents.
    pub fn memory(&self, address: u32, len: usize) -> &[u8] {
        let start = address as usize;
        &self.memory[start..start + len]
    }

    /// Whether slave select is asserted.
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    fn is_busy(&self) -> bool {
        self.stuck_busy || self.busy > 0
    }

    fn command(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
        let address = |w: &[u8]| u32::from_be_bytes([0, w[1], w[2], w[3]]);
        match (words[0], words.len()) {
            (CMD_WRITE_ENABLE, 1) => {
                self.events.push(NorEvent::WriteEnable);
                if !self.is_busy() {
                    self.wel = true;
                }
            }
            (CMD_READ_STATUS, 1) => self.pending = Pending::Status,
            (CMD_READ, 4) => self.pending = Pending::Read(address(words)),
            (CMD_PAGE_PROGRAM, 4) => self.pending = Pending::Program(address(words)),
            (CMD_SECTOR_ERASE, 4) => {
                let sector = address(words) / SECTOR_SIZE;
                if self.wel && !self.is_busy() && sector < u32::from(SECTOR_COUNT) {
                    let start = (sector * SECTOR_SIZE) as usize;
                    self.memory[start..start + SECTOR_SIZE as usize].fill(0xFF);
                    self.erases[sector as usize] += 1;
                    self.events.push(NorEvent::Erase { sector: sector as u8 });
                    self.busy = self.erase_busy_polls;
                }
                self.wel = false;
            }
            _ => return Err(ErrorKind::Other),
        }
        Ok(())
    }

    fn take_block(&mut self) -> Result<(), BlockError<ErrorKind>> {
        match self.blocks_before_timeout.as_mut() {
            Some(0) => Err(BlockError::Timeout),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl ErrorType for EmulatedNor {
    type Error = ErrorKind;
}

impl SpiPort for EmulatedNor {
    fn select(&mut self, active: bool) -> Result<(), ErrorKind> {
        self.selected = active;
        self.pending = Pending::Idle;
        Ok(())
    }

    fn transmit(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
        if !self.selected || words.is_empty() {
            return Err(ErrorKind::ChipSelectFault);
        }
        self.command(words)
    }

    fn receive(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        if self.pending != Pending::Status || self.fail_status {
            return Err(ErrorKind::Other);
        }
        let mut status = 0;
        if self.is_busy() {
            status |= STATUS_WIP;
        }
        if self.wel {
            status |= STATUS_WEL;
        }
        words.fill(status);
        self.busy = self.busy.saturating_sub(1);
        Ok(())
    }

    fn block_receive(
        &mut self,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<(), BlockError<ErrorKind>> {
        let Pending::Read(address) = self.pending else {
            return Err(BlockError::Bus(ErrorKind::Other));
        };
        self.take_block()?;
        let start = address as usize;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
        self.events.push(NorEvent::Read { address, len: buf.len() });
        Ok(())
    }

    fn block_send(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<(), BlockError<ErrorKind>> {
        let Pending::Program(address) = self.pending else {
            return Err(BlockError::Bus(ErrorKind::Other));
        };
        self.take_block()?;
        if self.wel && !self.is_busy() {
            let start = address as usize;
            for (cell, byte) in self.memory[start..start + buf.len()].iter_mut().zip(buf) {
                *cell &= byte;
            }
            self.events.push(NorEvent::Program { address, len: buf.len() });
        }
        self.wel = false;
        Ok(())
    }
}

/// [`DelayNs`] that only adds up the requested time.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    ns: u64,
}

impl RecordingDelay {
    /// Total requested delay in whole milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.ns / 1_000_000
    }

    /// Total requested delay in whole microseconds.
    pub fn total_us(&self) -> u64 {
        self.ns / 1_000
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.ns += u64::from(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.ns += u64::from(us) * 1_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.ns += u64::from(ms) * 1_000_000;
    }
}

/// Failure injected into a [`FakeChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFault;

/// Scripted control pipe.
#[derive(Debug, Default)]
pub struct FakeChannel {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    stalls: usize,
    fail: bool,
}

impl FakeChannel {
    /// Queues the data stage of the next SET_CUR request.
    pub fn push_inbound(&mut self, data: &[u8]) {
        self.inbound.push_back(data.to_vec());
    }

    /// Replies sent so far, oldest first.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Most recent reply.
    pub fn last_sent(&self) -> Option<&[u8]> {
        self.sent.last().map(Vec::as_slice)
    }

    /// Number of stalled requests.
    pub fn stalls(&self) -> usize {
        self.stalls
    }

    /// Makes every subsequent transfer fail.
    pub fn fail_transfers(&mut self) {
        self.fail = true;
    }
}

impl ControlChannel for FakeChannel {
    type Error = ChannelFault;

    fn send(&mut self, data: &[u8]) -> Result<(), ChannelFault> {
        if self.fail {
            return Err(ChannelFault);
        }
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ChannelFault> {
        if self.fail {
            return Err(ChannelFault);
        }
        let data = self.inbound.pop_front().unwrap_or_default();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn stall(&mut self) {
        self.stalls += 1;
    }
}

/// Sensor board with register files and a settable clock.
#[derive(Debug)]
pub struct FakeBoard {
    variant: SensorVariant,
    imu_registers: BTreeMap<u16, u8>,
    camera_registers: BTreeMap<u16, u16>,
    burst: Option<[u8; IMU_RAW_LEN]>,
    ir_applied: Vec<u32>,
    now_ms: u32,
    slept_ms: u32,
}

impl FakeBoard {
    /// A board fitted with `variant`.
    pub fn new(variant: SensorVariant) -> Self {
        Self {
            variant,
            imu_registers: BTreeMap::new(),
            camera_registers: BTreeMap::new(),
            burst: None,
            ir_applied: Vec::new(),
            now_ms: 0,
            slept_ms: 0,
        }
    }

    /// Next burst read returns `raw`; `None` makes it fail.
    pub fn set_burst(&mut self, raw: Option<[u8; IMU_RAW_LEN]>) {
        self.burst = raw;
    }

    /// Sets the clock.
    pub fn set_now_ms(&mut self, ms: u32) {
        self.now_ms = ms;
    }

    /// IMU register contents.
    pub fn imu_register(&self, addr: u16) -> Option<u8> {
        self.imu_registers.get(&addr).copied()
    }

    /// Presets a camera register.
    pub fn set_camera_register(&mut self, addr: u16, value: u16) {
        let _ = self.camera_registers.insert(addr, value);
    }

    /// Camera register contents.
    pub fn camera_register(&self, addr: u16) -> Option<u16> {
        self.camera_registers.get(&addr).copied()
    }

    /// Infrared control words applied so far.
    pub fn ir_applied(&self) -> &[u32] {
        &self.ir_applied
    }

    /// Total time slept.
    pub fn slept_ms(&self) -> u32 {
        self.slept_ms
    }
}

impl Board for FakeBoard {
    fn variant(&self) -> SensorVariant {
        self.variant
    }

    fn imu_read_register(&mut self, addr: u16) -> u8 {
        self.imu_registers.get(&addr).copied().unwrap_or(0)
    }

    fn imu_write_register(&mut self, addr: u16, value: u8) {
        let _ = self.imu_registers.insert(addr, value);
    }

    fn imu_read_burst(&mut self, raw: &mut [u8; IMU_RAW_LEN]) -> Result<(), SensorFault> {
        let sample = self.burst.ok_or(SensorFault)?;
        *raw = sample;
        Ok(())
    }

    fn camera_read_register(&mut self, addr: u16) -> u16 {
        self.camera_registers.get(&addr).copied().unwrap_or(0)
    }

    fn camera_write_register(&mut self, addr: u16, value: u16) {
        let _ = self.camera_registers.insert(addr, value);
    }

    fn apply_ir_control(&mut self, value: u32) {
        self.ir_applied.push(value);
    }

    fn now_ms(&self) -> u32 {
        self.now_ms
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.slept_ms += ms;
    }
}
