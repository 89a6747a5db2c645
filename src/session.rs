//! Process-wide state of the extension unit.
//!
//! Everything the selector handlers remember between requests lives in one
//! [`Session`], owned by the [`Dispatcher`](crate::dispatcher::Dispatcher).

use crate::calibration::TransferLoopState;
use crate::consts::IMU_SAMPLE_LEN;
use bitflags::bitflags;

bitflags! {
    /// Firmware control flags, as written by the host.
    ///
    /// Only the logging bits are interpreted. Every other bit is stored and
    /// echoed back unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlFlags: u32 {
        /// Enable debug-level logging.
        const LOG_DEBUG = 1 << 0;
        /// Enable info-level logging.
        const LOG_INFO = 1 << 1;
        /// Enable data dumps.
        const LOG_DUMP = 1 << 2;

        const _ = !0;
    }
}

bitflags! {
    /// Logging levels derived from [`ControlFlags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugLevel: u8 {
        /// Debug messages.
        const DEBUG = 1 << 0;
        /// Informational messages.
        const INFO = 1 << 1;
        /// Data dumps.
        const DUMP = 1 << 2;
    }
}

impl From<ControlFlags> for DebugLevel {
    fn from(flags: ControlFlags) -> Self {
        let mut level = DebugLevel::empty();
        level.set(DebugLevel::DEBUG, flags.contains(ControlFlags::LOG_DEBUG));
        level.set(DebugLevel::INFO, flags.contains(ControlFlags::LOG_INFO));
        level.set(DebugLevel::DUMP, flags.contains(ControlFlags::LOG_DUMP));
        level
    }
}

#[cfg(feature = "log")]
impl DebugLevel {
    /// Most verbose `log` level this debug level enables.
    pub fn level_filter(self) -> log::LevelFilter {
        if self.contains(DebugLevel::DEBUG) {
            log::LevelFilter::Debug
        } else if self.contains(DebugLevel::INFO) {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Warn
        }
    }
}

/// Mutable state shared by the selector handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub(crate) loops: TransferLoopState,
    pub(crate) flags: ControlFlags,
    pub(crate) debug_level: DebugLevel,
    pub(crate) last_sample: [u8; IMU_SAMPLE_LEN],
    pub(crate) imu_value: u8,
    pub(crate) camera_read_addr: u16,
    pub(crate) ir_control: u32,
    pub(crate) debug_scratch: [u32; 2],
}

impl Default for Session {
    fn default() -> Self {
        Self {
            loops: TransferLoopState::default(),
            flags: ControlFlags::empty(),
            debug_level: DebugLevel::empty(),
            last_sample: [0; IMU_SAMPLE_LEN],
            imu_value: 0,
            camera_read_addr: 0,
            ir_control: 0,
            debug_scratch: [1, 1],
        }
    }
}

impl Session {
    /// Creates a fresh session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calibration transfer cursors.
    pub fn loops(&self) -> &TransferLoopState {
        &self.loops
    }

    /// Current control flags.
    pub fn flags(&self) -> ControlFlags {
        self.flags
    }

    /// Stores new control flags and recomputes the debug level.
    pub fn set_flags(&mut self, flags: ControlFlags) {
        self.flags = flags;
        self.debug_level = flags.into();
    }

    /// Debug level derived from the last control-flag write.
    pub fn debug_level(&self) -> DebugLevel {
        self.debug_level
    }

    /// Last IMU burst sample reported to the host.
    pub fn last_sample(&self) -> &[u8; IMU_SAMPLE_LEN] {
        &self.last_sample
    }

    /// Last IMU register value read or written.
    pub fn imu_value(&self) -> u8 {
        self.imu_value
    }

    /// Camera register address the next GET_CUR reads.
    pub fn camera_read_addr(&self) -> u16 {
        self.camera_read_addr
    }

    /// Infrared control word.
    pub fn ir_control(&self) -> u32 {
        self.ir_control
    }

    /// Debug scratch words.
    pub fn debug_scratch(&self) -> [u32; 2] {
        self.debug_scratch
    }
}
