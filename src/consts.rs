//! Constants used across the control plane.
//!
//! This module defines the flash geometry and sector map, the SPI NOR command
//! set, the timing parameters of the flash engine and the fixed values of the
//! extension-unit control protocol.
//!
//! ## Flash sector map
//!
//! | Sector | Start       | End         | Role                 |
//! |--------|-------------|-------------|----------------------|
//! | 0 - 3  | `0x00_0000` | `0x03_FFFF` | Boot image           |
//! | 4      | `0x04_0000` | `0x04_FFFF` | Device message       |
//! | 5      | `0x05_0000` | `0x05_FFFF` | Calibration record   |
//! | 6 - 7  | `0x06_0000` | `0x07_FFFF` | Reserved             |
//!
//! Every sector is 64 KiB and must be erased (all bits set) before any of its
//! bits can be programmed back to 1.

/// Size (in bytes) of one erase sector.
pub const SECTOR_SIZE: u32 = 0x1_0000;

/// Number of sectors on the flash device.
pub const SECTOR_COUNT: u8 = 8;

/// Total flash capacity in bytes.
pub const FLASH_CAPACITY: u32 = SECTOR_SIZE * SECTOR_COUNT as u32;

/// Page size used when nothing else is negotiated.
pub const DEFAULT_PAGE_SIZE: u16 = 0x100;

/// Largest page size the engine accepts.
///
/// Store buffers are sized to one page of this length, so every record the
/// stores move fits in a single maximal page.
pub const MAX_PAGE_SIZE: u16 = 0x100;

/// Smallest page size the engine accepts.
pub const MIN_PAGE_SIZE: u16 = 0x10;

/// See [`MAX_PAGE_SIZE`](crate::consts::MAX_PAGE_SIZE)
pub const MAX_PAGE_SIZE_USIZE: usize = MAX_PAGE_SIZE as usize;

/// First sector of the boot image.
pub const BOOT_SECTOR: u8 = 0;

/// Sector holding the device message (identity) record.
pub const DEVICE_MESSAGE_SECTOR: u8 = 4;

/// Sector holding the calibration packets.
pub const CALIBRATION_SECTOR: u8 = 5;

/// SPI NOR: set the write-enable latch.
pub const CMD_WRITE_ENABLE: u8 = 0x06;

/// SPI NOR: read status register.
pub const CMD_READ_STATUS: u8 = 0x05;

/// SPI NOR: read data.
pub const CMD_READ: u8 = 0x03;

/// SPI NOR: page program.
pub const CMD_PAGE_PROGRAM: u8 = 0x02;

/// SPI NOR: 64 KiB sector erase.
pub const CMD_SECTOR_ERASE: u8 = 0xD8;

/// Status register: write in progress.
pub const STATUS_WIP: u8 = 0x01;

/// Status register: write-enable latch.
pub const STATUS_WEL: u8 = 0x02;

/// Timeout for a single page block transfer, in milliseconds.
pub const BLOCK_TRANSFER_TIMEOUT_MS: u32 = 5000;

/// Pause between consecutive page transfers, in milliseconds.
///
/// Respects the flash page write-cycle time.
pub const INTER_PAGE_DELAY_MS: u32 = 10;

/// Default number of status polls the ready barrier performs before giving up.
pub const READY_POLL_LIMIT: u32 = 10_000;

/// Default pause between two ready-barrier polls, in microseconds.
pub const READY_POLL_INTERVAL_US: u32 = 100;

/// UVC class request: set current value.
pub const UVC_SET_CUR: u8 = 0x01;

/// UVC class request: get current value.
pub const UVC_GET_CUR: u8 = 0x81;

/// UVC class request: get length of the control value.
pub const UVC_GET_LEN: u8 = 0x85;

/// UVC class request: get control capabilities.
pub const UVC_GET_INFO: u8 = 0x86;

/// GET_INFO capability value: the control supports both GET and SET.
pub const CAPABILITY_GET_SET: u8 = 3;

/// Largest payload a single control transfer carries.
pub const MAX_CONTROL_LEN: usize = 256;

/// Length of the raw IMU burst read (accel, temperature, gyro).
pub const IMU_RAW_LEN: usize = 14;

/// Length of the IMU burst sample reported to the host.
///
/// 6 bytes of accelerometer, 6 bytes of gyroscope, 4 bytes of timestamp.
pub const IMU_SAMPLE_LEN: usize = 16;
