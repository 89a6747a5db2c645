//! Collaborators outside the control plane.
//!
//! The dispatcher reaches the USB control pipe through [`ControlChannel`] and
//! the camera's sensors through [`Board`]. Firmware implements both on top of
//! its USB stack and sensor drivers; the crate never touches either directly.

use core::fmt::Debug;

/// Fixed-length transfers on the USB default control pipe.
pub trait ControlChannel {
    /// Transport failure reported by the USB stack.
    type Error: Debug;

    /// Sends `data` as the data stage of the current request.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the data stage of the current request into `buf`.
    ///
    /// Returns the number of bytes actually received.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Stalls the control pipe, rejecting the current request.
    fn stall(&mut self);
}

/// Image sensor fitted to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum SensorVariant {
    /// Global-shutter sensor without infrared control.
    V034,
    /// Second-generation rolling-shutter sensor with infrared control.
    Xpirl2,
    /// Third-generation rolling-shutter sensor with infrared control.
    Xpirl3,
    /// Third-generation sensor, revision A. No infrared control.
    Xpirl3A,
}

impl SensorVariant {
    /// Whether the infrared control selector is available.
    pub fn supports_ir(self) -> bool {
        matches!(self, SensorVariant::Xpirl2 | SensorVariant::Xpirl3)
    }
}

/// The IMU did not deliver a burst sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct SensorFault;

/// Sensor access the selector handlers need.
///
/// Object safe; handlers receive it as `&mut dyn Board`.
pub trait Board {
    /// Image sensor variant, decided at boot.
    fn variant(&self) -> SensorVariant;

    /// Reads an IMU register.
    fn imu_read_register(&mut self, addr: u16) -> u8;

    /// Writes an IMU register.
    fn imu_write_register(&mut self, addr: u16, value: u8);

    /// Reads the raw accelerometer, temperature and gyroscope block.
    fn imu_read_burst(&mut self, raw: &mut [u8; crate::consts::IMU_RAW_LEN])
    -> Result<(), SensorFault>;

    /// Reads a camera-sensor register.
    fn camera_read_register(&mut self, addr: u16) -> u16;

    /// Writes a camera-sensor register.
    fn camera_write_register(&mut self, addr: u16, value: u16);

    /// Applies a new infrared control word to the sensor.
    fn apply_ir_control(&mut self, value: u32);

    /// Milliseconds since boot.
    fn now_ms(&self) -> u32;

    /// Sleeps for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u32);
}
