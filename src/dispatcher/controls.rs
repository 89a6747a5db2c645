//! Selector handlers.

use super::{Context, Control, DeviceInfo, Reply};
use crate::calibration::{self, CalibrationPacket, CalibrationRead, CalibrationWrite, PACKET_LEN};
use crate::consts::{BOOT_SECTOR, DEVICE_MESSAGE_SECTOR, IMU_RAW_LEN, IMU_SAMPLE_LEN};
use crate::device_message::{self, DeviceMessageRecord, RECORD_LEN};
use crate::error::Error;
use crate::session::ControlFlags;

/// Copies the first `N` bytes of a data stage.
fn take<const N: usize>(data: &[u8]) -> Result<[u8; N], Error> {
    data.get(..N)
        .and_then(|d| d.try_into().ok())
        .ok_or(Error::ShortTransfer {
            expected: N,
            received: data.len(),
        })
}

const IMU_OP_READ: u8 = 0;
const IMU_OP_WRITE: u8 = 1;

/// Single IMU register read or write.
#[derive(Debug)]
pub(crate) struct ImuRegister;

impl Control for ImuRegister {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        5
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        reply.push_slice(&[0, 0, 0, 0, cx.session.imu_value])
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        // Registers are 8 bits wide; the high value byte is ignored.
        let [op, a1, a0, _, value] = take::<5>(data)?;
        let addr = u16::from_be_bytes([a1, a0]);
        match op {
            IMU_OP_READ => cx.session.imu_value = cx.board.imu_read_register(addr),
            IMU_OP_WRITE => {
                cx.board.imu_write_register(addr, value);
                cx.session.imu_value = value;
                info!("IMU register write {:#x} = {:#x}", addr, value);
            }
            _ => warn!("unknown IMU register op {}", op),
        }
        Ok(())
    }
}

/// IMU burst sample: accelerometer, gyroscope and timestamp.
#[derive(Debug)]
pub(crate) struct ImuBurst;

impl Control for ImuBurst {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        IMU_SAMPLE_LEN
    }

    fn set_len(&self, _: &DeviceInfo) -> usize {
        0
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        let mut raw = [0u8; IMU_RAW_LEN];
        match cx.board.imu_read_burst(&mut raw) {
            Ok(()) => {
                let sample = &mut cx.session.last_sample;
                // Skip the two temperature bytes between accel and gyro.
                sample[..6].copy_from_slice(&raw[..6]);
                sample[6..12].copy_from_slice(&raw[8..14]);
                sample[12..].copy_from_slice(&cx.board.now_ms().to_be_bytes());
            }
            Err(_) => error!("get IMU data failed, resending last sample"),
        }
        reply.push_slice(&cx.session.last_sample)
    }

    fn set_current(&self, _: &mut Context<'_>, _: &[u8]) -> Result<(), Error> {
        debug!("IMU burst set ignored");
        Ok(())
    }
}

/// Erase trigger for the boot and device message sectors.
#[derive(Debug)]
pub(crate) struct FlashErase;

impl Control for FlashErase {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        1
    }

    fn get_current(&self, _: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        reply.push_slice(&[0])
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        match take::<1>(data)? {
            [b'E'] => {
                debug!("erase boot flash");
                cx.flash.erase_sector(BOOT_SECTOR)
            }
            [b'D'] => {
                debug!("erase device ID");
                cx.flash.erase_sector(DEVICE_MESSAGE_SECTOR)
            }
            [other] => {
                debug!("flash erase ignored for {:#x}", other);
                Ok(())
            }
        }
    }
}

const CAMERA_READ_MARKER: u8 = 0x80;

/// Camera-sensor register access.
///
/// SET_CUR either writes a register or, with the top bit of the first byte
/// set, latches the address the next GET_CUR reads.
#[derive(Debug)]
pub(crate) struct CameraRegister;

impl Control for CameraRegister {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        4
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        let addr = cx.session.camera_read_addr;
        let value = cx.board.camera_read_register(addr);
        reply.push_slice(&addr.to_be_bytes())?;
        reply.push_slice(&value.to_be_bytes())
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        let [a1, a0, v1, v0] = take::<4>(data)?;
        if a1 & CAMERA_READ_MARKER == 0 {
            let addr = u16::from_be_bytes([a1, a0]);
            cx.board.camera_write_register(addr, u16::from_be_bytes([v1, v0]));
            cx.board.sleep_ms(1);
        } else {
            // Latched without the marker: GET_CUR echoes and reads the plain
            // address, not the marked one the host sent.
            cx.session.camera_read_addr = u16::from_be_bytes([a1 & !CAMERA_READ_MARKER, a0]);
        }
        Ok(())
    }
}

/// Firmware version string.
#[derive(Debug)]
pub(crate) struct FirmwareVersion;

impl Control for FirmwareVersion {
    fn reply_len(&self, info: &DeviceInfo) -> usize {
        info.firmware_version().len()
    }

    fn set_len(&self, _: &DeviceInfo) -> usize {
        1
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        reply.push_slice(cx.info.firmware_version().as_bytes())
    }

    fn set_current(&self, _: &mut Context<'_>, _: &[u8]) -> Result<(), Error> {
        debug!("firmware version set ignored");
        Ok(())
    }
}

/// Hardware version number.
#[derive(Debug)]
pub(crate) struct HardwareVersion;

impl Control for HardwareVersion {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        4
    }

    fn set_len(&self, _: &DeviceInfo) -> usize {
        1
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        reply.push_slice(&cx.info.hardware_version().to_be_bytes())
    }

    fn set_current(&self, _: &mut Context<'_>, _: &[u8]) -> Result<(), Error> {
        debug!("hardware version set ignored");
        Ok(())
    }
}

/// Firmware control flags.
#[derive(Debug)]
pub(crate) struct Flags;

impl Control for Flags {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        4
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        reply.push_slice(&cx.session.flags.bits().to_be_bytes())
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        let flags = ControlFlags::from_bits_retain(u32::from_be_bytes(take(data)?));
        cx.session.set_flags(flags);
        debug!("control flags set {:#x}", flags.bits());
        Ok(())
    }
}

/// Reserved bit the infrared controller requires in the low byte.
const IR_RESERVED: u8 = 0x80;

/// Infrared illumination control, on sensors that have it.
#[derive(Debug)]
pub(crate) struct IrControl;

impl Control for IrControl {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        4
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        if cx.board.variant().supports_ir() {
            reply.push_slice(&cx.session.ir_control.to_be_bytes())
        } else {
            error!("sensor {:?} has no infrared control", cx.board.variant());
            reply.push_slice(&[0; 4])
        }
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        let mut word = take::<4>(data)?;
        if !cx.board.variant().supports_ir() {
            error!("sensor {:?} has no infrared control", cx.board.variant());
            return Ok(());
        }
        word[3] |= IR_RESERVED;
        let value = u32::from_be_bytes(word);
        cx.session.ir_control = value;
        cx.board.apply_ir_control(value);
        debug!("IR control set {:#x}", value);
        Ok(())
    }
}

/// Device identity record.
#[derive(Debug)]
pub(crate) struct DeviceMessage;

impl Control for DeviceMessage {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        RECORD_LEN
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        let record = device_message::read(cx.flash)?;
        reply.push_slice(record.as_bytes())
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        let record = DeviceMessageRecord::from_bytes(take(data)?);
        device_message::write(cx.flash, &record)
    }
}

const SCRATCH_LEN: usize = 255;

/// Two 32-bit debug scratch words in a 255-byte frame.
#[derive(Debug)]
pub(crate) struct DebugScratch;

impl Control for DebugScratch {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        SCRATCH_LEN
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        let [a, b] = cx.session.debug_scratch;
        let mut frame = [0u8; SCRATCH_LEN];
        frame[..4].copy_from_slice(&a.to_le_bytes());
        frame[4..8].copy_from_slice(&b.to_le_bytes());
        debug!("debug read value");
        reply.push_slice(&frame)
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        let words = take::<8>(data)?;
        let [a0, a1, a2, a3, b0, b1, b2, b3] = words;
        cx.session.debug_scratch = [
            u32::from_le_bytes([a0, a1, a2, a3]),
            u32::from_le_bytes([b0, b1, b2, b3]),
        ];
        debug!("debug write value");
        Ok(())
    }
}

/// Calibration packet sequence.
#[derive(Debug)]
pub(crate) struct Calibration;

impl Control for Calibration {
    fn reply_len(&self, _: &DeviceInfo) -> usize {
        PACKET_LEN
    }

    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error> {
        let read = calibration::read_next(cx.flash, &mut cx.session.loops)?;
        if let CalibrationRead::InSequence(packet) = &read {
            info!("read calibration packet {}/{}", packet.id(), packet.packet_total());
        }
        reply.push_slice(read.packet().as_bytes())
    }

    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error> {
        let packet = CalibrationPacket::from_bytes(take(data)?);
        match calibration::write_next(cx.flash, &mut cx.session.loops, &packet)? {
            CalibrationWrite::Completed => info!("calibration record complete"),
            CalibrationWrite::Stored | CalibrationWrite::Dropped => {}
        }
        Ok(())
    }
}
