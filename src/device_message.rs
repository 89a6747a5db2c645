//! Device message store.
//!
//! The device message is the camera's identity record: a sensor identifier
//! followed by opaque bytes the host tooling owns. It lives at the start of
//! [`DEVICE_MESSAGE_SECTOR`] and is rewritten in place, erase first.

use crate::consts::{DEVICE_MESSAGE_SECTOR, MAX_PAGE_SIZE_USIZE};
use crate::error::Error;
use crate::flash::FlashStorage;

/// Length of the serialized record.
pub const RECORD_LEN: usize = 255;

/// Length of the sensor identifier field.
pub const SENSOR_ID_LEN: usize = 32;

/// Identity record stored in the device message sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessageRecord {
    bytes: [u8; RECORD_LEN],
}

impl Default for DeviceMessageRecord {
    fn default() -> Self {
        Self {
            bytes: [0; RECORD_LEN],
        }
    }
}

impl DeviceMessageRecord {
    /// Wraps a serialized record.
    pub fn from_bytes(bytes: [u8; RECORD_LEN]) -> Self {
        Self { bytes }
    }

    /// Serialized form, as stored in flash and sent to the host.
    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.bytes
    }

    /// Raw sensor identifier field, NUL padded.
    pub fn sensor_id_bytes(&self) -> &[u8] {
        &self.bytes[..SENSOR_ID_LEN]
    }

    /// Sensor identifier up to the first NUL, if it is valid UTF-8.
    pub fn sensor_id(&self) -> Option<&str> {
        let field = self.sensor_id_bytes();
        let end = field.iter().position(|&b| b == 0).unwrap_or(SENSOR_ID_LEN);
        core::str::from_utf8(&field[..end]).ok()
    }

    /// Replaces the sensor identifier, truncating it to 32 bytes.
    pub fn with_sensor_id(mut self, id: &str) -> Self {
        let src = id.as_bytes();
        let n = src.len().min(SENSOR_ID_LEN);
        self.bytes[..SENSOR_ID_LEN].fill(0);
        self.bytes[..n].copy_from_slice(&src[..n]);
        self
    }
}

/// Reads the stored record.
///
/// The page buffer is zeroed before the read, so bytes past a short device
/// read come back as zero rather than stale memory.
pub fn read(flash: &mut dyn FlashStorage) -> Result<DeviceMessageRecord, Error> {
    let mut page = [0u8; MAX_PAGE_SIZE_USIZE];
    let base = flash.sector_base_page(DEVICE_MESSAGE_SECTOR);
    let span = flash.pages_for(RECORD_LEN) * usize::from(flash.page_size());
    flash.read_pages(base, RECORD_LEN, &mut page[..span])?;

    let mut bytes = [0u8; RECORD_LEN];
    bytes.copy_from_slice(&page[..RECORD_LEN]);
    let record = DeviceMessageRecord::from_bytes(bytes);
    info!("read device ID: {}", record.sensor_id().unwrap_or("<invalid>"));
    Ok(record)
}

/// Erases the device message sector and programs `record` into it.
pub fn write(flash: &mut dyn FlashStorage, record: &DeviceMessageRecord) -> Result<(), Error> {
    info!("write device ID: {}", record.sensor_id().unwrap_or("<invalid>"));
    let mut page = [0xFFu8; MAX_PAGE_SIZE_USIZE];
    page[..RECORD_LEN].copy_from_slice(record.as_bytes());
    let base = flash.sector_base_page(DEVICE_MESSAGE_SECTOR);
    let span = flash.pages_for(RECORD_LEN) * usize::from(flash.page_size());

    flash.erase_sector(DEVICE_MESSAGE_SECTOR)?;
    flash.program_pages(base, RECORD_LEN, &page[..span])
}
