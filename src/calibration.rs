//! Calibration packet protocol.
//!
//! A calibration record is too large for one control transfer, so the host
//! moves it as a numbered sequence of fixed-size packets. Each packet carries
//! its own `id` and the sequence length `packet_total`:
//!
//! | Offset | Length | Field          |
//! |--------|--------|----------------|
//! | 0      | 2      | `magic`        |
//! | 2      | 1      | `packet_total` |
//! | 3      | 1      | `id`           |
//! | 4      | 251    | payload        |
//!
//! Packet *n* occupies the page slot *n* of [`CALIBRATION_SECTOR`]. The device
//! keeps one cursor per direction in [`TransferLoopState`]:
//!
//! - **Read**: the packet under `read_loop` is returned. When its `id` matches
//!   the cursor advances, wrapping at `packet_total`; otherwise the cursor is
//!   reset to 0 and the bytes are still returned.
//! - **Write**: the sector is erased when a sequence starts (`write_loop == 0`
//!   and the packet is id 0). A matching packet is programmed and the cursor
//!   advances; anything else resets the cursor and is dropped.
//!
//! There is no rollback. A sequence abandoned halfway leaves the sector
//! partially rewritten until a full pass from id 0 completes.

use crate::consts::{CALIBRATION_SECTOR, MAX_PAGE_SIZE_USIZE};
use crate::error::Error;
use crate::flash::FlashStorage;

/// Length of a serialized packet.
pub const PACKET_LEN: usize = 255;

/// Length of the packet header.
pub const HEADER_LEN: usize = 4;

/// Length of the packet payload.
pub const PAYLOAD_LEN: usize = PACKET_LEN - HEADER_LEN;

/// One packet of a calibration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationPacket {
    bytes: [u8; PACKET_LEN],
}

impl CalibrationPacket {
    /// Builds a packet. `payload` is truncated or zero padded to 251 bytes.
    pub fn new(magic: [u8; 2], packet_total: u8, id: u8, payload: &[u8]) -> Self {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&magic);
        bytes[2] = packet_total;
        bytes[3] = id;
        let n = payload.len().min(PAYLOAD_LEN);
        bytes[HEADER_LEN..HEADER_LEN + n].copy_from_slice(&payload[..n]);
        Self { bytes }
    }

    /// Wraps a serialized packet.
    pub fn from_bytes(bytes: [u8; PACKET_LEN]) -> Self {
        Self { bytes }
    }

    /// Serialized form.
    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.bytes
    }

    /// Format marker chosen by the host tooling.
    pub fn magic(&self) -> [u8; 2] {
        [self.bytes[0], self.bytes[1]]
    }

    /// Number of packets in the sequence.
    pub fn packet_total(&self) -> u8 {
        self.bytes[2]
    }

    /// Position of this packet in the sequence.
    pub fn id(&self) -> u8 {
        self.bytes[3]
    }

    /// Opaque calibration data.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }
}

/// Expected next packet id, one per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct TransferLoopState {
    /// Next packet the host reads.
    pub read_loop: u8,
    /// Next packet the host writes.
    pub write_loop: u8,
}

/// Outcome of [`read_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationRead {
    /// The packet carried the expected id.
    InSequence(CalibrationPacket),
    /// The packet did not carry the expected id; the read cursor was reset.
    /// The bytes are still delivered to the host.
    OutOfSequence(CalibrationPacket),
}

impl CalibrationRead {
    /// The packet read from flash, whatever its id.
    pub fn packet(&self) -> &CalibrationPacket {
        match self {
            CalibrationRead::InSequence(p) | CalibrationRead::OutOfSequence(p) => p,
        }
    }
}

/// Outcome of [`write_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CalibrationWrite {
    /// The packet was programmed; more are expected.
    Stored,
    /// The packet was programmed and completed the sequence.
    Completed,
    /// The packet was out of sequence and discarded.
    Dropped,
}

/// First page of packet slot `slot`.
fn slot_page(flash: &dyn FlashStorage, slot: u8) -> u16 {
    let per_packet = flash.pages_for(PACKET_LEN) as u16;
    flash.sector_base_page(CALIBRATION_SECTOR) + u16::from(slot) * per_packet
}

fn slot_span(flash: &dyn FlashStorage) -> usize {
    flash.pages_for(PACKET_LEN) * usize::from(flash.page_size())
}

fn advance(cursor: u8, total: u8) -> u8 {
    let next = cursor.wrapping_add(1);
    if next >= total { 0 } else { next }
}

/// Reads the packet under the read cursor and moves the cursor.
pub fn read_next(
    flash: &mut dyn FlashStorage,
    loops: &mut TransferLoopState,
) -> Result<CalibrationRead, Error> {
    let mut page = [0u8; MAX_PAGE_SIZE_USIZE];
    let start = slot_page(flash, loops.read_loop);
    let span = slot_span(flash);
    flash.read_pages(start, PACKET_LEN, &mut page[..span])?;

    let mut bytes = [0u8; PACKET_LEN];
    bytes.copy_from_slice(&page[..PACKET_LEN]);
    let packet = CalibrationPacket::from_bytes(bytes);
    let [m0, m1] = packet.magic();
    info!(
        "header: {:#x} {:#x}, total: {:#x}, id: {:#x}",
        m0,
        m1,
        packet.packet_total(),
        packet.id()
    );

    if packet.id() == loops.read_loop {
        loops.read_loop = advance(loops.read_loop, packet.packet_total());
        Ok(CalibrationRead::InSequence(packet))
    } else {
        warn!(
            "calibration read expected id {}, found {}",
            loops.read_loop,
            packet.id()
        );
        loops.read_loop = 0;
        Ok(CalibrationRead::OutOfSequence(packet))
    }
}

/// Accepts the next packet of a write sequence.
pub fn write_next(
    flash: &mut dyn FlashStorage,
    loops: &mut TransferLoopState,
    packet: &CalibrationPacket,
) -> Result<CalibrationWrite, Error> {
    let [m0, m1] = packet.magic();
    info!(
        "header: {:#x} {:#x}, total: {:#x}, id: {:#x}",
        m0,
        m1,
        packet.packet_total(),
        packet.id()
    );

    if loops.write_loop == 0 && packet.id() == 0 {
        flash.erase_sector(CALIBRATION_SECTOR)?;
        info!("erase calibration sector {}", CALIBRATION_SECTOR);
    }

    if packet.id() != loops.write_loop {
        warn!(
            "calibration write expected id {}, dropping id {}",
            loops.write_loop,
            packet.id()
        );
        loops.write_loop = 0;
        return Ok(CalibrationWrite::Dropped);
    }

    let mut page = [0xFFu8; MAX_PAGE_SIZE_USIZE];
    page[..PACKET_LEN].copy_from_slice(packet.as_bytes());
    let start = slot_page(flash, loops.write_loop);
    let span = slot_span(flash);
    flash.program_pages(start, PACKET_LEN, &page[..span])?;
    debug!("write flash page {:#x} len {}", start, PACKET_LEN);

    loops.write_loop = advance(loops.write_loop, packet.packet_total());
    if loops.write_loop == 0 {
        Ok(CalibrationWrite::Completed)
    } else {
        Ok(CalibrationWrite::Stored)
    }
}
