//! Flash transfer engine and sector eraser.
//!
//! This module provides [`FlashEngine`], which turns byte-range reads and
//! writes into page-granular SPI NOR transactions:
//!
//! 1. **Ready barrier**: write-enable, then poll the status register until
//!    the write-in-progress bit is clear and the write-enable latch is set.
//!    The poll count is bounded by [`FlashConfig::ready_poll_limit`].
//! 2. **Command**: READ (`0x03`) or PAGE PROGRAM (`0x02`) followed by a 3-byte
//!    big-endian page-aligned address.
//! 3. **Block transfer**: exactly one page through the port's block primitive,
//!    bounded by [`FlashConfig::block_timeout_ms`].
//! 4. **Advance**: next page, then sleep [`FlashConfig::inter_page_delay_ms`].
//!
//! Any failure aborts the entire multi-page operation. Nothing is retried.
//!
//! ## Over-transfer
//!
//! When the requested length is not a multiple of the page size, the last
//! chunk still moves a whole page. Callers hand in buffers that cover
//! `ceil(len / page_size) * page_size` bytes; shorter buffers are rejected
//! with [`Error::BufferTooSmall`] before anything reaches the bus.
//!
//! ## Erase
//!
//! [`FlashEngine::erase_sector`] returns as soon as the erase command is on the
//! wire. The erase is only known to be complete once a later transfer has
//! passed its ready barrier.

use crate::consts::{
    BLOCK_TRANSFER_TIMEOUT_MS, CMD_PAGE_PROGRAM, CMD_READ, CMD_READ_STATUS, CMD_SECTOR_ERASE,
    CMD_WRITE_ENABLE, DEFAULT_PAGE_SIZE, FLASH_CAPACITY, INTER_PAGE_DELAY_MS, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE, READY_POLL_INTERVAL_US, READY_POLL_LIMIT, SECTOR_COUNT, SECTOR_SIZE,
    STATUS_WEL, STATUS_WIP,
};
use crate::error::{Error, spi_error};
use crate::port::SpiPort;
use embedded_hal::delay::DelayNs;

/// Tunables of the flash engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashConfig {
    /// Page size in bytes; a power of two between 16 and 256.
    pub page_size: u16,
    /// Timeout of a single page block transfer, in milliseconds.
    pub block_timeout_ms: u32,
    /// Pause after every page, in milliseconds.
    pub inter_page_delay_ms: u32,
    /// Status polls the ready barrier performs before reporting
    /// [`Error::NotReady`].
    pub ready_poll_limit: u32,
    /// Pause between two status polls, in microseconds.
    pub ready_poll_interval_us: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            block_timeout_ms: BLOCK_TRANSFER_TIMEOUT_MS,
            inter_page_delay_ms: INTER_PAGE_DELAY_MS,
            ready_poll_limit: READY_POLL_LIMIT,
            ready_poll_interval_us: READY_POLL_INTERVAL_US,
        }
    }
}

impl FlashConfig {
    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: u16) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the ready-barrier bound. `limit` must be at least 1.
    pub fn with_ready_poll(mut self, limit: u32, interval_us: u32) -> Self {
        self.ready_poll_limit = limit;
        self.ready_poll_interval_us = interval_us;
        self
    }

    /// Sets the inter-page delay.
    pub fn with_inter_page_delay_ms(mut self, ms: u32) -> Self {
        self.inter_page_delay_ms = ms;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        let ps = self.page_size;
        if !ps.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&ps) {
            return Err(Error::InvalidPageSize(ps));
        }
        if self.ready_poll_limit == 0 {
            return Err(Error::InvalidPollLimit);
        }
        Ok(())
    }
}

/// Data and direction of a [`FlashEngine::transfer`].
#[derive(Debug)]
pub enum Transfer<'a> {
    /// Read from flash into the buffer.
    Read(&'a mut [u8]),
    /// Program the buffer into flash.
    Write(&'a [u8]),
}

impl Transfer<'_> {
    fn command(&self) -> u8 {
        match self {
            Transfer::Read(_) => CMD_READ,
            Transfer::Write(_) => CMD_PAGE_PROGRAM,
        }
    }

    fn buffer_len(&self) -> usize {
        match self {
            Transfer::Read(buf) => buf.len(),
            Transfer::Write(buf) => buf.len(),
        }
    }
}

/// Page-addressed flash operations, as used by the stores and the dispatcher.
///
/// Implemented by [`FlashEngine`]; object safe so handlers can hold a
/// `&mut dyn FlashStorage`.
pub trait FlashStorage {
    /// Page size in bytes.
    fn page_size(&self) -> u16;

    /// Reads `len` bytes starting at page `page` into `buf`.
    fn read_pages(&mut self, page: u16, len: usize, buf: &mut [u8]) -> Result<(), Error>;

    /// Programs `len` bytes from `buf` starting at page `page`.
    fn program_pages(&mut self, page: u16, len: usize, buf: &[u8]) -> Result<(), Error>;

    /// Starts erasing sector `sector` without waiting for completion.
    fn erase_sector(&mut self, sector: u8) -> Result<(), Error>;

    /// Whether the device reports a write or erase in progress.
    fn is_busy(&mut self) -> Result<bool, Error>;

    /// First page of sector `sector`.
    fn sector_base_page(&self, sector: u8) -> u16 {
        (u32::from(sector) * SECTOR_SIZE / u32::from(self.page_size())) as u16
    }

    /// Number of pages a record of `len` bytes spans.
    fn pages_for(&self, len: usize) -> usize {
        len.div_ceil(usize::from(self.page_size()))
    }
}

/// Page-granular SPI NOR flash driver.
///
/// ## Type Parameters
///
/// - `P`: the [`SpiPort`] carrying word and block transfers
/// - `D`: an [`embedded_hal::delay::DelayNs`] used for the inter-page delay
///   and the ready-barrier poll interval
#[derive(Debug)]
pub struct FlashEngine<P, D> {
    port: P,
    delay: D,
    config: FlashConfig,
}

impl<P, D> FlashEngine<P, D>
where
    P: SpiPort,
    D: DelayNs,
{
    /// Creates the engine, validating the negotiated page size.
    pub fn new(port: P, delay: D, config: FlashConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            port,
            delay,
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Mutable access to the port, e.g. for board-level diagnostics.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Releases the port and the delay.
    pub fn release(self) -> (P, D) {
        (self.port, self.delay)
    }

    /// Runs `f` with the device selected, releasing it afterwards whatever
    /// `f` returned.
    fn selected<T>(
        &mut self,
        f: impl FnOnce(&mut P) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.port.select(true).map_err(spi_error)?;
        let result = f(&mut self.port);
        let released = self.port.select(false).map_err(spi_error);
        let value = result?;
        released?;
        Ok(value)
    }

    /// Sets the write-enable latch.
    pub fn write_enable(&mut self) -> Result<(), Error> {
        self.selected(|port| port.transmit(&[CMD_WRITE_ENABLE]).map_err(spi_error))
            .inspect_err(|_| error!("SPI write enable command failed"))
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<u8, Error> {
        self.selected(|port| {
            port.transmit(&[CMD_READ_STATUS]).map_err(spi_error)?;
            let mut status = [0u8; 1];
            port.receive(&mut status).map_err(spi_error)?;
            Ok(status[0])
        })
        .inspect_err(|_| error!("SPI read status command failed"))
    }

    /// One step of the ready barrier.
    ///
    /// Issues write-enable and reads the status register. Returns
    /// `Err(nb::Error::WouldBlock)` while the device is busy or the
    /// write-enable latch did not stick.
    pub fn poll_ready(&mut self) -> nb::Result<(), Error> {
        self.write_enable()?;
        let status = self.read_status()?;
        if status & STATUS_WIP != 0 || status & STATUS_WEL == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(())
    }

    /// Blocks until the device is ready, polling at most
    /// [`FlashConfig::ready_poll_limit`] times.
    pub fn wait_ready(&mut self) -> Result<(), Error> {
        let limit = self.config.ready_poll_limit;
        for _ in 0..limit {
            match self.poll_ready() {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => self.delay.delay_us(self.config.ready_poll_interval_us),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        error!("flash still busy after {} status polls", limit);
        Err(Error::NotReady { polls: limit })
    }

    /// Moves `len` bytes between flash and `data`, starting at page `page`.
    ///
    /// See the [module documentation](self) for the per-page sequence and
    /// the over-transfer rule.
    pub fn transfer(&mut self, page: u16, len: usize, data: Transfer<'_>) -> Result<(), Error> {
        if len == 0 {
            return Ok(());
        }
        let page_size = usize::from(self.config.page_size);
        let pages = len.div_ceil(page_size);
        let required = pages * page_size;
        let actual = data.buffer_len();
        if actual < required {
            return Err(Error::BufferTooSmall { required, actual });
        }
        let mut address = u32::from(page) * u32::from(self.config.page_size);
        if address as usize + required > FLASH_CAPACITY as usize {
            return Err(Error::OutOfBounds { address, len: required });
        }

        debug!(
            "SPI access - addr: {:#x}, size: {:#x}, pages: {}",
            address,
            len,
            pages
        );

        let command = data.command();
        let timeout = self.config.block_timeout_ms;
        let mut data = data;
        for chunk in 0..pages {
            self.wait_ready()?;

            let range = chunk * page_size..(chunk + 1) * page_size;
            let [_, a2, a1, a0] = address.to_be_bytes();
            self.selected(|port| {
                port.transmit(&[command, a2, a1, a0]).map_err(spi_error)?;
                match &mut data {
                    Transfer::Read(buf) => port.block_receive(&mut buf[range], timeout)?,
                    Transfer::Write(buf) => port.block_send(&buf[range], timeout)?,
                }
                Ok(())
            })
            .inspect_err(|_| error!("SPI page transfer at {:#x} failed", address))?;

            address += u32::from(self.config.page_size);
            self.delay.delay_ms(self.config.inter_page_delay_ms);
        }
        Ok(())
    }

    /// Reads `len` bytes starting at page `page` into `buf`.
    pub fn read_pages(&mut self, page: u16, len: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.transfer(page, len, Transfer::Read(buf))
    }

    /// Programs `len` bytes from `buf` starting at page `page`.
    ///
    /// The target pages must have been erased.
    pub fn program_pages(&mut self, page: u16, len: usize, buf: &[u8]) -> Result<(), Error> {
        self.transfer(page, len, Transfer::Write(buf))
    }

    /// Issues a 64 KiB sector erase and returns without waiting.
    pub fn erase_sector(&mut self, sector: u8) -> Result<(), Error> {
        if sector >= SECTOR_COUNT {
            return Err(Error::SectorOutOfRange(sector));
        }
        self.write_enable()?;
        let [_, a2, a1, a0] = (u32::from(sector) * SECTOR_SIZE).to_be_bytes();
        self.selected(|port| {
            port.transmit(&[CMD_SECTOR_ERASE, a2, a1, a0])
                .map_err(spi_error)
        })?;
        info!("erase sector {}", sector);
        Ok(())
    }

    /// Whether a write or erase is in progress. Does not erase anything.
    pub fn is_busy(&mut self) -> Result<bool, Error> {
        Ok(self.read_status()? & STATUS_WIP != 0)
    }
}

impl<P, D> FlashStorage for FlashEngine<P, D>
where
    P: SpiPort,
    D: DelayNs,
{
    fn page_size(&self) -> u16 {
        self.config.page_size
    }

    fn read_pages(&mut self, page: u16, len: usize, buf: &mut [u8]) -> Result<(), Error> {
        FlashEngine::read_pages(self, page, len, buf)
    }

    fn program_pages(&mut self, page: u16, len: usize, buf: &[u8]) -> Result<(), Error> {
        FlashEngine::program_pages(self, page, len, buf)
    }

    fn erase_sector(&mut self, sector: u8) -> Result<(), Error> {
        FlashEngine::erase_sector(self, sector)
    }

    fn is_busy(&mut self) -> Result<bool, Error> {
        FlashEngine::is_busy(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EmulatedNor, NorEvent, RecordingDelay};
    use embedded_hal::spi::ErrorKind;

    fn engine(nor: EmulatedNor) -> FlashEngine<EmulatedNor, RecordingDelay> {
        FlashEngine::new(nor, RecordingDelay::default(), FlashConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_page_size() {
        for ps in [0u16, 8, 100, 512] {
            let result = FlashEngine::new(
                EmulatedNor::new(),
                RecordingDelay::default(),
                FlashConfig::default().with_page_size(ps),
            );
            assert_eq!(result.err(), Some(Error::InvalidPageSize(ps)));
        }
    }

    #[test]
    fn test_rejects_zero_poll_limit() {
        let result = FlashEngine::new(
            EmulatedNor::new(),
            RecordingDelay::default(),
            FlashConfig::default().with_ready_poll(0, 100),
        );
        assert_eq!(result.err(), Some(Error::InvalidPollLimit));

        let mut flash = FlashEngine::new(
            EmulatedNor::new(),
            RecordingDelay::default(),
            FlashConfig::default().with_ready_poll(1, 100),
        )
        .unwrap();
        let mut buf = [0u8; 256];
        flash.read_pages(0, buf.len(), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut flash = engine(EmulatedNor::new());
        let data: Vec<u8> = (0..1024u32).map(|i| (i * 7 + 3) as u8).collect();

        flash.program_pages(0x400, data.len(), &data).unwrap();
        let mut back = vec![0u8; data.len()];
        flash.read_pages(0x400, back.len(), &mut back).unwrap();

        assert_eq!(back, data);
    }

    #[test]
    fn test_erase_then_read_is_all_ones() {
        let mut flash = engine(EmulatedNor::new());
        let zeros = vec![0u8; 512];
        flash.program_pages(0x500, zeros.len(), &zeros).unwrap();

        flash.erase_sector(5).unwrap();
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        flash.read_pages(0x500, sector.len(), &mut sector).unwrap();

        assert!(sector.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_chunk_sequence_and_delays() {
        let mut flash = engine(EmulatedNor::new());
        let mut buf = [0u8; 512];
        flash.read_pages(2, 300, &mut buf).unwrap();

        let (nor, delay) = flash.release();
        // Two pages, each behind its own ready barrier.
        assert_eq!(
            nor.events(),
            &[
                NorEvent::WriteEnable,
                NorEvent::Read { address: 0x200, len: 256 },
                NorEvent::WriteEnable,
                NorEvent::Read { address: 0x300, len: 256 },
            ]
        );
        assert_eq!(delay.total_ms(), 20);
    }

    #[test]
    fn test_short_buffer_fails_closed() {
        let mut flash = engine(EmulatedNor::new());
        let mut buf = [0u8; 300];

        let result = flash.read_pages(0, 300, &mut buf);

        assert_eq!(result, Err(Error::BufferTooSmall { required: 512, actual: 300 }));
        assert!(flash.release().0.events().is_empty());
    }

    #[test]
    fn test_unaligned_length_moves_whole_pages() {
        let mut flash = engine(EmulatedNor::new());
        let mut page = [0xAAu8; 256];
        page[..10].copy_from_slice(b"calibrated");

        flash.program_pages(0x10, 10, &page).unwrap();
        let mut back = [0u8; 256];
        flash.read_pages(0x10, 256, &mut back).unwrap();

        // The bytes past the logical length were written too.
        assert_eq!(back, page);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = engine(EmulatedNor::new());
        let mut buf = [0u8; 512];

        let result = flash.read_pages(0x7FF, 512, &mut buf);

        assert_eq!(result, Err(Error::OutOfBounds { address: 0x7_FF00, len: 512 }));
    }

    #[test]
    fn test_zero_length_is_noop() {
        let mut flash = engine(EmulatedNor::new());
        flash.read_pages(0, 0, &mut []).unwrap();
        assert!(flash.release().0.events().is_empty());
    }

    #[test]
    fn test_ready_barrier_waits_for_erase() {
        let mut flash = engine(EmulatedNor::new().with_busy_polls(3));
        flash.erase_sector(4).unwrap();
        assert!(flash.is_busy().unwrap());

        let page = [0x42u8; 256];
        flash.program_pages(0x400, 256, &page).unwrap();

        let (nor, delay) = flash.release();
        assert_eq!(nor.sector_erases(4), 1);
        assert_eq!(nor.memory(0x4_0000, 256), &page[..]);
        // One busy poll consumed by is_busy, two more by the barrier.
        assert_eq!(delay.total_us(), 2 * 100 + 10_000);
    }

    #[test]
    fn test_ready_barrier_is_bounded() {
        let config = FlashConfig::default().with_ready_poll(5, 10);
        let mut flash =
            FlashEngine::new(EmulatedNor::new().stuck_busy(), RecordingDelay::default(), config)
                .unwrap();
        let mut buf = [0u8; 256];

        let result = flash.read_pages(0, 256, &mut buf);

        assert_eq!(result, Err(Error::NotReady { polls: 5 }));
        let (nor, delay) = flash.release();
        assert_eq!(delay.total_us(), 50);
        assert!(!nor.is_selected());
    }

    #[test]
    fn test_block_timeout_aborts_whole_transfer() {
        let mut flash = engine(EmulatedNor::new().fail_block_after(1));
        let data = [0x11u8; 768];

        let result = flash.program_pages(0x400, data.len(), &data);

        assert_eq!(result, Err(Error::BlockTimeout));
        let nor = flash.release().0;
        assert!(!nor.is_selected());
        assert_eq!(nor.memory(0x4_0000, 256), &data[..256]);
        // No further page was attempted after the failure.
        assert!(nor.memory(0x4_0100, 512).iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_bus_fault_surfaces_as_spi_error() {
        let mut flash = engine(EmulatedNor::new().fail_status_reads());

        assert_eq!(flash.is_busy(), Err(Error::Spi(ErrorKind::Other)));
        assert!(!flash.release().0.is_selected());
    }

    #[test]
    fn test_erase_rejects_missing_sector() {
        let mut flash = engine(EmulatedNor::new());
        assert_eq!(flash.erase_sector(8), Err(Error::SectorOutOfRange(8)));
    }

    #[test]
    fn test_smaller_page_size() {
        let config = FlashConfig::default().with_page_size(64);
        let mut flash =
            FlashEngine::new(EmulatedNor::new(), RecordingDelay::default(), config).unwrap();
        let data: Vec<u8> = (0..200u8).collect();
        let mut padded = [0xFFu8; 256];
        padded[..200].copy_from_slice(&data);

        flash.program_pages(0x1000, 200, &padded).unwrap();
        let mut back = [0u8; 256];
        flash.read_pages(0x1000, 200, &mut back).unwrap();

        assert_eq!(&back[..200], &data[..]);
        assert_eq!(flash.pages_for(200), 4);
        assert_eq!(flash.sector_base_page(5), 0x1400);
    }
}
