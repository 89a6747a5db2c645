//! SPI primitive layer.
//!
//! The flash engine talks to the flash device through the [`SpiPort`] trait:
//! word-level transmit/receive, software-controlled slave select, and
//! page-sized block transfers bounded by a timeout. On the camera board
//! the block transfers run on dedicated DMA channels; anything that can move
//! a page of bytes and give up after a deadline will do.
//!
//! [`HalSpiPort`] implements the trait on top of any `embedded-hal` 1.0
//! [`SpiBus`] plus an [`OutputPin`] used as an active-low chip select.

use crate::error::BlockError;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{self, ErrorKind, ErrorType, SpiBus};

/// Byte-exchange and block-transfer primitives of the flash SPI bus.
///
/// Implementations are used from a single execution context; the engine
/// never issues overlapping calls.
pub trait SpiPort: ErrorType {
    /// Drives the slave-select line. `true` selects the device.
    fn select(&mut self, active: bool) -> Result<(), Self::Error>;

    /// Clocks `words` out to the device.
    fn transmit(&mut self, words: &[u8]) -> Result<(), Self::Error>;

    /// Clocks `words.len()` bytes in from the device.
    fn receive(&mut self, words: &mut [u8]) -> Result<(), Self::Error>;

    /// Moves `buf.len()` bytes from the device into `buf`, failing with
    /// [`BlockError::Timeout`] if the transfer does not finish within
    /// `timeout_ms` milliseconds.
    fn block_receive(&mut self, buf: &mut [u8], timeout_ms: u32)
    -> Result<(), BlockError<Self::Error>>;

    /// Moves `buf` to the device, failing with [`BlockError::Timeout`] if the
    /// transfer does not finish within `timeout_ms` milliseconds.
    fn block_send(&mut self, buf: &[u8], timeout_ms: u32) -> Result<(), BlockError<Self::Error>>;
}

/// [`SpiPort`] over an `embedded-hal` bus and chip-select pin.
///
/// Block transfers are plain bus reads and writes; the timeout is bounded by
/// the bus implementation itself (a blocking `SpiBus` has no way to abandon a
/// transfer halfway). The bus is flushed before the chip select is released.
///
/// ## Example
///
/// ```rust
/// # use embedded_hal_mock::eh1::digital::{Mock as Pin, State as PinState, Transaction as PinTransaction};
/// # use embedded_hal_mock::eh1::spi::{Mock as Spi, Transaction as SpiTransaction};
/// use camxu::port::{HalSpiPort, SpiPort};
///
/// # let spi = Spi::new(&[SpiTransaction::write_vec(vec![0x06]), SpiTransaction::flush()]);
/// # let cs = Pin::new(&[PinTransaction::set(PinState::High), PinTransaction::set(PinState::Low), PinTransaction::set(PinState::High)]);
/// let mut port = HalSpiPort::new(spi, cs).unwrap();
/// port.select(true).unwrap();
/// port.transmit(&[0x06]).unwrap();
/// port.select(false).unwrap();
/// # let (mut spi, mut cs) = port.release();
/// # spi.done();
/// # cs.done();
/// ```
#[derive(Debug)]
pub struct HalSpiPort<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> HalSpiPort<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Creates the port and drives the chip select to its idle (high) level.
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, ErrorKind> {
        cs.set_high().map_err(|_| ErrorKind::ChipSelectFault)?;
        Ok(Self { spi, cs })
    }

    /// Releases the bus and the chip-select pin.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> ErrorType for HalSpiPort<SPI, CS> {
    type Error = ErrorKind;
}

impl<SPI, CS> SpiPort for HalSpiPort<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    fn select(&mut self, active: bool) -> Result<(), ErrorKind> {
        if active {
            self.cs.set_low().map_err(|_| ErrorKind::ChipSelectFault)
        } else {
            let flushed = self.spi.flush().map_err(|e| spi::Error::kind(&e));
            // Release the device even when the flush failed.
            self.cs.set_high().map_err(|_| ErrorKind::ChipSelectFault)?;
            flushed
        }
    }

    fn transmit(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
        self.spi.write(words).map_err(|e| spi::Error::kind(&e))
    }

    fn receive(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        self.spi.read(words).map_err(|e| spi::Error::kind(&e))
    }

    fn block_receive(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<(), BlockError<ErrorKind>> {
        self.spi
            .read(buf)
            .map_err(|e| BlockError::Bus(spi::Error::kind(&e)))
    }

    fn block_send(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<(), BlockError<ErrorKind>> {
        self.spi
            .write(buf)
            .map_err(|e| BlockError::Bus(spi::Error::kind(&e)))
    }
}
