//! Error types for the control plane.
//!
//! Every fallible operation in the crate returns [`Error`]. Errors fall into
//! three classes (see [`ErrorKind`]):
//!
//! - **Protocol**: the host asked for something the extension unit does not
//!   implement. The control pipe is stalled and no reply is sent.
//! - **Transport**: the control channel, the SPI bus or a block transfer failed.
//!   The in-progress handler is aborted and the error is handed to the caller,
//!   which treats it as unrecoverable at this layer.
//! - **Usage**: a buffer, address or configuration value failed a bounds
//!   check. Nothing is sent to the device; during a request the control pipe
//!   is stalled.
//!
//! Calibration sequence mismatches and requests for features the device
//! variant lacks are recovered locally and never show up here.

use embedded_hal::spi;
use thiserror::Error;

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum ErrorKind {
    /// Unknown selector or request code; the pipe is stalled.
    Protocol,
    /// Control channel, SPI or block-transfer failure; fatal for the request.
    Transport,
    /// A bounds or configuration check rejected the call.
    Usage,
}

/// Core error type.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Error {
    /// The request code is not one of GET_CUR, SET_CUR, GET_LEN or GET_INFO.
    #[error("unsupported request code {0:#04x}")]
    UnknownOpcode(u8),

    /// The selector does not name a control of this extension unit.
    #[error("unknown control selector {0:#04x}")]
    UnknownSelector(u8),

    /// The control channel reported a failure while sending or receiving.
    #[error("control channel transfer failed")]
    Channel,

    /// The host sent fewer bytes than the selector declares.
    #[error("short control transfer: expected {expected} bytes, received {received}")]
    ShortTransfer {
        /// Bytes the selector declares for SET_CUR.
        expected: usize,
        /// Bytes actually received.
        received: usize,
    },

    /// An SPI word transfer or slave-select change failed.
    #[error("SPI bus error: {0:?}")]
    Spi(spi::ErrorKind),

    /// A page block transfer did not complete within its timeout.
    #[error("block transfer timed out")]
    BlockTimeout,

    /// The flash never reported ready (WIP clear, WEL set).
    #[error("flash not ready after {polls} status polls")]
    NotReady {
        /// Number of polls performed before giving up.
        polls: u32,
    },

    /// A transfer buffer does not cover the pages the transfer moves.
    #[error("buffer of {actual} bytes is too small, {required} required")]
    BufferTooSmall {
        /// Bytes the transfer moves.
        required: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A reply does not fit in the control transfer buffer.
    #[error("payload of {len} bytes exceeds the {capacity} byte limit")]
    BufferTooLarge {
        /// Requested length.
        len: usize,
        /// Maximum length.
        capacity: usize,
    },

    /// The sector index is outside the flash device.
    #[error("sector {0} is outside the flash device")]
    SectorOutOfRange(u8),

    /// The transfer runs past the end of the flash device.
    #[error("transfer of {len} bytes at {address:#x} runs past the flash device")]
    OutOfBounds {
        /// First byte address of the transfer.
        address: u32,
        /// Bytes the transfer moves.
        len: usize,
    },

    /// The page size is not a power of two within the supported range.
    #[error("unsupported page size {0}")]
    InvalidPageSize(u16),

    /// The ready barrier is configured to never poll.
    #[error("ready barrier poll limit must be at least 1")]
    InvalidPollLimit,
}

impl Error {
    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownOpcode(_) | Error::UnknownSelector(_) => ErrorKind::Protocol,
            Error::Channel
            | Error::ShortTransfer { .. }
            | Error::Spi(_)
            | Error::BlockTimeout
            | Error::NotReady { .. } => ErrorKind::Transport,
            Error::BufferTooSmall { .. }
            | Error::BufferTooLarge { .. }
            | Error::SectorOutOfRange(_)
            | Error::OutOfBounds { .. }
            | Error::InvalidPageSize(_)
            | Error::InvalidPollLimit => ErrorKind::Usage,
        }
    }

    /// Whether the error must be escalated to the process-fatal path.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// Converts a bus error into [`Error::Spi`], keeping its generic kind.
pub(crate) fn spi_error<E: spi::Error>(e: E) -> Error {
    Error::Spi(e.kind())
}

/// Failure of a block transfer on an [`SpiPort`](crate::port::SpiPort).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum BlockError<E> {
    /// The transfer did not complete within the requested timeout.
    Timeout,
    /// The underlying bus failed.
    Bus(E),
}

impl<E: spi::Error> From<BlockError<E>> for Error {
    fn from(e: BlockError<E>) -> Self {
        match e {
            BlockError::Timeout => Error::BlockTimeout,
            BlockError::Bus(e) => Error::Spi(e.kind()),
        }
    }
}
