//! # camxu
//!
//! A portable, no_std control plane for the vendor extension unit of a USB
//! camera: the command dispatcher behind the extension-unit selectors, a
//! page-granular SPI NOR flash engine, and the stores built on it.
//!
//! The crate is built on:
//! - `embedded-hal` 1.0 traits for the SPI bus, chip select and delays
//! - `nb` for the flash ready barrier
//! - `heapless` for fixed-capacity control replies
//! - `critical-section` to share the dispatcher with a USB callback
//!
//! ## Crate features
//! | Feature                     | Description |
//! |-----------------------------|-------------|
//! | `std`                       | Disables `#![no_std]` |
//! | `global-dispatch` (default) | `critical_section` helpers in [`global`] |
//! | `defmt-0-3`                 | Uses `defmt` logging |
//! | `log`                       | Uses `log` logging |
//!
//! ## Components
//!
//! - [`port`]: the SPI primitives ([`port::SpiPort`]) and an `embedded-hal`
//!   adapter
//! - [`flash`]: page transfers with a bounded ready barrier, sector erase
//! - [`device_message`]: the identity record in sector 4
//! - [`calibration`]: the sequenced calibration packets in sector 5
//! - [`dispatcher`]: selector decoding and the per-selector handlers
//! - [`session`]: state the handlers keep between requests
//! - [`platform`]: the control pipe and sensor board the firmware provides
//!
//! ## Usage
//!
//! ```rust,ignore
//! use camxu::dispatcher::{DeviceInfo, Dispatcher};
//! use camxu::flash::{FlashConfig, FlashEngine};
//! use camxu::port::HalSpiPort;
//!
//! let port = HalSpiPort::new(spi, flash_cs)?;
//! let flash = FlashEngine::new(port, delay, FlashConfig::default())?;
//! let mut eu = Dispatcher::new(flash, ep0, board, DeviceInfo::new("XP-1.4.2", 0x0003_0001)?);
//!
//! // For every class request addressed to the extension unit:
//! eu.dispatch(selector, request)?;
//! ```
//!
//! ## Integration Notes
//!
//! - Requests are served one at a time from a single context; nothing in the
//!   crate locks.
//! - Flash operations block: a multi-page transfer sleeps 10 ms per page.
//! - A sector erase returns immediately; the next transfer waits it out.
//! - Errors whose [`Error::is_fatal`](error::Error::is_fatal) is true leave the
//!   request unanswered; the firmware decides whether to halt or reset.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

pub use embedded_hal;
pub use heapless;

#[cfg(feature = "global-dispatch")]
pub use critical_section;

pub mod calibration;
pub mod consts;
pub mod device_message;
pub mod dispatcher;
pub mod error;
pub mod flash;
#[cfg(feature = "global-dispatch")]
pub mod global;
#[cfg(test)]
pub mod mock;
pub mod platform;
pub mod port;
pub mod session;
