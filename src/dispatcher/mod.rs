//! Extension-unit command dispatcher.
//!
//! The host addresses the extension unit with a *selector* (which control)
//! and a UVC class *request* (what to do with it). [`Dispatcher::dispatch`]
//! decodes both, looks the selector up in the handler table and runs the
//! request against it:
//!
//! | Request  | Data stage                                   |
//! |----------|----------------------------------------------|
//! | GET_CUR  | device → host, [`Control::reply_len`] bytes  |
//! | SET_CUR  | host → device, [`Control::set_len`] bytes    |
//! | GET_LEN  | device → host, reply length as `u16` LE      |
//! | GET_INFO | device → host, one byte, always `3`          |
//!
//! Unknown selectors and requests stall the control pipe and send nothing,
//! as does a request a handler rejects (a reply or data stage that does not
//! fit the control buffer).
//! A failure on the control channel, the SPI bus or a block transfer aborts
//! the request before any reply is sent and is returned to the caller, which
//! decides whether to halt or reset.
//!
//! ## Selectors
//!
//! | Code   | Selector                     | Reply | GET_CUR                        | SET_CUR                                   |
//! |--------|------------------------------|-------|--------------------------------|-------------------------------------------|
//! | `0x01` | [`Selector::ImuRegister`]    | 5     | last register value            | `[op, addr BE16, value BE16]`             |
//! | `0x02` | [`Selector::ImuBurst`]       | 16    | fresh accel, gyro, timestamp   | ignored                                   |
//! | `0x03` | [`Selector::FlashErase`]     | 1     | zero                           | `'E'` boot sector, `'D'` device message   |
//! | `0x04` | [`Selector::CameraRegister`] | 4     | address and value, BE16 each   | write, or latch a read address            |
//! | `0x05` | [`Selector::FirmwareVersion`]| str   | version string                 | ignored                                   |
//! | `0x06` | [`Selector::HardwareVersion`]| 4     | version number, BE32           | ignored                                   |
//! | `0x07` | [`Selector::ControlFlags`]   | 4     | control flags, BE32            | control flags, BE32                       |
//! | `0x08` | [`Selector::IrControl`]      | 4     | infrared control word, BE32    | infrared control word, BE32               |
//! | `0x09` | [`Selector::DeviceMessage`]  | 255   | stored identity record         | erase and rewrite the record              |
//! | `0x0A` | [`Selector::DebugScratch`]   | 255   | two LE32 scratch words         | two LE32 scratch words                    |
//! | `0x0B` | [`Selector::Calibration`]    | 255   | next calibration packet        | next calibration packet                   |

mod controls;

use crate::consts::{
    CAPABILITY_GET_SET, MAX_CONTROL_LEN, UVC_GET_CUR, UVC_GET_INFO, UVC_GET_LEN, UVC_SET_CUR,
};
use crate::error::Error;
use crate::flash::{FlashEngine, FlashStorage};
use crate::platform::{Board, ControlChannel};
use crate::port::SpiPort;
use crate::session::Session;
use core::fmt;
use embedded_hal::delay::DelayNs;
use heapless::Vec;

/// Controls of the extension unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[repr(u8)]
pub enum Selector {
    /// Single IMU register access.
    ImuRegister = 0x01,
    /// IMU burst sample.
    ImuBurst = 0x02,
    /// Flash sector erase trigger.
    FlashErase = 0x03,
    /// Camera-sensor register access.
    CameraRegister = 0x04,
    /// Firmware version string.
    FirmwareVersion = 0x05,
    /// Hardware version number.
    HardwareVersion = 0x06,
    /// Firmware control flags.
    ControlFlags = 0x07,
    /// Infrared illumination control.
    IrControl = 0x08,
    /// Device identity record.
    DeviceMessage = 0x09,
    /// Debug scratch words.
    DebugScratch = 0x0A,
    /// Calibration packets.
    Calibration = 0x0B,
}

impl TryFrom<u8> for Selector {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        Ok(match code {
            0x01 => Selector::ImuRegister,
            0x02 => Selector::ImuBurst,
            0x03 => Selector::FlashErase,
            0x04 => Selector::CameraRegister,
            0x05 => Selector::FirmwareVersion,
            0x06 => Selector::HardwareVersion,
            0x07 => Selector::ControlFlags,
            0x08 => Selector::IrControl,
            0x09 => Selector::DeviceMessage,
            0x0A => Selector::DebugScratch,
            0x0B => Selector::Calibration,
            _ => return Err(Error::UnknownSelector(code)),
        })
    }
}

/// UVC class requests the extension unit answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Opcode {
    /// GET_CUR
    GetCurrent,
    /// SET_CUR
    SetCurrent,
    /// GET_LEN
    GetLength,
    /// GET_INFO
    GetInfo,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        match code {
            UVC_GET_CUR => Ok(Opcode::GetCurrent),
            UVC_SET_CUR => Ok(Opcode::SetCurrent),
            UVC_GET_LEN => Ok(Opcode::GetLength),
            UVC_GET_INFO => Ok(Opcode::GetInfo),
            _ => Err(Error::UnknownOpcode(code)),
        }
    }
}

/// Identity the version selectors report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    firmware_version: &'static str,
    hardware_version: u32,
}

impl DeviceInfo {
    /// Creates the device identity.
    ///
    /// The firmware version is sent whole in one GET_CUR reply, so it must
    /// fit in [`MAX_CONTROL_LEN`] bytes; longer strings fail with
    /// [`Error::BufferTooLarge`].
    pub const fn new(
        firmware_version: &'static str,
        hardware_version: u32,
    ) -> Result<Self, Error> {
        if firmware_version.len() > MAX_CONTROL_LEN {
            return Err(Error::BufferTooLarge {
                len: firmware_version.len(),
                capacity: MAX_CONTROL_LEN,
            });
        }
        Ok(Self {
            firmware_version,
            hardware_version,
        })
    }

    /// Firmware version string, sent without a terminator.
    pub const fn firmware_version(&self) -> &'static str {
        self.firmware_version
    }

    /// Hardware version number.
    pub const fn hardware_version(&self) -> u32 {
        self.hardware_version
    }
}

/// Length-checked GET_CUR reply buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    buf: Vec<u8, MAX_CONTROL_LEN>,
}

impl Reply {
    /// An empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data`, failing without change if it does not fit.
    pub fn push_slice(&mut self, data: &[u8]) -> Result<(), Error> {
        let len = self.buf.len() + data.len();
        self.buf
            .extend_from_slice(data)
            .map_err(|_| Error::BufferTooLarge {
                len,
                capacity: MAX_CONTROL_LEN,
            })
    }

    /// Reply bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Reply length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// What a handler may touch while serving a request.
pub struct Context<'a> {
    /// Flash storage.
    pub flash: &'a mut dyn FlashStorage,
    /// Sensor board.
    pub board: &'a mut dyn Board,
    /// Session state.
    pub session: &'a mut Session,
    /// Device identity.
    pub info: &'a DeviceInfo,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("session", &self.session)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// The four operations every selector supports.
pub trait Control {
    /// Length of the GET_CUR reply.
    fn reply_len(&self, info: &DeviceInfo) -> usize;

    /// Bytes SET_CUR receives from the host.
    fn set_len(&self, info: &DeviceInfo) -> usize {
        self.reply_len(info)
    }

    /// Fills the GET_CUR reply.
    fn get_current(&self, cx: &mut Context<'_>, reply: &mut Reply) -> Result<(), Error>;

    /// Applies the SET_CUR data stage.
    fn set_current(&self, cx: &mut Context<'_>, data: &[u8]) -> Result<(), Error>;

    /// GET_LEN reply: the GET_CUR length, little endian.
    fn get_length(&self, info: &DeviceInfo) -> [u8; 2] {
        (self.reply_len(info) as u16).to_le_bytes()
    }

    /// GET_INFO reply.
    fn get_info(&self) -> u8 {
        CAPABILITY_GET_SET
    }
}

/// Handler table.
pub fn control_for(selector: Selector) -> &'static dyn Control {
    match selector {
        Selector::ImuRegister => &controls::ImuRegister,
        Selector::ImuBurst => &controls::ImuBurst,
        Selector::FlashErase => &controls::FlashErase,
        Selector::CameraRegister => &controls::CameraRegister,
        Selector::FirmwareVersion => &controls::FirmwareVersion,
        Selector::HardwareVersion => &controls::HardwareVersion,
        Selector::ControlFlags => &controls::Flags,
        Selector::IrControl => &controls::IrControl,
        Selector::DeviceMessage => &controls::DeviceMessage,
        Selector::DebugScratch => &controls::DebugScratch,
        Selector::Calibration => &controls::Calibration,
    }
}

/// Serves extension-unit requests.
///
/// ## Type Parameters
///
/// - `P`, `D`: port and delay of the [`FlashEngine`]
/// - `C`: the [`ControlChannel`] requests arrive on
/// - `B`: the sensor [`Board`]
///
/// ## Example
///
/// ```rust,ignore
/// let flash = FlashEngine::new(port, delay, FlashConfig::default())?;
/// let info = DeviceInfo::new("XP-1.4.2", 0x0003_0001)?;
/// let mut dispatcher = Dispatcher::new(flash, ep0, board, info);
///
/// // From the USB setup-request callback:
/// if let Err(e) = dispatcher.dispatch(selector, request) {
///     if e.is_fatal() {
///         reset();
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Dispatcher<P, D, C, B> {
    flash: FlashEngine<P, D>,
    channel: C,
    board: B,
    session: Session,
    info: DeviceInfo,
}

impl<P, D, C, B> Dispatcher<P, D, C, B>
where
    P: SpiPort,
    D: DelayNs,
    C: ControlChannel,
    B: Board,
{
    /// Creates a dispatcher with a fresh [`Session`].
    pub fn new(flash: FlashEngine<P, D>, channel: C, board: B, info: DeviceInfo) -> Self {
        Self {
            flash,
            channel,
            board,
            session: Session::new(),
            info,
        }
    }

    /// Decodes and serves one request.
    ///
    /// Unknown selector or request codes stall the pipe and return
    /// [`Error::UnknownSelector`] or [`Error::UnknownOpcode`].
    pub fn dispatch(&mut self, selector: u8, request: u8) -> Result<(), Error> {
        let decoded = Selector::try_from(selector)
            .and_then(|s| Opcode::try_from(request).map(|op| (s, op)));
        let (selector, opcode) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                error!("unknown command: selector {:#x}, request {:#x}", selector, request);
                self.channel.stall();
                return Err(e);
            }
        };
        self.handle(selector, opcode)
    }

    /// Serves one decoded request.
    ///
    /// Transport failures are returned without touching the pipe; any other
    /// rejection stalls it so the host is not left waiting for a data stage.
    pub fn handle(&mut self, selector: Selector, opcode: Opcode) -> Result<(), Error> {
        self.serve(control_for(selector), selector, opcode)
    }

    fn serve(
        &mut self,
        control: &dyn Control,
        selector: Selector,
        opcode: Opcode,
    ) -> Result<(), Error> {
        let mut cx = Context {
            flash: &mut self.flash,
            board: &mut self.board,
            session: &mut self.session,
            info: &self.info,
        };

        let result = match opcode {
            Opcode::GetCurrent => {
                let mut reply = Reply::new();
                control.get_current(&mut cx, &mut reply).and_then(|()| {
                    self.channel
                        .send(reply.as_slice())
                        .map_err(|_| Error::Channel)
                })
            }
            Opcode::SetCurrent => {
                let expected = control.set_len(cx.info);
                let mut buf = [0u8; MAX_CONTROL_LEN];
                let received = if expected > MAX_CONTROL_LEN {
                    Err(Error::BufferTooLarge {
                        len: expected,
                        capacity: MAX_CONTROL_LEN,
                    })
                } else if expected == 0 {
                    Ok(0)
                } else {
                    self.channel
                        .receive(&mut buf[..expected])
                        .map_err(|_| Error::Channel)
                };
                received.and_then(|received| {
                    if received < expected {
                        return Err(Error::ShortTransfer { expected, received });
                    }
                    control.set_current(&mut cx, &buf[..expected])
                })
            }
            Opcode::GetLength => match control.reply_len(cx.info) {
                len if len > MAX_CONTROL_LEN => Err(Error::BufferTooLarge {
                    len,
                    capacity: MAX_CONTROL_LEN,
                }),
                _ => self
                    .channel
                    .send(&control.get_length(cx.info))
                    .map_err(|_| Error::Channel),
            },
            Opcode::GetInfo => self
                .channel
                .send(&[control.get_info()])
                .map_err(|_| Error::Channel),
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                error!("{:?} {:?} failed: {:?}", selector, opcode, e);
            } else {
                warn!("{:?} {:?} rejected: {:?}", selector, opcode, e);
                self.channel.stall();
            }
        }
        result
    }

    /// Session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The flash engine.
    pub fn flash_mut(&mut self) -> &mut FlashEngine<P, D> {
        &mut self.flash
    }

    /// The control channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The control channel, mutably.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// The sensor board.
    pub fn board(&self) -> &B {
        &self.board
    }

    /// The sensor board, mutably.
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Releases the collaborators.
    pub fn release(self) -> (FlashEngine<P, D>, C, B) {
        (self.flash, self.channel, self.board)
    }
}
