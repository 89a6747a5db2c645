//! Shared-context helpers for firmware that serves control requests from a
//! USB callback or interrupt.
//!
//! The dispatcher is parked in a `static` guarded by `critical_section`; the
//! callback borrows it for the duration of one request. Only the owner moves
//! into the `static`; the [`Session`](crate::session::Session) still lives
//! inside the dispatcher.

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::platform::{Board, ControlChannel};
use crate::port::SpiPort;
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

/// A dispatcher slot for a `static`.
pub type GlobalDispatcher<P, D, C, B> = Mutex<RefCell<Option<Dispatcher<P, D, C, B>>>>;

/// Used to initialize the global static [`Dispatcher`].
///
/// # Example
/// ```rust,ignore
/// use camxu::global::{GlobalDispatcher, global_dispatcher_init};
///
/// static EU: GlobalDispatcher<Port, Delay, Ep0, Board> = global_dispatcher_init();
/// ```
pub const fn global_dispatcher_init<P, D, C, B>() -> GlobalDispatcher<P, D, C, B> {
    Mutex::new(RefCell::new(None))
}

/// Moves a ready dispatcher into the global slot, replacing any previous one.
///
/// # Example
/// ```rust,ignore
/// fn main() {
///     global_dispatcher_setup(&EU, Dispatcher::new(flash, ep0, board, info));
/// }
/// ```
pub fn global_dispatcher_setup<P, D, C, B>(
    global: &'static GlobalDispatcher<P, D, C, B>,
    dispatcher: Dispatcher<P, D, C, B>,
) where
    P: SpiPort,
    D: DelayNs,
    C: ControlChannel,
    B: Board,
{
    critical_section::with(|cs| {
        let _ = global.borrow(cs).replace(Some(dispatcher));
    });
}

/// Serves one request with the global dispatcher.
///
/// Returns `None` if [`global_dispatcher_setup`] has not run yet.
///
/// # Example
/// ```rust,ignore
/// fn on_setup_request(selector: u8, request: u8) {
///     if let Some(Err(e)) = global_dispatch(&EU, selector, request) {
///         if e.is_fatal() {
///             reset();
///         }
///     }
/// }
/// ```
pub fn global_dispatch<P, D, C, B>(
    global: &'static GlobalDispatcher<P, D, C, B>,
    selector: u8,
    request: u8,
) -> Option<Result<(), Error>>
where
    P: SpiPort,
    D: DelayNs,
    C: ControlChannel,
    B: Board,
{
    critical_section::with(|cs| {
        global
            .borrow(cs)
            .borrow_mut()
            .as_mut()
            .map(|dispatcher| dispatcher.dispatch(selector, request))
    })
}
