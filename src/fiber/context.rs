//! Per-thread record of the fiber currently running on this OS thread.
//!
//! Fibers migrate between threads, so nothing here may be cached across a
//! suspension point: every accessor re-reads the thread-local through an
//! `#[inline(never)]` function after control comes back.

use core::cell::{Cell, RefCell};
use core::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use corosensei::Yielder;

use super::Fiber;
use crate::scheduler::Scheduler;
use crate::sync::waiter::Waiter;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a fiber, or of a thread's root context.
///
/// Ids come from one process-wide counter, so a thread's root context never
/// collides with a fiber. The root context stands in for the thread's
/// implicit fiber when primitives record ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    pub(crate) fn next() -> Self {
        FiberId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for FiberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Who resumed the fiber: a scheduler's dispatch loop, or a plain `call()`.
pub(crate) type Driver = Option<Scheduler>;

/// What a suspending fiber asks of whoever resumed it.
pub(crate) enum Transfer {
    /// Back to the resumer; a dispatch loop re-enqueues it at the back.
    Yield,
    /// Hand the fiber's handle to a primitive's waiter list.
    Park(ParkFn),
    /// Run `next` on this thread now; re-enqueue the yielding fiber.
    SwitchTo(Fiber),
}

/// Enlist callback carried out of a parking fiber.
///
/// It borrows the primitive from the parked fiber's stack, which is why its
/// lifetime is erased: the dispatch loop invokes it right after the switch,
/// and the fiber cannot be resumed (or dropped) before the callback has
/// handed its handle over.
pub(crate) struct ParkFn(Box<dyn FnOnce(Waiter)>);

impl ParkFn {
    /// # Safety
    ///
    /// The callback must be run by the loop that resumed the current fiber,
    /// before that fiber is resumed again.
    pub(crate) unsafe fn new<'a>(f: Box<dyn FnOnce(Waiter) + 'a>) -> Self {
        // SAFETY: only the lifetime bound changes; see the type docs.
        let f: Box<dyn FnOnce(Waiter) + 'static> = unsafe { core::mem::transmute(f) };
        ParkFn(f)
    }

    pub(crate) fn enlist(self, waiter: Waiter) {
        (self.0)(waiter)
    }
}

/// Lives on the running fiber's own stack for its whole run.
pub(crate) struct Frame {
    id: FiberId,
    yielder: *const Yielder<Driver, Transfer>,
    driver: RefCell<Driver>,
}

impl Frame {
    pub(crate) fn new(id: FiberId, yielder: &Yielder<Driver, Transfer>, driver: Driver) -> Self {
        Frame {
            id,
            yielder,
            driver: RefCell::new(driver),
        }
    }
}

thread_local! {
    static CURRENT: Cell<*const Frame> = const { Cell::new(ptr::null()) };
    static ROOT_ID: FiberId = FiberId::next();
}

#[inline(never)]
pub(crate) fn frame() -> *const Frame {
    CURRENT.with(|c| c.get())
}

#[inline(never)]
pub(crate) fn set_frame(frame: *const Frame) {
    CURRENT.with(|c| c.set(frame));
}

#[inline(never)]
fn root_id() -> FiberId {
    ROOT_ID.with(|id| *id)
}

/// Id of the running fiber, or of this thread's root context.
pub fn current_id() -> FiberId {
    let frame = frame();
    if frame.is_null() {
        root_id()
    } else {
        // SAFETY: a non-null frame belongs to the fiber executing this code.
        unsafe { (*frame).id }
    }
}

/// True when called from inside a fiber.
pub fn in_fiber() -> bool {
    !frame().is_null()
}

/// Scheduler driving the running fiber, if any.
pub(crate) fn driver() -> Driver {
    let frame = frame();
    if frame.is_null() {
        return None;
    }
    // SAFETY: as in `current_id`.
    unsafe { (*frame).driver.borrow().clone() }
}

/// Switch out of the running fiber. Returns when it is resumed, possibly on
/// another OS thread.
///
/// # Panics
///
/// Outside a fiber.
pub(crate) fn suspend(transfer: Transfer) {
    let frame = frame();
    assert!(!frame.is_null(), "cannot suspend outside of a fiber");
    // SAFETY: the frame sits on this fiber's stack and outlives the call.
    let frame = unsafe { &*frame };
    let yielder = unsafe { &*frame.yielder };
    let driver = yielder.suspend(transfer);
    *frame.driver.borrow_mut() = driver;
    set_frame(frame);
}
