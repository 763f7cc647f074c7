//! Waiter-list entries and the single blocking path every primitive uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::fiber::context::{self, ParkFn, Transfer};
use crate::fiber::{Fiber, FiberId};
use crate::scheduler::{self, Scheduler};
use crate::util::WaitBudget;

/// A blocked context sitting in a primitive's FIFO.
pub(crate) enum Waiter {
    /// A parked fiber, re-enqueued on the scheduler it was parked from.
    Fiber { fiber: Fiber, scheduler: Scheduler },
    /// A thread's root context (or a fiber driven without a scheduler).
    Thread {
        id: FiberId,
        signal: Arc<ThreadSignal>,
        helping: Option<Scheduler>,
    },
}

impl Waiter {
    pub(crate) fn id(&self) -> FiberId {
        match self {
            Waiter::Fiber { fiber, .. } => fiber.id(),
            Waiter::Thread { id, .. } => *id,
        }
    }

    /// Make the waiter runnable again. Call without holding the primitive's
    /// guard.
    pub(crate) fn wake(self) {
        match self {
            Waiter::Fiber { fiber, scheduler } => scheduler.schedule_fiber(fiber),
            Waiter::Thread {
                signal,
                helping: Some(scheduler),
                ..
            } => scheduler.push_resume(signal),
            Waiter::Thread { signal, .. } => signal.notify(),
        }
    }
}

/// One-shot wake flag for a context that is not a parked fiber.
pub(crate) struct ThreadSignal {
    set: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ThreadSignal {
    pub(crate) fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self) {
        let _g = self.lock.lock();
        self.set.store(true, Ordering::Release);
        self.cond.notify_one();
    }

    /// Block the OS thread until notified. Spins briefly first: hand-offs
    /// from another worker usually land within microseconds.
    pub(crate) fn wait(&self) {
        if WaitBudget::hot().spin_until(|| self.is_set()) {
            return;
        }
        let mut g = self.lock.lock();
        while !self.is_set() {
            self.cond.wait(&mut g);
        }
    }
}

/// Block the current context until the waiter passed to `enlist` is woken.
///
/// `enlist` runs under no lock of ours and must either queue the waiter or
/// wake it straight away; it is where a primitive re-checks its condition.
///
/// - Fiber driven by a scheduler: switch out first, then the dispatch loop
///   runs `enlist` with the fiber's handle. The fiber cannot be resumed
///   before it has fully switched out.
/// - Root context of a thread bound to a scheduler: enlist, then help run
///   that scheduler until woken.
/// - Anything else: enlist, then block the OS thread.
pub(crate) fn block_on<'a, F>(enlist: F)
where
    F: FnOnce(Waiter) + 'a,
{
    if context::driver().is_some() {
        // SAFETY: the dispatch loop runs the callback as soon as this fiber
        // has switched out, before anything can resume it.
        let park = unsafe { ParkFn::new(Box::new(enlist)) };
        context::suspend(Transfer::Park(park));
        return;
    }

    let helping = if context::in_fiber() {
        None
    } else {
        scheduler::bound()
    };
    let signal = Arc::new(ThreadSignal::new());
    enlist(Waiter::Thread {
        id: context::current_id(),
        signal: signal.clone(),
        helping: helping.clone(),
    });
    match helping {
        Some(scheduler) => scheduler.help_until(&signal),
        None => signal.wait(),
    }
}
