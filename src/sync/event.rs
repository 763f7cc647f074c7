use std::collections::VecDeque;

use parking_lot::Mutex;
use smallvec::{SmallVec, smallvec};

use super::waiter::{Waiter, block_on};

struct EventState {
    signaled: bool,
    waiters: VecDeque<Waiter>,
}

/// A settable flag fibers can wait on.
///
/// Auto-reset events release one waiter per `set`; manual-reset events stay
/// signaled, releasing everyone, until `reset`.
pub struct FiberEvent {
    auto_reset: bool,
    state: Mutex<EventState>,
}

impl FiberEvent {
    /// An unsignaled event; `auto_reset` picks the mode for good.
    pub fn new(auto_reset: bool) -> Self {
        Self {
            auto_reset,
            state: Mutex::new(EventState {
                signaled: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Shorthand for `FiberEvent::new(true)`.
    pub fn auto_reset() -> Self {
        Self::new(true)
    }

    /// Shorthand for `FiberEvent::new(false)`.
    pub fn manual_reset() -> Self {
        Self::new(false)
    }

    /// Whether the event is in auto-reset mode.
    pub fn is_auto_reset(&self) -> bool {
        self.auto_reset
    }

    /// Return at once if signaled (consuming the signal in auto-reset mode);
    /// otherwise park until a `set` releases this waiter.
    pub fn wait(&self) {
        if self.try_consume(&mut self.state.lock()) {
            return;
        }
        block_on(|waiter| {
            let mut s = self.state.lock();
            if self.try_consume(&mut s) {
                drop(s);
                waiter.wake();
            } else {
                s.waiters.push_back(waiter);
            }
        });
    }

    /// Manual reset: signal and release every waiter. Auto reset: release the
    /// oldest waiter, or stay signaled for the next `wait` when none is
    /// queued.
    pub fn set(&self) {
        let woken: SmallVec<[Waiter; 8]> = {
            let mut s = self.state.lock();
            if self.auto_reset {
                match s.waiters.pop_front() {
                    Some(waiter) => smallvec![waiter],
                    None => {
                        s.signaled = true;
                        SmallVec::new()
                    }
                }
            } else {
                s.signaled = true;
                s.waiters.drain(..).collect()
            }
        };
        for waiter in woken {
            waiter.wake();
        }
    }

    /// Clear the signal. Waiters already released are unaffected.
    pub fn reset(&self) {
        self.state.lock().signaled = false;
    }

    /// Whether the event is signaled right now.
    pub fn is_set(&self) -> bool {
        self.state.lock().signaled
    }

    fn try_consume(&self, s: &mut EventState) -> bool {
        if !s.signaled {
            return false;
        }
        if self.auto_reset {
            s.signaled = false;
        }
        true
    }
}

impl Default for FiberEvent {
    fn default() -> Self {
        Self::auto_reset()
    }
}

impl core::fmt::Debug for FiberEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = self.state.lock();
        f.debug_struct("FiberEvent")
            .field("auto_reset", &self.auto_reset)
            .field("signaled", &s.signaled)
            .field("waiters", &s.waiters.len())
            .finish()
    }
}
