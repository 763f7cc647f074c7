use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::mutex::FiberMutex;
use super::waiter::{Waiter, block_on};
use crate::fiber::current_id;

/// Condition variable bound to one [`FiberMutex`] for its whole life.
///
/// No spurious wakeups: `wait` returns only after a `signal` or `broadcast`
/// selected this waiter and the mutex has been re-acquired.
pub struct FiberCondition {
    mutex: Arc<FiberMutex>,
    waiters: Mutex<VecDeque<Waiter>>,
}

impl FiberCondition {
    /// A condition paired with `mutex`.
    pub fn new(mutex: Arc<FiberMutex>) -> Self {
        Self {
            mutex,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// The bound mutex.
    pub fn mutex(&self) -> &Arc<FiberMutex> {
        &self.mutex
    }

    /// Release the bound mutex and park until signaled, then re-acquire it
    /// (queueing behind any other contender) before returning. The caller's
    /// guard stays valid throughout.
    ///
    /// # Panics
    ///
    /// When the calling context does not own the bound mutex.
    pub fn wait(&self) {
        let me = current_id();
        assert!(
            self.mutex.is_owned_by(me),
            "FiberCondition::wait() requires holding the bound mutex"
        );
        block_on(|waiter| {
            // Release under the waiter lock: a signaler must not pop us while
            // we are still recorded as the mutex owner.
            let mut waiters = self.waiters.lock();
            waiters.push_back(waiter);
            self.mutex.release(me);
        });
        self.mutex.acquire(me);
    }

    /// Wake the oldest waiter. Nothing is remembered when there is none.
    pub fn signal(&self) {
        let next = self.waiters.lock().pop_front();
        if let Some(waiter) = next {
            waiter.wake();
        }
    }

    /// Wake every current waiter, oldest first.
    pub fn broadcast(&self) {
        let woken: SmallVec<[Waiter; 8]> = self.waiters.lock().drain(..).collect();
        for waiter in woken {
            waiter.wake();
        }
    }
}

impl core::fmt::Debug for FiberCondition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FiberCondition")
            .field("mutex", &self.mutex)
            .field("waiters", &self.waiters.lock().len())
            .finish()
    }
}
