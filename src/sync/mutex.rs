use core::marker::PhantomData;
use std::collections::VecDeque;

use parking_lot::Mutex;

use super::waiter::{Waiter, block_on};
use crate::fiber::{FiberId, current_id};

struct MutexState {
    owner: Option<FiberId>,
    waiters: VecDeque<Waiter>,
}

/// Non-recursive mutual exclusion between fibers.
///
/// A contended `lock` parks the calling fiber; `unlock` hands ownership
/// straight to the oldest waiter, so no newcomer can barge in ahead of it.
pub struct FiberMutex {
    state: Mutex<MutexState>,
}

impl FiberMutex {
    /// An unlocked mutex.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MutexState {
                owner: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquire the mutex, parking until it is handed over.
    ///
    /// # Panics
    ///
    /// When the calling context already owns it.
    pub fn lock(&self) -> FiberMutexGuard<'_> {
        let me = current_id();
        self.acquire(me);
        FiberMutexGuard::new(self, me)
    }

    /// Acquire the mutex only if nobody owns it.
    pub fn try_lock(&self) -> Option<FiberMutexGuard<'_>> {
        let me = current_id();
        let mut s = self.state.lock();
        if s.owner.is_some() {
            return None;
        }
        s.owner = Some(me);
        drop(s);
        Some(FiberMutexGuard::new(self, me))
    }

    /// Whether some context owns the mutex right now.
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub(crate) fn is_owned_by(&self, id: FiberId) -> bool {
        self.state.lock().owner == Some(id)
    }

    pub(crate) fn acquire(&self, me: FiberId) {
        {
            let mut s = self.state.lock();
            match s.owner {
                None => {
                    s.owner = Some(me);
                    return;
                }
                Some(owner) => assert!(owner != me, "FiberMutex is not recursive: {me} already holds it"),
            }
        }
        block_on(|waiter| {
            let mut s = self.state.lock();
            if s.owner.is_none() {
                // Released while we were switching out; nobody else queued.
                s.owner = Some(waiter.id());
                drop(s);
                waiter.wake();
            } else {
                s.waiters.push_back(waiter);
            }
        });
        debug_assert!(self.is_owned_by(me));
    }

    /// Give up ownership held by `owner`, handing it to the oldest waiter.
    pub(crate) fn release(&self, owner: FiberId) {
        let next = {
            let mut s = self.state.lock();
            debug_assert_eq!(s.owner, Some(owner), "FiberMutex released by a non-owner");
            let next = s.waiters.pop_front();
            s.owner = next.as_ref().map(Waiter::id);
            next
        };
        if let Some(waiter) = next {
            waiter.wake();
        }
    }

    /// Release only if somebody is waiting. Returns whether it did.
    fn release_if_contended(&self, owner: FiberId) -> bool {
        let next = {
            let mut s = self.state.lock();
            debug_assert_eq!(s.owner, Some(owner), "FiberMutex released by a non-owner");
            let Some(next) = s.waiters.pop_front() else {
                return false;
            };
            s.owner = Some(next.id());
            next
        };
        next.wake();
        true
    }
}

impl Default for FiberMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FiberMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = self.state.lock();
        f.debug_struct("FiberMutex")
            .field("owner", &s.owner)
            .field("waiters", &s.waiters.len())
            .finish()
    }
}

/// Ownership of a [`FiberMutex`]; released on drop unless already released.
///
/// Not `Send`: ownership belongs to the context that locked it.
#[must_use = "dropping the guard unlocks the mutex immediately"]
pub struct FiberMutexGuard<'a> {
    mutex: &'a FiberMutex,
    owner: FiberId,
    locked: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> FiberMutexGuard<'a> {
    fn new(mutex: &'a FiberMutex, owner: FiberId) -> Self {
        Self {
            mutex,
            owner,
            locked: true,
            _not_send: PhantomData,
        }
    }

    /// Release now, handing ownership to the oldest waiter if any.
    pub fn unlock(mut self) {
        self.locked = false;
        self.mutex.release(self.owner);
    }

    /// Release only when another context is waiting. Returns false, still
    /// holding the mutex, when nobody is; true when ownership was handed on,
    /// after which the guard no longer holds the mutex.
    ///
    /// # Panics
    ///
    /// When the guard has already given up the mutex.
    pub fn unlock_if_not_unique(&mut self) -> bool {
        assert!(self.locked, "guard no longer holds the mutex");
        let released = self.mutex.release_if_contended(self.owner);
        if released {
            self.locked = false;
        }
        released
    }

    /// Whether this guard still holds the mutex.
    pub fn is_held(&self) -> bool {
        self.locked
    }
}

impl Drop for FiberMutexGuard<'_> {
    fn drop(&mut self) {
        if self.locked {
            self.mutex.release(self.owner);
        }
    }
}

impl core::fmt::Debug for FiberMutexGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FiberMutexGuard")
            .field("owner", &self.owner)
            .field("locked", &self.locked)
            .finish()
    }
}
