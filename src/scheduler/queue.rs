//! The ready queue and the bookkeeping shared by every dispatching thread.
//! Everything here is guarded by the scheduler's queue lock.

use std::collections::VecDeque;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::fiber::Fiber;
use crate::sync::waiter::ThreadSignal;
use crate::util::ThreadId;

/// Something the dispatch loop can pick up.
pub(crate) enum Unit {
    Fiber(Fiber),
    /// Plain callable; wrapped into a fiber when dispatched.
    Call(Box<dyn FnOnce() + Send + 'static>),
    /// Wake token for a thread root blocked while helping this scheduler.
    Resume(Arc<ThreadSignal>),
}

pub(crate) struct Entry {
    pub(crate) unit: Unit,
    pub(crate) thread: Option<ThreadId>,
}

#[derive(Default)]
pub(crate) struct ReadyQueue {
    entries: VecDeque<Entry>,
    /// Threads currently inside a dispatch loop of this scheduler. A thread
    /// may appear more than once when loops nest.
    threads: SmallVec<[ThreadId; 8]>,
    /// Threads between dequeuing a unit and finishing with it.
    pub(crate) active: usize,
    /// Threads blocked on the wake condition.
    pub(crate) idle: usize,
    pub(crate) stopping: bool,
}

impl ReadyQueue {
    /// Append a unit. A hint naming a thread that is not dispatching this
    /// scheduler is dropped. Returns whether the entry ended up pinned.
    pub(crate) fn push(&mut self, unit: Unit, hint: Option<ThreadId>) -> bool {
        let thread = hint.filter(|t| self.threads.contains(t));
        if hint.is_some() && thread.is_none() {
            tracing::warn!(?hint, "hinted thread is not dispatching this scheduler; ignoring hint");
        }
        self.entries.push_back(Entry { unit, thread });
        thread.is_some()
    }

    /// Remove the oldest entry `me` may run: unpinned, or pinned to `me`.
    pub(crate) fn pop_for(&mut self, me: ThreadId) -> Option<Entry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.thread.is_none_or(|t| t == me))?;
        self.entries.remove(pos)
    }

    pub(crate) fn has_runnable_for(&self, me: ThreadId) -> bool {
        self.entries.iter().any(|e| e.thread.is_none_or(|t| t == me))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn register(&mut self, me: ThreadId) {
        self.threads.push(me);
    }

    /// Forget one registration of `me`. Once `me` has left entirely, entries
    /// still pinned to it become runnable anywhere. Returns whether any did.
    pub(crate) fn deregister(&mut self, me: ThreadId) -> bool {
        if let Some(pos) = self.threads.iter().position(|t| *t == me) {
            self.threads.swap_remove(pos);
        }
        if self.threads.contains(&me) {
            return false;
        }
        let mut released = false;
        for e in self.entries.iter_mut().filter(|e| e.thread == Some(me)) {
            e.thread = None;
            released = true;
        }
        released
    }

    pub(crate) fn threads(&self) -> Vec<ThreadId> {
        let mut ids = self.threads.to_vec();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> Unit {
        Unit::Call(Box::new(|| {}))
    }

    fn spawn_id() -> ThreadId {
        std::thread::spawn(ThreadId::current).join().unwrap()
    }

    #[test]
    fn fifo_for_unpinned_entries() {
        let me = ThreadId::current();
        let mut q = ReadyQueue::default();
        let first = Arc::new(ThreadSignal::new());
        q.push(Unit::Resume(first.clone()), None);
        q.push(call(), None);
        assert_eq!(q.len(), 2);
        match q.pop_for(me).unwrap().unit {
            Unit::Resume(s) => assert!(Arc::ptr_eq(&s, &first)),
            _ => panic!("expected the resume token first"),
        }
        assert!(matches!(q.pop_for(me).unwrap().unit, Unit::Call(_)));
        assert!(q.pop_for(me).is_none());
    }

    #[test]
    fn hints_only_pin_to_live_threads() {
        let me = ThreadId::current();
        let other = spawn_id();
        let mut q = ReadyQueue::default();

        assert!(!q.push(call(), Some(other)));
        q.pop_for(me).unwrap();

        q.register(other);
        assert!(q.push(call(), Some(other)));
        assert!(!q.has_runnable_for(me));
        assert!(q.pop_for(me).is_none());
        assert!(q.has_runnable_for(other));
    }

    #[test]
    fn leaving_thread_releases_its_pinned_entries() {
        let me = ThreadId::current();
        let other = spawn_id();
        let mut q = ReadyQueue::default();
        q.register(other);
        q.register(other);
        q.push(call(), Some(other));

        assert!(!q.deregister(other));
        assert!(!q.has_runnable_for(me));
        assert!(q.deregister(other));
        assert!(q.has_runnable_for(me));
        assert!(q.threads().is_empty());
    }
}
