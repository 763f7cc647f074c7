use std::sync::atomic::{AtomicUsize, Ordering};

static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_ID: ThreadId = ThreadId(THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
}

/// Small sequential id of an OS thread, used for scheduling hints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(usize);

impl ThreadId {
    /// Id of the calling thread.
    #[inline(never)]
    pub fn current() -> Self {
        THREAD_ID.with(|id| *id)
    }

    /// Raw numeric value.
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}
