use core::marker::PhantomData;
use core::ops::Deref;

use super::{IdlePolicy, Scheduler, bind, bound};
use crate::error::Result;
use crate::fiber::DEFAULT_STACK_SIZE;
use crate::util::PinConfig;

/// Construction parameters for a [`WorkerPool`] or [`Scheduler::with_policy`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Dispatching threads, counting the caller's when `use_caller` is set.
    pub threads: usize,
    /// Count the constructing thread as a worker. It dispatches while it
    /// blocks on a primitive, yields, or runs `stop`.
    pub use_caller: bool,
    /// Prefix for worker thread names and log fields.
    pub name: String,
    /// Stack size of fibers created for scheduled callables.
    pub stack_size: usize,
    /// Placement of background worker `i`; workers past the end run unpinned.
    pub pin: Vec<PinConfig>,
}

impl PoolConfig {
    /// `threads` workers with the default name and stack size, unpinned.
    pub fn new(threads: usize, use_caller: bool) -> Self {
        Self {
            threads,
            use_caller,
            ..Self::default()
        }
    }

    /// Set the thread name prefix.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Set the stack size of fibers wrapping scheduled callables.
    pub fn stack_size(self, stack_size: usize) -> Self {
        Self { stack_size, ..self }
    }

    /// Pin background workers, in order.
    pub fn pin(self, pin: Vec<PinConfig>) -> Self {
        Self { pin, ..self }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            use_caller: true,
            name: "fiberpool".to_owned(),
            stack_size: DEFAULT_STACK_SIZE,
            pin: Vec::new(),
        }
    }
}

/// Idle policy of a plain pool: nothing to wait for outside the ready queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPendingWork;

impl IdlePolicy for NoPendingWork {}

/// A fixed set of OS threads dispatching one [`Scheduler`].
///
/// With `use_caller`, the constructing thread is bound to the pool: when its
/// root context blocks on a primitive or yields, it runs queued fibers until
/// woken, and it helps drain on `stop`. The pool therefore stays on the
/// thread that built it.
///
/// Dropping the pool stops it.
pub struct WorkerPool {
    scheduler: Scheduler,
    previous: Option<Scheduler>,
    bound: bool,
    _not_send: PhantomData<*const ()>,
}

impl WorkerPool {
    /// `threads` dispatching threads; with `use_caller` one of them is the
    /// calling thread.
    pub fn new(threads: usize, use_caller: bool) -> Result<Self> {
        Self::with_config(PoolConfig::new(threads, use_caller))
    }

    /// Pool from a full config.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let use_caller = config.use_caller;
        let scheduler = Scheduler::with_policy(config, NoPendingWork)?;
        let previous = if use_caller {
            bind(Some(scheduler.clone()))
        } else {
            None
        };
        Ok(Self {
            scheduler,
            previous,
            bound: use_caller,
            _not_send: PhantomData,
        })
    }

    /// Cloneable handle for scheduling from other threads and fibers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Deref for WorkerPool {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.scheduler.stop();
        // Pools dropped out of creation order leave a newer binding alone.
        if self.bound && bound().is_some_and(|b| b.same(&self.scheduler)) {
            bind(self.previous.take().filter(|p| !p.is_stopping()));
        }
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("scheduler", &self.scheduler)
            .field("bound", &self.bound)
            .finish()
    }
}
