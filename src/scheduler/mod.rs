//! Scheduler core: a FIFO ready queue drained by dispatch loops.
//!
//! Every thread that dispatches (background workers, a caller running
//! [`Scheduler::dispatch`] or [`Scheduler::stop`], or a bound root context
//! blocked on a primitive) runs the same loop: take the oldest unit it may
//! run, transfer control into it, and react to how it came back. The queue
//! lock is held only around enqueue/dequeue, never while a fiber runs.

mod pool;
mod queue;

use core::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::error::{Result, SchedulerError};
use crate::fiber::context::{self, Transfer};
use crate::fiber::{Fiber, Resumed};
use crate::sync::waiter::{ThreadSignal, Waiter};
use crate::util::{PinConfig, ThreadId, pin_current_thread};
pub use pool::{NoPendingWork, PoolConfig, WorkerPool};
use queue::{ReadyQueue, Unit};

/// Idle behaviour of a scheduler; the one seam a timer/I/O-aware variant
/// plugs into. The plain [`WorkerPool`] uses [`NoPendingWork`].
pub trait IdlePolicy: Send + Sync + 'static {
    /// Work owed to the scheduler outside its ready queue (armed timers,
    /// readiness registrations). While true, `dispatch` keeps going and
    /// workers do not exit on `stop`. Called with the queue lock held; must
    /// not schedule.
    fn pending(&self) -> bool {
        false
    }

    /// Called, without the queue lock, each time a thread runs out of work.
    /// May schedule new units. Returns how long the thread may block before
    /// asking again; `None` blocks until something is scheduled.
    fn idle(&self, scheduler: &Scheduler) -> Option<Duration> {
        let _ = scheduler;
        None
    }
}

/// Monotonic dispatch counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Units resumed, counting every resumption of the same fiber.
    pub dispatched: u64,
    /// Fibers whose entry panicked.
    pub failed: u64,
}

struct Shared {
    name: String,
    use_caller: bool,
    stack_size: usize,
    queue: Mutex<ReadyQueue>,
    wake: Condvar,
    policy: Box<dyn IdlePolicy>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Handle to a scheduler. Cloning is cheap and every clone drives the same
/// queue; owning types such as [`WorkerPool`] decide when it stops.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// When a dispatch loop hands its thread back.
#[derive(Clone, Copy)]
enum Exit<'a> {
    /// Nothing queued, nothing running, nothing pending.
    Idle,
    /// As `Idle`, once `stop` has been requested.
    Stop,
    /// The given signal fired.
    Woken(&'a ThreadSignal),
}

impl Scheduler {
    /// Start a scheduler with `config.threads` threads, counting the
    /// caller's when `config.use_caller` is set, and the given idle policy.
    pub fn with_policy<P: IdlePolicy>(config: PoolConfig, policy: P) -> Result<Self> {
        if config.threads == 0 {
            return Err(SchedulerError::NoThreads);
        }
        let background = config.threads - usize::from(config.use_caller);
        let scheduler = Scheduler {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                use_caller: config.use_caller,
                stack_size: config.stack_size,
                queue: Mutex::new(ReadyQueue::default()),
                wake: Condvar::new(),
                policy: Box::new(policy),
                workers: Mutex::new(Vec::with_capacity(background)),
                dispatched: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        };

        for index in 0..background {
            let worker = scheduler.clone();
            let pin = config.pin.get(index).copied();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", config.name, index))
                .spawn(move || worker.worker_main(index, pin));
            match spawned {
                Ok(handle) => scheduler.shared.workers.lock().push(handle),
                Err(e) => {
                    scheduler.stop();
                    return Err(SchedulerError::Spawn(e));
                }
            }
        }

        // Hints may name workers as soon as construction returns.
        let mut q = scheduler.shared.queue.lock();
        while q.threads().len() < background {
            scheduler.shared.wake.wait(&mut q);
        }
        drop(q);

        debug!(scheduler = %config.name, threads = config.threads, use_caller = config.use_caller, "scheduler started");
        Ok(scheduler)
    }

    /// Name given in the config; worker threads are named after it.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a callable. It runs inside a fiber, so it may block on
    /// primitives and yield.
    pub fn schedule<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Unit::Call(Box::new(f)), None);
    }

    /// Enqueue a callable, preferring `thread` if it is dispatching this
    /// scheduler.
    pub fn schedule_on<F>(&self, f: F, thread: ThreadId)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Unit::Call(Box::new(f)), Some(thread));
    }

    /// Enqueue a fiber in `Init` or `Hold`.
    ///
    /// # Panics
    ///
    /// When the fiber has finished, is executing, or has no entry.
    pub fn schedule_fiber(&self, fiber: Fiber) {
        assert_resumable(&fiber);
        self.push(Unit::Fiber(fiber), None);
    }

    /// Enqueue a fiber, preferring `thread` if it is dispatching this
    /// scheduler.
    ///
    /// # Panics
    ///
    /// As [`Scheduler::schedule_fiber`].
    pub fn schedule_fiber_on(&self, fiber: Fiber, thread: ThreadId) {
        assert_resumable(&fiber);
        self.push(Unit::Fiber(fiber), Some(thread));
    }

    /// Run the calling thread as an extra worker until no unit is queued or
    /// running and the idle policy has nothing pending.
    ///
    /// # Panics
    ///
    /// When called from inside a fiber.
    pub fn dispatch(&self) {
        assert!(
            !context::in_fiber(),
            "dispatch() must be called from a thread's root context, not from a fiber"
        );
        self.run(Exit::Idle);
    }

    /// Request shutdown and wait for it. Workers finish what is queued,
    /// including work scheduled while draining, then exit. With
    /// `use_caller`, the calling thread helps drain. Idempotent.
    ///
    /// # Panics
    ///
    /// When called from a fiber this scheduler is running.
    pub fn stop(&self) {
        if let Some(driver) = context::driver() {
            assert!(
                !Arc::ptr_eq(&driver.shared, &self.shared),
                "stop() called from a fiber of the scheduler being stopped"
            );
        }
        {
            let mut q = self.shared.queue.lock();
            if !q.stopping {
                debug!(scheduler = %self.shared.name, queued = q.len(), "stopping");
                q.stopping = true;
            }
            self.shared.wake.notify_all();
        }
        if self.shared.use_caller && !context::in_fiber() {
            self.run(Exit::Stop);
        }

        let handles = std::mem::take(&mut *self.shared.workers.lock());
        let me = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                error!(scheduler = %self.shared.name, "worker thread panicked");
            }
        }
    }

    /// Counters since construction.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Threads currently dispatching this scheduler; valid hint targets.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.shared.queue.lock().threads()
    }

    /// Whether both handles drive the same scheduler.
    pub fn same(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.shared.queue.lock().stopping
    }

    pub(crate) fn push_resume(&self, signal: Arc<ThreadSignal>) {
        self.push(Unit::Resume(signal), None);
    }

    /// Dispatch on the calling root context until `signal` fires.
    pub(crate) fn help_until(&self, signal: &ThreadSignal) {
        self.run(Exit::Woken(signal));
    }

    fn push(&self, unit: Unit, hint: Option<ThreadId>) {
        let mut q = self.shared.queue.lock();
        if q.stopping && q.threads().is_empty() && !self.shared.use_caller {
            warn!(scheduler = %self.shared.name, "work scheduled after stop; nothing will run it");
        }
        let pinned = q.push(unit, hint);
        if q.idle > 0 {
            if pinned {
                self.shared.wake.notify_all();
            } else {
                self.shared.wake.notify_one();
            }
        }
    }

    fn worker_main(self, index: usize, pin: Option<PinConfig>) {
        if let Some(cfg) = pin {
            if !pin_current_thread(&cfg) {
                warn!(scheduler = %self.shared.name, worker = index, ?cfg, "failed to pin worker thread");
            }
        }
        debug!(scheduler = %self.shared.name, worker = index, "worker started");
        self.run(Exit::Stop);
        debug!(scheduler = %self.shared.name, worker = index, "worker exited");
    }

    fn run(&self, exit: Exit<'_>) {
        let me = ThreadId::current();
        let mut spare: Option<Fiber> = None;
        let mut q = self.shared.queue.lock();
        q.register(me);
        self.shared.wake.notify_all();

        loop {
            let Some(unit) = self.next_unit(&mut q, me, exit) else {
                break;
            };
            MutexGuard::unlocked(&mut q, || {
                let abandon = Abandon { scheduler: self, me };
                self.run_unit(unit, &mut spare);
                core::mem::forget(abandon);
            });
            q.active -= 1;
            if q.active == 0 && q.idle > 0 {
                self.shared.wake.notify_all();
            }
        }

        if q.deregister(me) {
            self.shared.wake.notify_all();
        }
    }

    /// Dequeue the next unit for `me`, idling as needed. `None` means the
    /// loop's exit condition holds.
    fn next_unit(&self, q: &mut MutexGuard<'_, ReadyQueue>, me: ThreadId, exit: Exit<'_>) -> Option<Unit> {
        loop {
            if let Exit::Woken(signal) = exit {
                if signal.is_set() {
                    return None;
                }
            }
            if let Some(entry) = q.pop_for(me) {
                if let Unit::Resume(signal) = entry.unit {
                    // Whoever reaches the token flips it; the blocked root
                    // context wakes up and notices.
                    signal.notify();
                    self.shared.wake.notify_all();
                    continue;
                }
                q.active += 1;
                return Some(entry.unit);
            }

            let timeout = MutexGuard::unlocked(q, || self.shared.policy.idle(self));
            if q.has_runnable_for(me) {
                continue;
            }
            if let Exit::Woken(signal) = exit {
                if signal.is_set() {
                    return None;
                }
            }
            let quiescent = q.is_empty() && q.active == 0 && !self.shared.policy.pending();
            match exit {
                Exit::Idle if quiescent => return None,
                Exit::Stop if quiescent && q.stopping => return None,
                _ => {}
            }

            q.idle += 1;
            match timeout {
                Some(limit) => {
                    self.shared.wake.wait_for(q, limit);
                }
                None => self.shared.wake.wait(q),
            }
            q.idle -= 1;
        }
    }

    fn run_unit(&self, unit: Unit, spare: &mut Option<Fiber>) {
        let (mut fiber, mut recyclable) = match unit {
            Unit::Fiber(fiber) => (fiber, false),
            Unit::Call(f) => match self.wrap(f, spare) {
                Some(fiber) => (fiber, true),
                None => return,
            },
            Unit::Resume(_) => unreachable!("resume tokens are handled under the queue lock"),
        };

        loop {
            self.shared.dispatched.fetch_add(1, Ordering::Relaxed);
            trace!(fiber = %fiber.id(), "dispatch");
            match fiber.resume(Some(self.clone())) {
                Ok(Resumed::Suspended(Transfer::Yield)) => {
                    self.push(Unit::Fiber(fiber), None);
                }
                Ok(Resumed::Suspended(Transfer::Park(park))) => {
                    trace!(fiber = %fiber.id(), "park");
                    park.enlist(Waiter::Fiber {
                        fiber,
                        scheduler: self.clone(),
                    });
                }
                Ok(Resumed::Suspended(Transfer::SwitchTo(next))) => {
                    self.push(Unit::Fiber(fiber), None);
                    fiber = next;
                    recyclable = false;
                    continue;
                }
                Ok(Resumed::Finished) => {
                    if recyclable && spare.is_none() {
                        *spare = Some(fiber);
                    }
                }
                Err(e) => {
                    self.shared.failed.fetch_add(1, Ordering::Relaxed);
                    error!(scheduler = %self.shared.name, fiber = %fiber.id(), error = %e, "fiber failed");
                    if recyclable && spare.is_none() {
                        *spare = Some(fiber);
                    }
                }
            }
            return;
        }
    }

    /// Fiber for a plain callable, reusing the loop's finished one if any.
    fn wrap(&self, f: Box<dyn FnOnce() + Send + 'static>, spare: &mut Option<Fiber>) -> Option<Fiber> {
        let built = match spare.take() {
            Some(mut fiber) => fiber.reset(f).map(|()| fiber),
            None => Fiber::builder().stack_size(self.shared.stack_size).build(f),
        };
        match built {
            Ok(fiber) => Some(fiber),
            Err(e) => {
                self.shared.failed.fetch_add(1, Ordering::Relaxed);
                error!(scheduler = %self.shared.name, error = %e, "dropping callable");
                None
            }
        }
    }
}

/// Unwinding out of a unit takes this thread out of the scheduler; armed
/// around `run_unit` so the active count and registry stay consistent for
/// the threads that remain.
struct Abandon<'a> {
    scheduler: &'a Scheduler,
    me: ThreadId,
}

impl Drop for Abandon<'_> {
    fn drop(&mut self) {
        let shared = &self.scheduler.shared;
        error!(scheduler = %shared.name, thread = %self.me, "dispatch loop unwound; leaving the scheduler");
        let mut q = shared.queue.lock();
        q.active -= 1;
        q.deregister(self.me);
        shared.wake.notify_all();
    }
}

fn assert_resumable(fiber: &Fiber) {
    assert!(
        fiber.is_resumable(),
        "cannot schedule {} in state {:?}",
        fiber.id(),
        fiber.state()
    );
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("use_caller", &self.shared.use_caller)
            .finish_non_exhaustive()
    }
}

thread_local! {
    static BOUND: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// Scheduler the calling thread's root context helps while it blocks.
pub(crate) fn bound() -> Option<Scheduler> {
    BOUND.with(|b| b.borrow().clone())
}

pub(crate) fn bind(scheduler: Option<Scheduler>) -> Option<Scheduler> {
    BOUND.with(|b| b.replace(scheduler))
}

/// Yield the current context.
///
/// - Fiber under a scheduler: go to the back of the ready queue.
/// - Fiber under a plain `call()`: return to the caller in `Hold`.
/// - Root context bound to a scheduler: let everything queued so far run.
/// - Otherwise: yield the OS thread.
pub fn yield_now() {
    if context::in_fiber() {
        context::suspend(Transfer::Yield);
        return;
    }
    match bound() {
        Some(scheduler) => {
            let signal = Arc::new(ThreadSignal::new());
            scheduler.push_resume(signal.clone());
            scheduler.help_until(&signal);
        }
        None => std::thread::yield_now(),
    }
}

/// Hand this thread straight to `next`; the calling fiber enters `Hold` and
/// goes to the back of the ready queue.
///
/// # Panics
///
/// Unless called from a fiber driven by a scheduler, or when `next` could
/// not be scheduled.
pub fn yield_to(next: Fiber) {
    assert!(
        context::driver().is_some(),
        "yield_to() needs a fiber driven by a scheduler"
    );
    assert_resumable(&next);
    context::suspend(Transfer::SwitchTo(next));
}
