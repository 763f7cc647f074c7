#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]

//! Cooperative fibers multiplexed over a small pool of OS threads, plus
//! fiber-aware mutex, condition and event.
//!
//! - [`Fiber`]: stackful, move-only execution context resumed with `call`
//!   or by a scheduler.
//! - [`Scheduler`] / [`WorkerPool`]: FIFO ready queue drained by N threads,
//!   optionally counting the constructing thread.
//! - [`FiberMutex`], [`FiberCondition`], [`FiberEvent`]: block by parking the
//!   fiber, not the thread, with strict FIFO hand-off.
//!
//! ```ignore
//! use fiberpool::prelude::*;
//!
//! let pool = WorkerPool::new(2, true)?;
//! let mutex = std::sync::Arc::new(FiberMutex::new());
//! let m = mutex.clone();
//! pool.schedule(move || {
//!     let _g = m.lock();
//!     yield_now();
//! });
//! pool.dispatch();
//! ```

mod error;
mod fiber;
mod scheduler;
mod sync;
pub mod util;

pub use error::{FiberError, Result, SchedulerError};
pub use fiber::{Builder, DEFAULT_STACK_SIZE, Fiber, FiberId, FiberState, current_id, in_fiber};
pub use scheduler::{
    IdlePolicy, NoPendingWork, PoolConfig, Scheduler, SchedulerStats, WorkerPool, yield_now,
    yield_to,
};
pub use sync::{FiberCondition, FiberEvent, FiberMutex, FiberMutexGuard};
pub use util::{PinConfig, ThreadId, pin_current_thread};

/// Everything needed to schedule fibers and synchronize them.
pub mod prelude {
    pub use crate::{
        Fiber, FiberCondition, FiberEvent, FiberMutex, FiberState, Scheduler, WorkerPool,
        current_id, in_fiber, yield_now, yield_to,
    };
}
