//! Fiber-aware synchronization primitives.
//!
//! Blocking parks the calling fiber instead of its OS thread, so other
//! fibers keep running on the same worker. The same primitives also work
//! from a thread's root context; see [`crate::WorkerPool`] for
//! what that means on a `use_caller` pool's thread.
//!
//! Each primitive guards its bookkeeping with a `parking_lot::Mutex` and
//! keeps a strict FIFO of waiters: release always goes to the oldest one.
//! Dropping a primitive that still has parked fibers drops those fibers and
//! unwinds their stacks.

mod condition;
mod event;
mod mutex;
pub(crate) mod waiter;

pub use condition::FiberCondition;
pub use event::FiberEvent;
pub use mutex::{FiberMutex, FiberMutexGuard};
