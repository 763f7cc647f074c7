//! Stackful fibers.
//!
//! A [`Fiber`] is a move-only handle to a resumable execution context with
//! its own stack. Whoever holds the handle is its only resumer: `call` takes
//! `&mut self`, so two threads can never resume the same fiber at once.
//!
//! States: `Init → Executing → {Hold | Terminated | Failed}` and
//! `Hold → Executing`. A panic in the entry computation moves the fiber to
//! `Failed` and is reported to the resumer once.

pub(crate) mod context;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::error::FiberError;
pub use context::{FiberId, current_id, in_fiber};
use context::{Driver, Frame, Transfer};

/// Stack size used when none is configured.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle state of a fiber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FiberState {
    /// Constructed or reset; not yet run.
    Init,
    /// Owns the thread of control right now.
    Executing,
    /// Suspended with its stack intact.
    Hold,
    /// Entry returned normally.
    Terminated,
    /// Entry panicked.
    Failed,
}

impl FiberState {
    /// True for `Terminated` and `Failed`.
    pub fn is_finished(self) -> bool {
        matches!(self, FiberState::Terminated | FiberState::Failed)
    }
}

struct Context(Coroutine<Driver, Transfer, Result<(), FiberError>, DefaultStack>);

// SAFETY: a fiber is resumed by one thread at a time (`&mut` access), and the
// frame accessors in `context` re-read thread-locals after every switch.
// Entry code must not hold borrows of thread-local data across a suspension
// point; that is the fiber body's contract, not the scheduler's.
unsafe impl Send for Context {}

impl Context {
    fn new(id: FiberId, stack: DefaultStack, entry: Entry, cancel: Arc<AtomicBool>) -> Self {
        let co = Coroutine::with_stack(
            stack,
            move |yielder: &Yielder<Driver, Transfer>, driver: Driver| {
                let frame = Frame::new(id, yielder, driver);
                context::set_frame(&frame);
                match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => Ok(()),
                    // Dropping a suspended fiber unwinds its stack; let that
                    // unwind reach the coroutine boundary.
                    Err(payload) if cancel.load(Ordering::Acquire) => panic::resume_unwind(payload),
                    Err(payload) => Err(FiberError::from_panic(payload)),
                }
            },
        );
        Context(co)
    }
}

/// How a resumed fiber handed control back.
pub(crate) enum Resumed {
    Suspended(Transfer),
    Finished,
}

/// Configures a fiber before it is created.
#[derive(Clone, Debug)]
pub struct Builder {
    name: Option<String>,
    stack_size: usize,
}

impl Builder {
    /// Defaults: unnamed, [`DEFAULT_STACK_SIZE`].
    pub fn new() -> Self {
        Self {
            name: None,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Name reported in logs.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Usable stack size in bytes.
    pub fn stack_size(self, size: usize) -> Self {
        Self {
            stack_size: size,
            ..self
        }
    }

    /// Create a fiber in `Init` that will run `entry` when first resumed.
    pub fn build<F>(self, entry: F) -> Result<Fiber, FiberError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut fiber = self.empty();
        fiber.reset(entry)?;
        Ok(fiber)
    }

    /// Create a fiber with no entry and no stack; `reset` installs both.
    pub fn empty(self) -> Fiber {
        Fiber {
            id: FiberId::next(),
            name: self.name,
            state: FiberState::Init,
            stack_size: self.stack_size,
            context: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// A resumable execution context with its own stack.
pub struct Fiber {
    id: FiberId,
    name: Option<String>,
    state: FiberState,
    stack_size: usize,
    context: Option<Context>,
    cancel: Arc<AtomicBool>,
}

impl Fiber {
    /// Create a fiber that will run `entry`.
    ///
    /// # Panics
    ///
    /// If the stack cannot be allocated; use [`Builder::build`] to handle that.
    pub fn new<F>(entry: F) -> Fiber
    where
        F: FnOnce() + Send + 'static,
    {
        Builder::new()
            .build(entry)
            .expect("failed to allocate fiber stack")
    }

    /// A fiber without an entry, to be given one with [`Fiber::reset`].
    pub fn empty() -> Fiber {
        Builder::new().empty()
    }

    /// Builder for a configured fiber.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Identity, stable across resets.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Name given at construction.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FiberState {
        self.state
    }

    /// Whether `call` or a scheduler may resume it now.
    pub fn is_resumable(&self) -> bool {
        matches!(self.state, FiberState::Init | FiberState::Hold) && self.context.is_some()
    }

    /// Install a new entry and return to `Init`, reusing the stack of a
    /// finished fiber.
    ///
    /// # Panics
    ///
    /// When the fiber is suspended (`Hold`) or executing.
    pub fn reset<F>(&mut self, entry: F) -> Result<(), FiberError>
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            !matches!(self.state, FiberState::Hold | FiberState::Executing),
            "cannot reset {} while it is {:?}",
            self.id,
            self.state
        );
        let stack = match self.context.take() {
            Some(mut ctx) => {
                // Not started: drops the pending entry. Finished: no-op.
                ctx.0.force_unwind();
                ctx.0.into_stack()
            }
            None => DefaultStack::new(self.stack_size).map_err(FiberError::Stack)?,
        };
        self.context = Some(Context::new(
            self.id,
            stack,
            Box::new(entry),
            self.cancel.clone(),
        ));
        self.state = FiberState::Init;
        Ok(())
    }

    /// Resume the fiber on the calling thread until it yields or finishes.
    ///
    /// Returns the state it stopped in (`Hold` or `Terminated`), or the panic
    /// of its entry computation, which leaves it `Failed`.
    ///
    /// Primitives used by a fiber driven this way block the calling thread
    /// instead of parking the fiber.
    ///
    /// # Panics
    ///
    /// When the fiber has no entry, is already executing, or has finished.
    pub fn call(&mut self) -> Result<FiberState, FiberError> {
        match self.resume(None)? {
            Resumed::Finished => Ok(FiberState::Terminated),
            Resumed::Suspended(Transfer::Yield) => Ok(FiberState::Hold),
            Resumed::Suspended(_) => {
                unreachable!("a fiber without a scheduler never parks or switches")
            }
        }
    }

    pub(crate) fn resume(&mut self, driver: Driver) -> Result<Resumed, FiberError> {
        match self.state {
            FiberState::Executing => panic!("{} is already executing", self.id),
            FiberState::Terminated | FiberState::Failed => {
                panic!("{} has already finished ({:?})", self.id, self.state)
            }
            FiberState::Init | FiberState::Hold => {}
        }
        let id = self.id;
        let ctx = self
            .context
            .as_mut()
            .unwrap_or_else(|| panic!("{id} has no entry to run"));

        self.state = FiberState::Executing;
        let outer = context::frame();
        let result = ctx.0.resume(driver);
        context::set_frame(outer);

        match result {
            CoroutineResult::Yield(transfer) => {
                self.state = FiberState::Hold;
                Ok(Resumed::Suspended(transfer))
            }
            CoroutineResult::Return(Ok(())) => {
                self.state = FiberState::Terminated;
                Ok(Resumed::Finished)
            }
            CoroutineResult::Return(Err(e)) => {
                self.state = FiberState::Failed;
                Err(e)
            }
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.state == FiberState::Hold {
            tracing::trace!(fiber = %self.id, "dropping suspended fiber, unwinding its stack");
            self.cancel.store(true, Ordering::Release);
        }
    }
}

impl core::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn empty_fiber_has_no_entry() {
        let fiber = Fiber::empty();
        assert_eq!(fiber.state(), FiberState::Init);
        assert!(fiber.context.is_none());
    }

    #[test]
    fn reset_before_first_run_replaces_the_entry() {
        let first = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let (f, h) = (first.clone(), hits.clone());
        let mut fiber = Fiber::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(Arc::strong_count(&first), 2);

        fiber
            .reset(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        // The pending entry was dropped, the context kept.
        assert_eq!(Arc::strong_count(&first), 1);
        assert!(fiber.context.is_some());
        assert_eq!(fiber.call().unwrap(), FiberState::Terminated);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finished_stack_is_reused_by_reset() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut fiber = Fiber::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fiber.call().unwrap(), FiberState::Terminated);
        assert!(fiber.context.as_ref().unwrap().0.done());

        let h = hits.clone();
        fiber.reset(move || {
            h.fetch_add(10, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(fiber.state(), FiberState::Init);
        assert_eq!(fiber.call().unwrap(), FiberState::Terminated);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }
}
