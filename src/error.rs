use std::any::Any;
use std::io;

use thiserror::Error;

/// Errors surfaced by a fiber to whoever resumed it.
#[derive(Debug, Error)]
pub enum FiberError {
    /// The entry computation panicked; the fiber is now `Failed`.
    #[error("fiber panicked: {0}")]
    Panicked(String),
    /// The execution stack could not be allocated.
    #[error("failed to allocate fiber stack: {0}")]
    Stack(#[source] io::Error),
}

impl FiberError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        FiberError::Panicked(msg)
    }
}

/// Errors raised while building a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A pool needs at least one thread, counting the caller's.
    #[error("a scheduler needs at least one thread")]
    NoThreads,
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Crate-wide result alias.
pub type Result<T, E = SchedulerError> = core::result::Result<T, E>;
