//! Thread placement, ids and wait helpers.

/// Worker thread pinning.
pub mod affinity;
/// Sequential per-thread ids.
pub mod thread_id;
/// Wait budget utilities for spin-wait loops.
pub mod wait;

pub use affinity::{PinConfig, pin_current_thread};
pub use thread_id::ThreadId;
pub use wait::WaitBudget;
