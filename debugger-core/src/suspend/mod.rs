// Suspend/resume accounting
//
// A thread is suspended while at least one active context suspends it. Contexts
// are stacked in push order and owned by the `SuspendManager` arena.

mod context;
mod manager;
mod threads;

pub use context::{ContextId, ContextKind, SuspendContext};
pub use manager::SuspendManager;
pub use threads::ThreadState;

/// Whether a suspend-context command can run now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The context is active but does not currently suspend the thread
    Postpone,
    /// The context has resumed
    Gone,
}
