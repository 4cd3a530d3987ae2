// Commands executed by the manager thread
//
// A command runs with exclusive access to the `DebuggerContext`. Commands that are
// dropped without running get a `notify_cancelled` call instead.

use crate::context::DebuggerContext;
use crate::error::DebuggerResult;
use crate::suspend::{ContextId, Readiness};
use futures::future::{BoxFuture, FutureExt};
use jdwp_client::ThreadId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Queue lane; lower lanes run only when every higher lane is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
    Lowest = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::High, Priority::Normal, Priority::Low, Priority::Lowest];

    pub(crate) fn lane(self) -> usize {
        self as usize
    }
}

pub trait DebuggerCommand: Send + 'static {
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn name(&self) -> &str {
        "command"
    }

    fn run<'a>(self: Box<Self>, cx: &'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<()>>;

    /// Called instead of `run` when the command will never execute
    fn notify_cancelled(self: Box<Self>) {}

    /// Forced commands survive queue shutdown (worker switch-backs)
    fn is_forced(&self) -> bool {
        false
    }
}

/// Command built from a closure; see [`command`]
pub struct FnCommand<F> {
    name: &'static str,
    priority: Priority,
    forced: bool,
    f: F,
}

/// Wrap a closure as a command
///
/// ```ignore
/// queue.schedule(command(Priority::Normal, |cx| async move { cx.suspend.pause().await }.boxed()));
/// ```
pub fn command<F>(priority: Priority, f: F) -> FnCommand<F>
where
    F: for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<()>> + Send + 'static,
{
    FnCommand {
        name: "command",
        priority,
        forced: false,
        f,
    }
}

impl<F> FnCommand<F> {
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub(crate) fn forced(mut self) -> Self {
        self.forced = true;
        self
    }
}

impl<F> DebuggerCommand for FnCommand<F>
where
    F: for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<()>> + Send + 'static,
{
    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &str {
        self.name
    }

    fn run<'a>(self: Box<Self>, cx: &'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<()>> {
        (self.f)(cx)
    }

    fn notify_cancelled(self: Box<Self>) {
        debug!("Command {} cancelled", self.name);
    }

    fn is_forced(&self) -> bool {
        self.forced
    }
}

/// A command that needs a suspend context, and optionally a thread suspended by it
///
/// It is parked on the context while the thread runs (for example during an
/// evaluation) and re-scheduled once the context suspends the thread again. If the
/// context resumes first, the command is cancelled.
pub struct SuspendContextCommand {
    context: ContextId,
    thread: Option<ThreadId>,
    inner: Box<dyn DebuggerCommand>,
}

impl SuspendContextCommand {
    pub fn new(context: ContextId, thread: Option<ThreadId>, inner: impl DebuggerCommand) -> Self {
        Self {
            context,
            thread,
            inner: Box::new(inner),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn thread(&self) -> Option<ThreadId> {
        self.thread
    }
}

impl DebuggerCommand for SuspendContextCommand {
    fn priority(&self) -> Priority {
        self.inner.priority()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run<'a>(self: Box<Self>, cx: &'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<()>> {
        async move {
            match cx.suspend.readiness(self.context, self.thread) {
                Readiness::Ready => self.inner.run(cx).await,
                Readiness::Postpone => {
                    debug!(
                        "Postponing {} until context {} suspends thread {:?}",
                        self.inner.name(),
                        self.context,
                        self.thread
                    );
                    cx.suspend.postpone(*self);
                    Ok(())
                }
                Readiness::Gone => {
                    debug!("Context {} already resumed, dropping {}", self.context, self.inner.name());
                    self.inner.notify_cancelled();
                    Ok(())
                }
            }
        }
        .boxed()
    }

    fn notify_cancelled(self: Box<Self>) {
        self.inner.notify_cancelled();
    }
}
