// Manager thread
//
// A single logical thread executes every command that touches session state. Each
// generation of the manager runs on its own tokio task and owns the
// `DebuggerContext` while it runs; `terminate_and_invoke` can abandon a stuck
// command, after which a new generation with a new identity takes over the context.

use crate::command::{command, DebuggerCommand, FnCommand, Priority};
use crate::context::DebuggerContext;
use crate::error::{DebuggerError, DebuggerResult};
use crate::queue::{BoxedCommand, CommandLanes};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity of one manager generation, unique across all sessions in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static MANAGER_ID: ManagerId;
}

struct Shared {
    lanes: Mutex<CommandLanes>,
    notify: Notify,
    current: AtomicU64,
    /// Sequence number of the command currently executing
    running: Mutex<Option<u64>>,
    next_seq: AtomicU64,
    forks: AtomicUsize,
    interrupt: watch::Sender<u64>,
}

/// Handle to a session's manager thread; cheap to clone
#[derive(Clone)]
pub struct ManagerThread {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ManagerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerThread")
            .field("current", &self.shared.current.load(Ordering::SeqCst))
            .field("queued", &self.shared.lanes.lock().len())
            .finish()
    }
}

enum Exit {
    Finished,
    Interrupted,
}

impl ManagerThread {
    /// Start the manager; `build` creates the context the commands will run against
    pub fn start<B>(build: B) -> (ManagerThread, JoinHandle<()>)
    where
        B: FnOnce(ManagerThread) -> DebuggerContext,
    {
        let (interrupt, _) = watch::channel(0);
        let manager = ManagerThread {
            shared: Arc::new(Shared {
                lanes: Mutex::new(CommandLanes::default()),
                notify: Notify::new(),
                current: AtomicU64::new(0),
                running: Mutex::new(None),
                next_seq: AtomicU64::new(1),
                forks: AtomicUsize::new(0),
                interrupt,
            }),
        };
        let cx = build(manager.clone());
        let handle = tokio::spawn(supervise(manager.shared.clone(), cx));
        (manager, handle)
    }

    /// Identity of the generation currently executing commands
    pub fn current_id(&self) -> ManagerId {
        ManagerId(self.shared.current.load(Ordering::SeqCst))
    }

    /// True when called from a command running on this manager's current generation
    pub fn is_manager_thread(&self) -> bool {
        let current = self.shared.current.load(Ordering::SeqCst);
        MANAGER_ID
            .try_with(|id| id.0 == current)
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lanes.lock().is_closed()
    }

    /// Enqueue a command and return immediately
    pub fn schedule(&self, cmd: impl DebuggerCommand) {
        self.schedule_boxed(Box::new(cmd));
    }

    pub(crate) fn schedule_boxed(&self, cmd: BoxedCommand) {
        let rejected = self.shared.lanes.lock().push_back(cmd);
        match rejected {
            Ok(()) => self.shared.notify.notify_one(),
            Err(cmd) => {
                debug!("Queue closed, cancelling {}", cmd.name());
                cmd.notify_cancelled();
            }
        }
    }

    /// Re-insert a command at the back of its lane
    pub fn push_back(&self, cmd: Box<dyn DebuggerCommand>) {
        self.schedule_boxed(cmd);
    }

    /// Run next on the manager thread when called from it, otherwise schedule
    pub fn invoke(&self, cmd: impl DebuggerCommand) {
        if !self.is_manager_thread() {
            self.schedule(cmd);
            return;
        }
        let rejected = self.shared.lanes.lock().push_front(Box::new(cmd));
        match rejected {
            Ok(()) => self.shared.notify.notify_one(),
            Err(cmd) => cmd.notify_cancelled(),
        }
    }

    /// Accepted even after `close`; used for worker switch-backs
    pub(crate) fn schedule_forced(&self, cmd: BoxedCommand) {
        debug_assert!(cmd.is_forced());
        self.schedule_boxed(cmd);
    }

    /// Run a closure on the manager thread and await its result
    ///
    /// Must not be called from the manager thread itself: the caller would wait on
    /// a command that can only run after the caller returns.
    pub async fn call<T, F>(&self, priority: Priority, f: F) -> DebuggerResult<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<T>> + Send + 'static,
    {
        if self.is_manager_thread() {
            return Err(DebuggerError::invalid_state(
                "invoke_and_wait called on the manager thread",
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.schedule(reply_command(priority, f, tx));
        rx.await.map_err(|_| DebuggerError::Cancelled)?
    }

    /// Run a prepared command and wait until it has finished or been cancelled
    pub async fn invoke_and_wait(&self, cmd: impl DebuggerCommand) -> DebuggerResult<()> {
        if self.is_manager_thread() {
            return Err(DebuggerError::invalid_state(
                "invoke_and_wait called on the manager thread",
            ));
        }
        let (tx, rx) = oneshot::channel();
        let priority = cmd.priority();
        let inner: BoxedCommand = Box::new(cmd);
        self.schedule(reply_command(priority, move |cx| inner.run(cx), tx).named("invoke-and-wait"));
        rx.await.map_err(|_| DebuggerError::Cancelled)?
    }

    /// Schedule `cmd`; abandon the command running now if it outlives `timeout`
    pub fn terminate_and_invoke(&self, cmd: impl DebuggerCommand, timeout: Duration) {
        let running = *self.shared.running.lock();
        self.schedule(cmd);

        let Some(seq) = running else {
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if *shared.running.lock() == Some(seq) {
                warn!("Command {} did not finish within {:?}, interrupting manager", seq, timeout);
                shared.interrupt.send_replace(seq);
            }
        });
    }

    /// Cancel everything queued and every later submission
    pub fn close(&self) {
        let cancelled = self.shared.lanes.lock().close();
        if !cancelled.is_empty() {
            debug!("Closing command queue, cancelling {} commands", cancelled.len());
        }
        for cmd in cancelled {
            cmd.notify_cancelled();
        }
        self.shared.notify.notify_one();
    }

    pub(crate) fn fork_started(&self) {
        self.shared.forks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn fork_finished(&self) {
        self.shared.forks.fetch_sub(1, Ordering::SeqCst);
    }

    /// Worker operations whose switch-back has not run yet
    pub fn outstanding_forks(&self) -> usize {
        self.shared.forks.load(Ordering::SeqCst)
    }
}

/// Command that runs `f` and sends its result to a waiter
pub(crate) fn reply_command<T, F>(
    priority: Priority,
    f: F,
    tx: oneshot::Sender<DebuggerResult<T>>,
) -> FnCommand<impl for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<()>> + Send + 'static>
where
    T: Send + 'static,
    F: for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<T>> + Send + 'static,
{
    command(priority, move |cx| {
        async move {
            let result = f(cx).await;
            let fatal = matches!(result, Err(DebuggerError::ProtocolDisconnected));
            tx.send(result).ok();
            // The waiter has its answer; surface the disconnect to the loop as well
            if fatal {
                Err(DebuggerError::ProtocolDisconnected)
            } else {
                Ok(())
            }
        }
        .boxed()
    })
}

async fn supervise(shared: Arc<Shared>, mut cx: DebuggerContext) {
    loop {
        let id = ManagerId(NEXT_MANAGER_ID.fetch_add(1, Ordering::SeqCst));
        shared.current.store(id.0, Ordering::SeqCst);
        info!("Manager thread {:?} started", id);

        let generation = tokio::spawn(MANAGER_ID.scope(id, run_generation(shared.clone(), cx)));
        match generation.await {
            Ok((_, Exit::Finished)) => {
                info!("Manager thread {:?} finished", id);
                break;
            }
            Ok((next_cx, Exit::Interrupted)) => {
                cx = next_cx;
            }
            Err(e) => {
                error!("Manager thread {:?} died: {}", id, e);
                break;
            }
        }
    }
}

async fn run_generation(shared: Arc<Shared>, mut cx: DebuggerContext) -> (DebuggerContext, Exit) {
    let mut interrupt_rx = shared.interrupt.subscribe();

    while let Some(cmd) = next_command(&shared).await {
        let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
        *shared.running.lock() = Some(seq);
        let name = cmd.name().to_string();
        debug!("Running command {} ({})", seq, name);

        let outcome = {
            let run = AssertUnwindSafe(cmd.run(&mut cx)).catch_unwind();
            tokio::select! {
                _ = interrupt_rx.wait_for(|interrupted| *interrupted == seq) => None,
                result = run => Some(result),
            }
        };
        *shared.running.lock() = None;

        match outcome {
            None => {
                warn!("Command {} ({}) interrupted", seq, name);
                return (cx, Exit::Interrupted);
            }
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(DebuggerError::ProtocolDisconnected))) => {
                warn!("Debuggee disconnected while running {}", name);
                cx.teardown(false).await;
            }
            Some(Ok(Err(DebuggerError::Cancelled))) => {
                debug!("Command {} cancelled", name);
            }
            Some(Ok(Err(e))) => {
                error!("Command {} failed: {}", name, e);
            }
            Some(Err(panic)) => {
                error!("Command {} panicked: {}", name, panic_message(&panic));
            }
        }
    }

    (cx, Exit::Finished)
}

async fn next_command(shared: &Shared) -> Option<BoxedCommand> {
    loop {
        let notified = shared.notify.notified();
        {
            let mut lanes = shared.lanes.lock();
            if let Some(cmd) = lanes.pop() {
                return Some(cmd);
            }
            if lanes.is_closed() && shared.forks.load(Ordering::SeqCst) == 0 {
                return None;
            }
        }
        notified.await;
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
