// Debug session
//
// Public entry point. Every operation is a command on the session's manager
// thread; these methods only build the command and wait for its result.

use crate::command::{command, Priority, SuspendContextCommand};
use crate::config::{DebuggerSettings, SessionConfig};
use crate::context::DebuggerContext;
use crate::error::{DebuggerError, DebuggerResult};
use crate::evaluation::invoke_command;
use crate::jdwp::JdwpVirtualMachine;
use crate::listener::Listeners;
use crate::manager::{reply_command, ManagerThread};
use crate::position::PositionManager;
use crate::requests::{LineBreakpoint, RequestSpec, Requestor, RequestorId};
use crate::stepping::{step_from_context, MethodFilter, StepOptions};
use crate::suspend::{ContextId, SuspendContext};
use crate::vm::{InvokeRequest, PreparedClass, VirtualMachine};
use futures::future::{BoxFuture, FutureExt};
use jdwp_client::{RequestId, SuspendPolicy, ThreadId, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initial,
    Attached,
    Detaching,
    Detached,
}

/// Snapshot of an active suspend context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub id: ContextId,
    pub policy: SuspendPolicy,
    pub thread: Option<ThreadId>,
    pub suspended_threads: Vec<ThreadId>,
    pub evaluating: Option<ThreadId>,
}

impl From<&SuspendContext> for ContextSummary {
    fn from(cx: &SuspendContext) -> Self {
        Self {
            id: cx.id(),
            policy: cx.suspend_policy(),
            thread: cx.thread(),
            suspended_threads: cx.suspended_threads().collect(),
            evaluating: cx.evaluating_thread(),
        }
    }
}

pub struct Session {
    manager: ManagerThread,
    state: watch::Receiver<SessionState>,
    supervisor: JoinHandle<()>,
    terminate_timeout: Duration,
}

impl Session {
    /// Start a session against an already connected VM
    pub async fn attach(
        vm: Arc<dyn VirtualMachine>,
        settings: DebuggerSettings,
        positions: Arc<dyn PositionManager>,
        listeners: Listeners,
    ) -> DebuggerResult<Session> {
        settings.validate()?;
        let terminate_timeout = settings.terminate_timeout();
        let (state_tx, state) = watch::channel(SessionState::Initial);
        let (manager, supervisor) = ManagerThread::start(move |queue| {
            DebuggerContext::new(vm, settings, queue, listeners, positions, state_tx)
        });

        let session = Session {
            manager,
            state,
            supervisor,
            terminate_timeout,
        };
        session.call(Priority::High, |cx| cx.attach().boxed()).await?;
        Ok(session)
    }

    /// Connect to a JDWP agent and attach
    pub async fn connect(
        config: &SessionConfig,
        positions: Arc<dyn PositionManager>,
        listeners: Listeners,
    ) -> DebuggerResult<Session> {
        config.settings.validate()?;
        let vm = JdwpVirtualMachine::connect(&config.host, config.port, config.settings.event_buffer).await?;
        Self::attach(Arc::new(vm), config.settings.clone(), positions, listeners).await
    }

    pub fn manager(&self) -> &ManagerThread {
        &self.manager
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Run a closure on the manager thread
    pub async fn call<T, F>(&self, priority: Priority, f: F) -> DebuggerResult<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<T>> + Send + 'static,
    {
        self.manager.call(priority, f).await
    }

    /// Like `call`, but waits until `context` suspends `thread`
    async fn call_in_context<T, F>(
        &self,
        context: ContextId,
        thread: Option<ThreadId>,
        priority: Priority,
        f: F,
    ) -> DebuggerResult<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut DebuggerContext) -> BoxFuture<'a, DebuggerResult<T>> + Send + 'static,
    {
        if self.manager.is_manager_thread() {
            return Err(DebuggerError::invalid_state("session call made on the manager thread"));
        }
        let (tx, rx) = oneshot::channel();
        self.manager
            .schedule(SuspendContextCommand::new(context, thread, reply_command(priority, f, tx)));
        rx.await.map_err(|_| DebuggerError::Cancelled)?
    }

    pub async fn pause(&self) -> DebuggerResult<ContextId> {
        self.call(Priority::Normal, |cx| cx.suspend.pause().boxed()).await
    }

    pub async fn resume(&self, context: ContextId) -> DebuggerResult<()> {
        self.call(Priority::Normal, move |cx| cx.suspend.resume_context(context).boxed())
            .await
    }

    pub async fn resume_thread(&self, context: ContextId, thread: ThreadId) -> DebuggerResult<()> {
        self.call(Priority::Normal, move |cx| cx.suspend.resume_thread(context, thread).boxed())
            .await
    }

    pub async fn freeze(&self, thread: ThreadId) -> DebuggerResult<ContextId> {
        self.call(Priority::Normal, move |cx| cx.suspend.freeze_thread(thread).boxed())
            .await
    }

    pub async fn unfreeze(&self, thread: ThreadId) -> DebuggerResult<()> {
        self.call(Priority::Normal, move |cx| cx.suspend.unfreeze_thread(thread).boxed())
            .await
    }

    /// Step `thread` out of `context`; returns once the step is issued
    pub async fn step(&self, context: ContextId, thread: ThreadId, options: StepOptions) -> DebuggerResult<()> {
        self.call_in_context(context, Some(thread), Priority::Normal, move |cx| {
            step_from_context(cx, context, thread, options).boxed()
        })
        .await
    }

    pub async fn step_over(&self, context: ContextId, thread: ThreadId) -> DebuggerResult<()> {
        self.step(context, thread, StepOptions::over()).await
    }

    pub async fn step_into(&self, context: ContextId, thread: ThreadId) -> DebuggerResult<()> {
        self.step(context, thread, StepOptions::into()).await
    }

    pub async fn step_out(&self, context: ContextId, thread: ThreadId) -> DebuggerResult<()> {
        self.step(context, thread, StepOptions::out()).await
    }

    /// Step into one particular call on the current line
    ///
    /// A `MethodFilter::Breakpoint` filter only resumes; the caller adds the
    /// breakpoint that stops at the target.
    pub async fn smart_step_into(
        &self,
        context: ContextId,
        thread: ThreadId,
        filter: MethodFilter,
    ) -> DebuggerResult<()> {
        self.step(context, thread, StepOptions::smart_into(filter)).await
    }

    /// Invoke a method on a thread suspended by `context`
    ///
    /// Waits while another invocation uses the thread. Returned objects stay pinned
    /// until the context resumes.
    pub async fn invoke_method(&self, context: ContextId, request: InvokeRequest) -> DebuggerResult<Value> {
        if self.manager.is_manager_thread() {
            return Err(DebuggerError::invalid_state("invoke_method called on the manager thread"));
        }
        let (tx, rx) = oneshot::channel();
        self.manager.schedule(invoke_command(context, request, tx));
        rx.await.map_err(|_| DebuggerError::Cancelled)?
    }

    /// Register a requestor for classes matching `pattern`, including ones already loaded
    pub async fn add_requestor(&self, requestor: Arc<dyn Requestor>, pattern: String) -> DebuggerResult<RequestorId> {
        self.call(Priority::Normal, move |cx| {
            async move {
                let id = cx.registry.register(requestor);
                cx.registry
                    .create_request(id, RequestSpec::ClassPrepare { pattern: pattern.clone() })
                    .await?;
                cx.registry.resolve_loaded(id, &pattern).await?;
                Ok(id)
            }
            .boxed()
        })
        .await
    }

    pub async fn add_line_breakpoint(&self, breakpoint: LineBreakpoint) -> DebuggerResult<RequestorId> {
        let position = breakpoint.position().clone();
        let breakpoint: Arc<dyn Requestor> = Arc::new(breakpoint);
        let pattern = self
            .call(Priority::Normal, move |cx| {
                async move { Ok(cx.positions.class_prepare_pattern(&position)) }.boxed()
            })
            .await?
            .ok_or_else(|| DebuggerError::FilterResolution("no class covers the breakpoint position".to_string()))?;
        info!("Adding line breakpoint for classes matching {}", pattern);
        self.add_requestor(breakpoint, pattern).await
    }

    pub async fn remove_requestor(&self, requestor: RequestorId) -> DebuggerResult<()> {
        self.call(Priority::Normal, move |cx| cx.registry.delete_requestor(requestor).boxed())
            .await
    }

    /// Re-resolve breakpoints after a hot swap
    pub async fn classes_redefined(&self, classes: Vec<PreparedClass>) -> DebuggerResult<Vec<RequestId>> {
        self.call(Priority::Normal, move |cx| {
            async move { cx.registry.classes_redefined(&classes).await }.boxed()
        })
        .await
    }

    pub async fn is_suspended(&self, thread: ThreadId) -> DebuggerResult<bool> {
        self.call(Priority::Normal, move |cx| {
            async move { cx.suspend.is_suspended(thread) }.boxed()
        })
        .await
    }

    pub async fn suspend_count(&self, thread: ThreadId) -> DebuggerResult<usize> {
        self.call(Priority::Normal, move |cx| {
            async move { cx.suspend.suspend_count(thread) }.boxed()
        })
        .await
    }

    pub async fn active_contexts(&self) -> DebuggerResult<Vec<ContextSummary>> {
        self.call(Priority::Normal, |cx| {
            async move { Ok(cx.suspend.active_contexts().map(ContextSummary::from).collect()) }.boxed()
        })
        .await
    }

    /// Check suspend counts against the active contexts
    pub async fn verify_counts(&self) -> DebuggerResult<()> {
        self.call(Priority::Normal, |cx| async move { cx.suspend.verify_counts() }.boxed())
            .await
    }

    /// Detach, interrupting a stuck command after the configured timeout
    pub async fn detach(&self) -> DebuggerResult<()> {
        if self.state() == SessionState::Detached {
            return Ok(());
        }
        self.manager.terminate_and_invoke(
            command(Priority::High, |cx| {
                async move {
                    cx.teardown(true).await;
                    Ok(())
                }
                .boxed()
            })
            .named("detach"),
            self.terminate_timeout,
        );
        self.wait_detached().await;
        Ok(())
    }

    /// Wait until the session has been torn down for any reason
    pub async fn wait_detached(&self) {
        let mut state = self.state.clone();
        // A closed channel means the manager is gone, which only happens after teardown
        let _ = state.wait_for(|s| *s == SessionState::Detached).await;
    }

    /// Wait for the manager thread to drain and exit
    pub async fn join(self) {
        if let Err(e) = self.supervisor.await {
            error!("Manager supervisor failed: {}", e);
        }
    }
}
