// Debugger context
//
// All mutable session state. The running manager generation owns it and lends
// `&mut DebuggerContext` to one command at a time.

use crate::command::{command, DebuggerCommand, Priority, SuspendContextCommand};
use crate::config::DebuggerSettings;
use crate::error::{DebuggerError, DebuggerResult};
use crate::event_pump::spawn_event_pump;
use crate::listener::Listeners;
use crate::manager::{panic_message, ManagerThread};
use crate::position::PositionManager;
use crate::requests::RequestRegistry;
use crate::session::SessionState;
use crate::stepping::SteppingEngine;
use crate::suspend::SuspendManager;
use crate::vm::VirtualMachine;
use crate::worker::WorkerPool;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct DebuggerContext {
    pub vm: Arc<dyn VirtualMachine>,
    pub settings: DebuggerSettings,
    pub queue: ManagerThread,
    pub suspend: SuspendManager,
    pub registry: RequestRegistry,
    pub stepping: SteppingEngine,
    pub workers: WorkerPool,
    pub listeners: Listeners,
    pub positions: Arc<dyn PositionManager>,
    state: watch::Sender<SessionState>,
    pump: Option<CancellationToken>,
}

impl DebuggerContext {
    pub(crate) fn new(
        vm: Arc<dyn VirtualMachine>,
        settings: DebuggerSettings,
        queue: ManagerThread,
        listeners: Listeners,
        positions: Arc<dyn PositionManager>,
        state: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            suspend: SuspendManager::new(vm.clone(), listeners.clone()),
            registry: RequestRegistry::new(vm.clone()),
            stepping: SteppingEngine::default(),
            workers: WorkerPool::default(),
            vm,
            settings,
            queue,
            listeners,
            positions,
            state,
            pump: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Run a command inline on the current command's turn
    pub async fn invoke_now(&mut self, cmd: impl DebuggerCommand) -> DebuggerResult<()> {
        Box::new(cmd).run(self).await
    }

    /// Schedule commands that were waiting for a thread
    pub fn reschedule(&self, commands: Vec<SuspendContextCommand>) {
        for cmd in commands {
            self.queue.schedule(cmd);
        }
    }

    /// Run `op` on a worker task and `continuation` back on the manager thread
    ///
    /// Returns as soon as the worker is started. If `op` panics the continuation is
    /// dropped without running.
    pub fn start_long_process_and_fork<T, Op, K>(
        &mut self,
        description: impl Into<String>,
        op: Op,
        continuation: K,
    ) -> DebuggerResult<()>
    where
        T: Send + 'static,
        Op: Future<Output = T> + Send + 'static,
        K: for<'a> FnOnce(&'a mut DebuggerContext, T) -> BoxFuture<'a, DebuggerResult<()>> + Send + 'static,
    {
        if !self.queue.is_manager_thread() {
            return Err(DebuggerError::invalid_state(
                "start_long_process_and_fork called outside the manager thread",
            ));
        }

        let description = description.into();
        let request = self.workers.begin(description.clone());
        self.queue.fork_started();
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(op).catch_unwind().await;
            let switch_back = command(Priority::High, move |cx| {
                async move {
                    cx.workers.retire(request);
                    cx.queue.fork_finished();
                    match result {
                        Ok(value) => continuation(cx, value).await,
                        Err(panic) => {
                            error!("Worker {} panicked: {}", description, panic_message(&panic));
                            Ok(())
                        }
                    }
                }
                .boxed()
            })
            .named("switch-back")
            .forced();
            queue.schedule_forced(Box::new(switch_back));
        });
        Ok(())
    }

    pub(crate) async fn attach(&mut self) -> DebuggerResult<()> {
        for thread in self.vm.all_threads().await? {
            self.suspend.register_thread(thread);
        }

        let token = CancellationToken::new();
        spawn_event_pump(self.vm.clone(), self.queue.clone(), token.clone());
        self.pump = Some(token);

        self.state.send_replace(SessionState::Attached);
        info!("Session attached, {} threads", self.suspend.live_threads().len());
        self.listeners.fire(|l| l.process_attached());
        Ok(())
    }

    /// Tear the session down; only the first call has any effect
    pub(crate) async fn teardown(&mut self, closed_by_user: bool) {
        if matches!(self.state(), SessionState::Detaching | SessionState::Detached) {
            return;
        }
        info!("Detaching session (closed by user: {})", closed_by_user);
        self.state.send_replace(SessionState::Detaching);

        if let Some(pump) = self.pump.take() {
            pump.cancel();
        }
        self.stepping.clear();
        self.suspend.retire_all();

        if closed_by_user {
            if let Err(e) = self.vm.dispose().await {
                debug!("Dispose failed: {}", e);
            }
        }

        self.state.send_replace(SessionState::Detached);
        self.listeners.fire(|l| l.process_detached(closed_by_user));
        self.queue.close();
    }
}
