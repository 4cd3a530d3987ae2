// Suspend manager
//
// Owns every suspend context and the per-thread suspend counts. The model is kept in
// step with the debuggee: each protocol-level suspension a context holds is released
// by exactly one protocol resume when the context resumes.

use super::context::{ContextId, ContextKind, SuspendContext};
use super::threads::{ThreadRegistry, ThreadState};
use super::Readiness;
use crate::command::{DebuggerCommand, SuspendContextCommand};
use crate::error::{DebuggerError, DebuggerResult};
use crate::listener::Listeners;
use crate::vm::VirtualMachine;
use jdwp_client::types::ObjectId;
use jdwp_client::{EventSet, SuspendPolicy, ThreadId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct SuspendManager {
    vm: Arc<dyn VirtualMachine>,
    listeners: Listeners,
    contexts: HashMap<ContextId, SuspendContext>,
    /// Active contexts in push order
    order: Vec<ContextId>,
    next_id: u64,
    threads: ThreadRegistry,
    frozen: HashMap<ThreadId, ContextId>,
}

impl SuspendManager {
    pub fn new(vm: Arc<dyn VirtualMachine>, listeners: Listeners) -> Self {
        Self {
            vm,
            listeners,
            contexts: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
            threads: ThreadRegistry::default(),
            frozen: HashMap::new(),
        }
    }

    pub fn register_thread(&mut self, thread: ThreadId) {
        self.threads.register(thread);
    }

    pub fn thread_died(&mut self, thread: ThreadId) {
        self.threads.mark_collected(thread);
        self.frozen.remove(&thread);
    }

    pub fn thread_state(&self, thread: ThreadId) -> DebuggerResult<&ThreadState> {
        self.threads.get(thread)
    }

    pub fn live_threads(&self) -> Vec<ThreadId> {
        self.threads.live().collect()
    }

    /// Look up a context, resumed or not
    pub fn context(&self, id: ContextId) -> DebuggerResult<&SuspendContext> {
        self.contexts.get(&id).ok_or_else(|| self.missing(id))
    }

    fn missing(&self, id: ContextId) -> DebuggerError {
        if id.0 < self.next_id {
            DebuggerError::InvalidState(format!("context {} already resumed", id))
        } else {
            DebuggerError::InvalidState(format!("unknown context {}", id))
        }
    }

    fn active_mut(&mut self, id: ContextId) -> DebuggerResult<&mut SuspendContext> {
        let missing = self.missing(id);
        match self.contexts.get_mut(&id) {
            Some(cx) if !cx.resumed => Ok(cx),
            Some(_) => Err(DebuggerError::InvalidState(format!("context {} already resumed", id))),
            None => Err(missing),
        }
    }

    /// Active contexts, oldest first
    pub fn active_contexts(&self) -> impl Iterator<Item = &SuspendContext> + '_ {
        self.order.iter().filter_map(|id| self.contexts.get(id))
    }

    /// Most recent active all-thread context
    pub fn active_all_context(&self) -> Option<ContextId> {
        self.active_contexts()
            .filter(|cx| cx.policy == SuspendPolicy::All)
            .last()
            .map(|cx| cx.id)
    }

    /// Active all-thread context that let `thread` go with an explicit resume
    pub fn context_with_resumed_thread(&self, thread: ThreadId) -> Option<ContextId> {
        self.active_contexts()
            .filter(|cx| {
                cx.policy == SuspendPolicy::All
                    && cx.resumed_threads.contains(&thread)
                    && cx.evaluating != Some(thread)
            })
            .last()
            .map(|cx| cx.id)
    }

    pub fn is_suspended(&self, thread: ThreadId) -> DebuggerResult<bool> {
        Ok(self.suspend_count(thread)? > 0)
    }

    pub fn suspend_count(&self, thread: ThreadId) -> DebuggerResult<usize> {
        Ok(self.threads.get(thread)?.suspend_count)
    }

    pub fn suspending_contexts(&self, thread: ThreadId) -> Vec<ContextId> {
        self.active_contexts()
            .filter(|cx| cx.suspends(thread))
            .map(|cx| cx.id)
            .collect()
    }

    /// Create a context for a suspension the debuggee already performed
    pub fn push_suspend_context(
        &mut self,
        policy: SuspendPolicy,
        kind: ContextKind,
        event_set: Option<EventSet>,
        thread: Option<ThreadId>,
        votes: usize,
    ) -> DebuggerResult<ContextId> {
        let id = ContextId(self.next_id);
        self.next_id += 1;

        let mut cx = SuspendContext::new(id, policy, kind, event_set, votes);
        if let Some(thread) = thread {
            cx.set_thread(thread)?;
        }
        if let Some(thread) = cx.thread {
            self.threads.register(thread);
        }

        if policy == SuspendPolicy::All {
            if let Some(existing) = self.active_all_context() {
                error!(
                    "Suspend context {} pushed while all-thread context {} is still active",
                    id, existing
                );
            }
        }

        let suspended: BTreeSet<ThreadId> = match policy {
            SuspendPolicy::All => self.threads.live().collect(),
            SuspendPolicy::EventThread => cx.thread.into_iter().collect(),
            SuspendPolicy::None => BTreeSet::new(),
        };
        for thread in &suspended {
            self.threads.increment(*thread);
        }
        cx.suspended = suspended;

        debug!(
            "Pushed suspend context {} ({:?}, {:?}, {} votes, thread {:?})",
            id, policy, kind, votes, cx.thread
        );
        self.contexts.insert(id, cx);
        self.order.push(id);
        Ok(id)
    }

    /// Context for an event set; one vote per event
    pub fn push_event_set(&mut self, set: EventSet) -> DebuggerResult<ContextId> {
        let policy = set.suspend_policy;
        let votes = set.events.len();
        self.push_suspend_context(policy, ContextKind::Event, Some(set), None, votes)
    }

    pub async fn vote_resume(&mut self, id: ContextId) -> DebuggerResult<()> {
        self.vote(id, false).await
    }

    pub async fn vote_suspend(&mut self, id: ContextId) -> DebuggerResult<()> {
        self.vote(id, true).await
    }

    async fn vote(&mut self, id: ContextId, suspend: bool) -> DebuggerResult<()> {
        let cx = self.active_mut(id)?;
        if cx.pending_votes() == 0 {
            return Err(DebuggerError::InvalidState(format!(
                "context {} received more votes than events",
                id
            )));
        }
        if suspend {
            cx.suspend_votes += 1;
        } else {
            cx.resume_votes += 1;
        }
        if cx.pending_votes() > 0 {
            return Ok(());
        }

        if cx.suspend_votes > 0 || cx.pinned {
            self.fire_paused(id);
            Ok(())
        } else {
            self.resume_context(id).await
        }
    }

    pub(crate) fn fire_paused(&self, id: ContextId) {
        if let Some(cx) = self.contexts.get(&id) {
            info!("Debuggee paused in context {} (thread {:?})", id, cx.thread);
            self.listeners.fire(|l| l.paused(cx));
        }
    }

    /// Resume everything the context holds; a context resumes at most once
    pub async fn resume_context(&mut self, id: ContextId) -> DebuggerResult<()> {
        let cx = self.active_mut(id)?;
        cx.resumed = true;

        let policy = cx.policy;
        let thread = cx.thread;
        let evaluating = cx.evaluating;
        // An evaluating thread was never resumed at protocol level
        let explicitly_resumed: Vec<ThreadId> = cx
            .resumed_threads
            .iter()
            .copied()
            .filter(|t| Some(*t) != evaluating)
            .collect();
        let still_suspended: Vec<ThreadId> = cx
            .suspended
            .iter()
            .copied()
            .filter(|t| !cx.resumed_threads.contains(t))
            .collect();
        let kept = std::mem::take(&mut cx.kept_references);
        let postponed = std::mem::take(&mut cx.postponed);

        for thread in &still_suspended {
            self.threads.decrement(*thread);
        }
        self.order.retain(|c| *c != id);
        if let Some(thread) = thread {
            if self.frozen.get(&thread) == Some(&id) {
                self.frozen.remove(&thread);
                self.threads.state_mut(thread).frozen = false;
            }
        }
        for cmd in postponed {
            Box::new(cmd).notify_cancelled();
        }

        // Threads that died since cannot be suspended again
        let resuspend: Vec<ThreadId> = explicitly_resumed
            .iter()
            .copied()
            .filter(|t| self.threads.get(*t).is_ok())
            .collect();
        let release_thread = thread.filter(|t| !explicitly_resumed.contains(t));
        let result = release(self.vm.as_ref(), policy, release_thread, &resuspend, kept).await;

        debug!("Resumed suspend context {}", id);
        if let Some(cx) = self.contexts.get(&id) {
            self.listeners.fire(|l| l.resumed(cx));
        }
        self.contexts.remove(&id);
        result
    }

    /// Release an event set no context was created for
    pub async fn resume_event_set(&mut self, set: &EventSet) -> DebuggerResult<()> {
        match set.suspend_policy {
            SuspendPolicy::All => self.vm.resume().await,
            SuspendPolicy::EventThread => match set.thread() {
                Some(thread) => self.vm.resume_thread(thread).await,
                None => Ok(()),
            },
            SuspendPolicy::None => Ok(()),
        }
    }

    /// Let one thread run while the rest of the context stays suspended
    pub async fn resume_thread(&mut self, id: ContextId, thread: ThreadId) -> DebuggerResult<()> {
        self.threads.get(thread)?;
        let cx = self.active_mut(id)?;
        if !cx.suspends(thread) {
            return Err(DebuggerError::InvalidState(format!(
                "thread {} is not suspended by context {}",
                thread, id
            )));
        }
        cx.resumed_threads.insert(thread);
        self.threads.decrement(thread);
        debug!("Resuming thread {} inside context {}", thread, id);
        self.vm.resume_thread(thread).await
    }

    /// Undo `resume_thread`; returns commands that were waiting for the thread
    pub async fn suspend_thread_again(
        &mut self,
        id: ContextId,
        thread: ThreadId,
    ) -> DebuggerResult<Vec<SuspendContextCommand>> {
        let cx = self.active_mut(id)?;
        if cx.evaluating == Some(thread) || !cx.resumed_threads.contains(&thread) {
            return Err(DebuggerError::InvalidState(format!(
                "thread {} was not resumed inside context {}",
                thread, id
            )));
        }
        self.vm.suspend_thread(thread).await?;

        let cx = self.active_mut(id)?;
        cx.resumed_threads.remove(&thread);
        let ready = take_postponed_for(cx, thread);
        self.threads.increment(thread);
        Ok(ready)
    }

    /// Pin an object against collection until the context resumes
    pub async fn keep_reference(&mut self, id: ContextId, object: ObjectId) -> DebuggerResult<()> {
        self.active_mut(id)?;
        self.vm.disable_collection(object).await?;
        self.active_mut(id)?.kept_references.push(object);
        Ok(())
    }

    /// Suspend the whole VM on user request
    pub async fn pause(&mut self) -> DebuggerResult<ContextId> {
        if let Some(existing) = self.active_all_context() {
            return Err(DebuggerError::InvalidState(format!(
                "VM already suspended by context {}",
                existing
            )));
        }
        self.vm.suspend().await?;
        let id = self.push_suspend_context(SuspendPolicy::All, ContextKind::Pause, None, None, 0)?;
        self.active_mut(id)?.pinned = true;
        self.fire_paused(id);
        Ok(id)
    }

    pub async fn freeze_thread(&mut self, thread: ThreadId) -> DebuggerResult<ContextId> {
        if self.threads.get(thread)?.frozen {
            return Err(DebuggerError::InvalidState(format!("thread {} already frozen", thread)));
        }
        self.vm.suspend_thread(thread).await?;
        let id = self.push_suspend_context(
            SuspendPolicy::EventThread,
            ContextKind::Freeze,
            None,
            Some(thread),
            0,
        )?;
        self.active_mut(id)?.pinned = true;
        self.threads.state_mut(thread).frozen = true;
        self.frozen.insert(thread, id);
        info!("Thread {} frozen in context {}", thread, id);
        Ok(id)
    }

    pub async fn unfreeze_thread(&mut self, thread: ThreadId) -> DebuggerResult<()> {
        let id = self
            .frozen
            .get(&thread)
            .copied()
            .ok_or_else(|| DebuggerError::InvalidState(format!("thread {} is not frozen", thread)))?;
        self.resume_context(id).await
    }

    /// Mark `thread` running for the duration of a method invocation
    pub fn begin_evaluation(&mut self, id: ContextId, thread: ThreadId) -> DebuggerResult<()> {
        let cx = self.active_mut(id)?;
        if let Some(current) = cx.evaluating {
            return Err(DebuggerError::InvalidState(format!(
                "context {} is already evaluating on thread {}",
                id, current
            )));
        }
        if !cx.suspends(thread) {
            return Err(DebuggerError::InvalidState(format!(
                "thread {} is not suspended by context {}",
                thread, id
            )));
        }
        cx.evaluating = Some(thread);
        cx.resumed_threads.insert(thread);
        self.threads.decrement(thread);
        Ok(())
    }

    /// Restore the thread after an invocation; returns commands that were waiting for it
    pub fn end_evaluation(
        &mut self,
        id: ContextId,
        thread: ThreadId,
    ) -> DebuggerResult<Vec<SuspendContextCommand>> {
        let cx = match self.contexts.get_mut(&id) {
            Some(cx) if !cx.resumed => cx,
            // Resumed while the invocation ran; nothing left to restore
            _ => return Ok(Vec::new()),
        };
        if cx.evaluating != Some(thread) {
            return Err(DebuggerError::InvalidState(format!(
                "context {} is not evaluating on thread {}",
                id, thread
            )));
        }
        cx.evaluating = None;
        cx.resumed_threads.remove(&thread);
        let ready = take_postponed_for(cx, thread);
        self.threads.increment(thread);
        Ok(ready)
    }

    pub fn readiness(&self, id: ContextId, thread: Option<ThreadId>) -> Readiness {
        match self.contexts.get(&id) {
            Some(cx) if !cx.resumed => match thread {
                Some(thread) if !cx.suspends(thread) => Readiness::Postpone,
                _ => Readiness::Ready,
            },
            _ => Readiness::Gone,
        }
    }

    /// Park a command on its context until the thread is suspended again
    pub fn postpone(&mut self, cmd: SuspendContextCommand) {
        match self.contexts.get_mut(&cmd.context()) {
            Some(cx) if !cx.resumed => cx.postponed.push_back(cmd),
            _ => Box::new(cmd).notify_cancelled(),
        }
    }

    /// Drop every context without touching the debuggee; used at teardown
    pub fn retire_all(&mut self) {
        let ids: Vec<ContextId> = self.order.drain(..).collect();
        for id in ids {
            if let Some(mut cx) = self.contexts.remove(&id) {
                cx.resumed = true;
                for cmd in cx.postponed.drain(..) {
                    Box::new(cmd).notify_cancelled();
                }
            }
        }
        for (_, state) in self.threads.iter_mut() {
            state.suspend_count = 0;
            state.frozen = false;
        }
        self.frozen.clear();
        if !self.contexts.is_empty() {
            warn!("{} resumed contexts left at teardown", self.contexts.len());
            self.contexts.clear();
        }
    }

    /// Check that every count equals the number of active contexts suspending the thread
    pub fn verify_counts(&self) -> DebuggerResult<()> {
        for (thread, state) in self.threads.iter() {
            let expected = self.suspending_contexts(thread).len();
            if state.suspend_count != expected {
                return Err(DebuggerError::InvalidState(format!(
                    "thread {} suspend count {} but {} contexts suspend it",
                    thread, state.suspend_count, expected
                )));
            }
        }
        Ok(())
    }
}

async fn release(
    vm: &dyn VirtualMachine,
    policy: SuspendPolicy,
    thread: Option<ThreadId>,
    resuspend: &[ThreadId],
    kept: Vec<ObjectId>,
) -> DebuggerResult<()> {
    for object in kept {
        if let Err(e) = vm.enable_collection(object).await {
            if e.is_fatal() {
                return Err(e);
            }
            debug!("Could not release object {:x}: {}", object, e);
        }
    }

    match policy {
        SuspendPolicy::All => {
            for thread in resuspend {
                vm.suspend_thread(*thread).await?;
            }
            vm.resume().await
        }
        SuspendPolicy::EventThread => match thread {
            Some(thread) => vm.resume_thread(thread).await,
            None => Ok(()),
        },
        SuspendPolicy::None => Ok(()),
    }
}

fn take_postponed_for(cx: &mut SuspendContext, thread: ThreadId) -> Vec<SuspendContextCommand> {
    let (ready, waiting): (Vec<_>, Vec<_>) = cx
        .postponed
        .drain(..)
        .partition(|cmd| cmd.thread().map_or(true, |t| t == thread));
    cx.postponed.extend(waiting);
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command;
    use crate::mock::{self, MockVirtualMachine};
    use crate::vm::VirtualMachine;
    use futures::FutureExt;
    use jdwp_client::Location;

    fn manager(threads: &[ThreadId]) -> (Arc<MockVirtualMachine>, SuspendManager) {
        let vm = Arc::new(MockVirtualMachine::new());
        let mut suspend = SuspendManager::new(vm.clone(), Listeners::default());
        for thread in threads {
            vm.add_thread(*thread);
            suspend.register_thread(*thread);
        }
        (vm, suspend)
    }

    fn breakpoint_set(policy: SuspendPolicy, thread: ThreadId) -> EventSet {
        mock::event_set(policy, vec![mock::breakpoint(1, thread, Location::new(1, 1, 0))])
    }

    #[tokio::test]
    async fn test_all_context_counts_every_live_thread() {
        let (vm, mut suspend) = manager(&[1, 2, 3]);
        vm.suspend().await.unwrap();
        let cx = suspend.push_event_set(breakpoint_set(SuspendPolicy::All, 1)).unwrap();

        for thread in [1, 2, 3] {
            assert_eq!(suspend.suspend_count(thread).unwrap(), 1);
        }
        assert_eq!(suspend.context(cx).unwrap().thread(), Some(1));

        suspend.vote_resume(cx).await.unwrap();
        for thread in [1, 2, 3] {
            assert_eq!(suspend.suspend_count(thread).unwrap(), 0);
            assert_eq!(vm.protocol_suspend_count(thread), 0);
        }
        suspend.verify_counts().unwrap();
    }

    #[tokio::test]
    async fn test_double_resume_is_rejected() {
        let (vm, mut suspend) = manager(&[1, 2]);
        let cx = suspend.pause().await.unwrap();
        suspend.resume_context(cx).await.unwrap();
        let resumes = vm.calls().iter().filter(|c| *c == "resume").count();

        let err = suspend.resume_context(cx).await.unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidState(_)));
        assert_eq!(vm.calls().iter().filter(|c| *c == "resume").count(), resumes);
        assert_eq!(suspend.suspend_count(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extra_vote_is_rejected() {
        let (_vm, mut suspend) = manager(&[1]);
        let cx = suspend.push_event_set(breakpoint_set(SuspendPolicy::EventThread, 1)).unwrap();
        suspend.vote_suspend(cx).await.unwrap();
        assert!(suspend.vote_suspend(cx).await.is_err());
        assert_eq!(suspend.suspend_count(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nested_contexts_keep_thread_suspended() {
        let (vm, mut suspend) = manager(&[1, 2]);
        let first = suspend.push_event_set(breakpoint_set(SuspendPolicy::EventThread, 1)).unwrap();
        vm.suspend_thread(1).await.unwrap();
        let second = suspend.push_event_set(breakpoint_set(SuspendPolicy::EventThread, 1)).unwrap();
        vm.suspend_thread(1).await.unwrap();

        assert_eq!(suspend.suspend_count(1).unwrap(), 2);
        assert_eq!(suspend.suspending_contexts(1), vec![first, second]);

        suspend.resume_context(first).await.unwrap();
        assert!(suspend.is_suspended(1).unwrap());
        assert_eq!(vm.protocol_suspend_count(1), 1);

        suspend.resume_context(second).await.unwrap();
        assert!(!suspend.is_suspended(1).unwrap());
        assert_eq!(vm.protocol_suspend_count(1), 0);
    }

    #[tokio::test]
    async fn test_resumed_thread_is_resuspended_before_vm_resume() {
        let (vm, mut suspend) = manager(&[1, 2]);
        let cx = suspend.pause().await.unwrap();
        suspend.resume_thread(cx, 1).await.unwrap();
        assert_eq!(suspend.suspend_count(1).unwrap(), 0);
        assert_eq!(vm.protocol_suspend_count(1), 0);
        assert_eq!(vm.protocol_suspend_count(2), 1);

        suspend.resume_context(cx).await.unwrap();
        assert_eq!(vm.protocol_suspend_count(1), 0);
        assert_eq!(vm.protocol_suspend_count(2), 0);
        suspend.verify_counts().unwrap();
    }

    #[tokio::test]
    async fn test_second_pause_is_refused() {
        let (_vm, mut suspend) = manager(&[1]);
        suspend.pause().await.unwrap();
        assert!(matches!(suspend.pause().await, Err(DebuggerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_freeze_and_unfreeze() {
        let (vm, mut suspend) = manager(&[1, 2]);
        suspend.freeze_thread(2).await.unwrap();
        assert!(suspend.thread_state(2).unwrap().frozen);
        assert_eq!(vm.protocol_suspend_count(2), 1);
        assert!(suspend.freeze_thread(2).await.is_err());

        suspend.unfreeze_thread(2).await.unwrap();
        assert!(!suspend.thread_state(2).unwrap().frozen);
        assert_eq!(vm.protocol_suspend_count(2), 0);
        assert!(suspend.unfreeze_thread(2).await.is_err());
    }

    #[tokio::test]
    async fn test_evaluation_has_zero_net_effect() {
        let (vm, mut suspend) = manager(&[1, 2]);
        let cx = suspend.pause().await.unwrap();

        suspend.begin_evaluation(cx, 1).unwrap();
        assert_eq!(suspend.suspend_count(1).unwrap(), 0);
        assert!(suspend.begin_evaluation(cx, 2).is_err());
        assert!(suspend.end_evaluation(cx, 1).unwrap().is_empty());

        assert_eq!(suspend.suspend_count(1).unwrap(), 1);
        assert_eq!(vm.protocol_suspend_count(1), 1);
        suspend.verify_counts().unwrap();
    }

    #[tokio::test]
    async fn test_postponed_command_returns_when_thread_suspends_again() {
        let (_vm, mut suspend) = manager(&[1]);
        let cx = suspend.pause().await.unwrap();
        suspend.begin_evaluation(cx, 1).unwrap();

        assert_eq!(suspend.readiness(cx, Some(1)), Readiness::Postpone);
        suspend.postpone(SuspendContextCommand::new(
            cx,
            Some(1),
            command(crate::Priority::Normal, |_cx| async { Ok(()) }.boxed()),
        ));

        let ready = suspend.end_evaluation(cx, 1).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(suspend.readiness(cx, Some(1)), Readiness::Ready);

        suspend.resume_context(cx).await.unwrap();
        assert_eq!(suspend.readiness(cx, Some(1)), Readiness::Gone);
    }

    #[tokio::test]
    async fn test_kept_references_released_once() {
        let (vm, mut suspend) = manager(&[1]);
        let cx = suspend.pause().await.unwrap();
        suspend.keep_reference(cx, 0x55).await.unwrap();
        assert_eq!(vm.pinned_objects(), vec![0x55]);

        suspend.resume_context(cx).await.unwrap();
        assert!(vm.pinned_objects().is_empty());
        assert!(suspend.resume_context(cx).await.is_err());
        assert_eq!(
            vm.calls().iter().filter(|c| c.starts_with("enable_collection")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_collected_thread_queries_fail() {
        let (_vm, mut suspend) = manager(&[1]);
        suspend.thread_died(1);
        assert!(matches!(suspend.suspend_count(1), Err(DebuggerError::InvalidState(_))));
    }
}
