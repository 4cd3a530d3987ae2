// Stepping engine
//
// Keeps one hint per outstanding step request, keyed by the request id the
// debuggee reports in the step event.

use super::{next_step_depth, RequestHint, StepDecision, StepDepth, StepLocation, StepOptions};
use crate::context::DebuggerContext;
use crate::error::{DebuggerError, DebuggerResult};
use crate::suspend::ContextId;
use crate::vm::{RequestKind, StepRequestSpec};
use jdwp_client::{Event, RequestId, SuspendPolicy, ThreadId};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct SteppingEngine {
    hints: HashMap<RequestId, RequestHint>,
    by_thread: HashMap<ThreadId, RequestId>,
}

impl SteppingEngine {
    pub fn hint(&self, request: RequestId) -> Option<&RequestHint> {
        self.hints.get(&request)
    }

    pub fn active_request(&self, thread: ThreadId) -> Option<RequestId> {
        self.by_thread.get(&thread).copied()
    }

    pub fn is_stepping(&self, thread: ThreadId) -> bool {
        self.by_thread.contains_key(&thread)
    }

    fn record(&mut self, request: RequestId, hint: RequestHint) {
        self.by_thread.insert(hint.thread, request);
        self.hints.insert(request, hint);
    }

    /// Each hint is handed out once
    fn take(&mut self, request: RequestId) -> Option<RequestHint> {
        let hint = self.hints.remove(&request)?;
        if self.by_thread.get(&hint.thread) == Some(&request) {
            self.by_thread.remove(&hint.thread);
        }
        Some(hint)
    }

    pub(crate) fn clear(&mut self) {
        self.hints.clear();
        self.by_thread.clear();
    }
}

/// How the step event's suspension is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepMode {
    /// A context pushed for this event set; the step votes on it
    Fresh(ContextId),
    /// The thread was suspended again inside an existing all-thread context
    Reused(ContextId),
}

/// Start a step on a thread suspended by `context`
async fn issue_step(
    cx: &mut DebuggerContext,
    thread: ThreadId,
    options: StepOptions,
) -> DebuggerResult<RequestId> {
    if let Some(previous) = cx.stepping.active_request(thread) {
        debug!("Replacing step request {} on thread {}", previous, thread);
        if let Some(replaced) = cx.stepping.take(previous) {
            finish(cx, &replaced);
        }
        delete_step_request(cx, previous).await?;
    }

    let frame_count = cx.vm.frame_count(thread).await?;
    let origin = cx
        .vm
        .frames(thread, 0, 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DebuggerError::InvalidState(format!("thread {} has no frames", thread)))?;
    let origin_line = cx.vm.line_number(origin).await?;

    let hint = RequestHint {
        thread,
        depth: options.depth,
        size: options.size,
        frame_count,
        origin,
        origin_line,
        method_filter: options.method_filter,
        ignore_filters: options.ignore_filters,
        restore_breakpoints: options.restore_breakpoints,
    };
    let depth = hint.depth;
    let restore_breakpoints = hint.restore_breakpoints;
    let request = create_step_request(cx, hint, depth).await?;
    // Released by `finish` when the step ends or is replaced
    if restore_breakpoints {
        cx.registry.mute_breakpoints();
    }
    Ok(request)
}

async fn create_step_request(
    cx: &mut DebuggerContext,
    hint: RequestHint,
    depth: StepDepth,
) -> DebuggerResult<RequestId> {
    let class_excludes = if hint.ignore_filters {
        Vec::new()
    } else {
        cx.settings.exclusion_patterns()
    };
    let spec = StepRequestSpec {
        thread: hint.thread,
        size: hint.size,
        depth,
        policy: SuspendPolicy::All,
        class_excludes,
    };
    let request = cx.vm.create_step_request(spec).await?;
    debug!("Step request {} ({:?}) on thread {}", request, depth, hint.thread);
    cx.stepping.record(request, hint);
    Ok(request)
}

async fn delete_step_request(cx: &mut DebuggerContext, request: RequestId) -> DebuggerResult<()> {
    match cx.vm.delete_request(RequestKind::Step, request).await {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Step request {} already gone: {}", request, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn finish(cx: &mut DebuggerContext, hint: &RequestHint) {
    if hint.restore_breakpoints {
        cx.registry.unmute_breakpoints();
    }
}

/// User step from a suspend context: issue the step, then let the thread go
pub(crate) async fn step_from_context(
    cx: &mut DebuggerContext,
    context: ContextId,
    thread: ThreadId,
    options: StepOptions,
) -> DebuggerResult<()> {
    issue_step(cx, thread, options).await?;

    let policy = cx.suspend.context(context)?.suspend_policy();
    if cx.settings.resume_only_current_thread && policy == SuspendPolicy::All {
        cx.suspend.resume_thread(context, thread).await
    } else {
        cx.suspend.resume_context(context).await
    }
}

/// Read the facts `next_step_depth` needs; resolution problems become `None`
async fn step_location(cx: &mut DebuggerContext, thread: ThreadId) -> DebuggerResult<Option<StepLocation>> {
    match resolve_step_location(cx, thread).await {
        Ok(location) => Ok(Some(location)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Could not resolve step location on thread {}: {}", thread, e);
            Ok(None)
        }
    }
}

async fn resolve_step_location(cx: &mut DebuggerContext, thread: ThreadId) -> DebuggerResult<StepLocation> {
    let frame_count = cx.vm.frame_count(thread).await?;
    let frames = cx.vm.frames(thread, 0, frame_count.min(2)).await?;
    let top = *frames
        .first()
        .ok_or_else(|| DebuggerError::FilterResolution(format!("thread {} has no frames", thread)))?;

    let method = cx.vm.method(top).await?;
    let supertypes = cx.vm.supertypes(top.class_id).await?;
    let (caller_method, caller_supertypes) = match frames.get(1) {
        Some(caller) => (
            Some(cx.vm.method(*caller).await?),
            cx.vm.supertypes(caller.class_id).await?,
        ),
        None => (None, Vec::new()),
    };
    let line = cx.vm.line_number(top).await?;

    Ok(StepLocation {
        location: top,
        frame_count,
        class_excluded: cx.settings.is_filtered(&method.declaring_type),
        method,
        caller_method,
        caller_supertypes,
        supertypes,
        line,
        source_position: cx.positions.source_position(&top),
    })
}

/// Decide what a step event means and act on it
///
/// Failures other than a lost connection let the thread run.
pub(crate) async fn handle_step_event(cx: &mut DebuggerContext, event: &Event, mode: StepMode) -> DebuggerResult<()> {
    let Some(hint) = cx.stepping.take(event.request_id) else {
        warn!("Step event for unknown request {}", event.request_id);
        return stop(cx, mode).await;
    };

    match follow_step(cx, event.request_id, &hint).await {
        Ok(StepDecision::Stop) => {
            finish(cx, &hint);
            stop(cx, mode).await
        }
        Ok(StepDecision::Continue(_)) => let_thread_go(cx, mode, hint.thread).await,
        Ok(StepDecision::Resume) => {
            finish(cx, &hint);
            let_thread_go(cx, mode, hint.thread).await
        }
        Err(e) if e.is_fatal() => {
            finish(cx, &hint);
            Err(e)
        }
        Err(e) => {
            error!("Step on thread {} failed, resuming: {}", hint.thread, e);
            finish(cx, &hint);
            let_thread_go(cx, mode, hint.thread).await
        }
    }
}

/// Retire the finished request and issue the next one when the decision asks for it
async fn follow_step(cx: &mut DebuggerContext, request: RequestId, hint: &RequestHint) -> DebuggerResult<StepDecision> {
    delete_step_request(cx, request).await?;

    let location = step_location(cx, hint.thread).await?;
    let decision = next_step_depth(hint, location.as_ref(), &cx.settings);
    debug!("Step on thread {}: {:?}", hint.thread, decision);

    match decision {
        StepDecision::Stop => {
            if let Some(location) = &location {
                info!(
                    "Step finished in {}.{} line {:?}",
                    location.method.declaring_type, location.method.name, location.line
                );
            }
        }
        StepDecision::Continue(depth) => {
            create_step_request(cx, hint.clone(), depth).await?;
        }
        StepDecision::Resume => {}
    }
    Ok(decision)
}

async fn let_thread_go(cx: &mut DebuggerContext, mode: StepMode, thread: ThreadId) -> DebuggerResult<()> {
    match mode {
        StepMode::Fresh(context) => cx.suspend.vote_resume(context).await,
        StepMode::Reused(context) => cx.suspend.resume_thread(context, thread).await,
    }
}

async fn stop(cx: &mut DebuggerContext, mode: StepMode) -> DebuggerResult<()> {
    match mode {
        StepMode::Fresh(context) => cx.suspend.vote_suspend(context).await,
        StepMode::Reused(context) => {
            cx.suspend.fire_paused(context);
            Ok(())
        }
    }
}
