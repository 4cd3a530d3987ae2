// Event pump
//
// Reads event sets from the debuggee on its own task and hands each one to the
// manager thread as a high priority command. All event handling happens there.

use crate::command::{command, Priority, SuspendContextCommand};
use crate::context::DebuggerContext;
use crate::error::{DebuggerError, DebuggerResult};
use crate::manager::ManagerThread;
use crate::stepping::{handle_step_event, StepMode};
use crate::suspend::ContextId;
use crate::vm::{PreparedClass, VirtualMachine};
use futures::future::FutureExt;
use jdwp_client::types::signature_to_class_name;
use jdwp_client::{Event, EventKind, EventSet, SuspendPolicy, ThreadId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How an event is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventClass {
    /// Bookkeeping only; never keeps the debuggee suspended
    Inline,
    /// The debuggee is gone
    Terminal,
    ClassPrepare,
    Step,
    /// Breakpoint-like events owned by a requestor
    Locatable,
}

fn classify(event: &Event) -> EventClass {
    match &event.details {
        EventKind::VMStart { .. }
        | EventKind::ThreadStart { .. }
        | EventKind::ThreadDeath { .. }
        | EventKind::ClassUnload { .. }
        | EventKind::Unknown { .. } => EventClass::Inline,
        EventKind::VMDeath | EventKind::VMDisconnected => EventClass::Terminal,
        EventKind::ClassPrepare { .. } => EventClass::ClassPrepare,
        EventKind::Step { .. } => EventClass::Step,
        EventKind::Breakpoint { .. }
        | EventKind::Exception { .. }
        | EventKind::MethodEntry { .. }
        | EventKind::MethodExit { .. } => EventClass::Locatable,
    }
}

/// Start reading events; the pump stops when `token` is cancelled or the debuggee disconnects
pub(crate) fn spawn_event_pump(
    vm: Arc<dyn VirtualMachine>,
    queue: ManagerThread,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Event pump started");
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = vm.next_event_set() => next,
            };

            match next {
                Ok(set) => {
                    debug!(
                        "Event set with {} events, suspend policy {:?}",
                        set.events.len(),
                        set.suspend_policy
                    );
                    queue.schedule(
                        command(Priority::High, move |cx| process_event_set(cx, set).boxed())
                            .named("process-event-set"),
                    );
                }
                Err(DebuggerError::ProtocolDisconnected) => {
                    warn!("Debuggee disconnected, stopping event pump");
                    queue.schedule(
                        command(Priority::High, |cx| {
                            async move {
                                cx.teardown(false).await;
                                Ok(())
                            }
                            .boxed()
                        })
                        .named("disconnect"),
                    );
                    break;
                }
                Err(DebuggerError::Cancelled) => {
                    debug!("Event read cancelled");
                }
                Err(e) => {
                    warn!("Failed to read event set: {}", e);
                }
            }
        }
        info!("Event pump stopped");
    })
}

/// Handle one event set on the manager thread
pub(crate) async fn process_event_set(cx: &mut DebuggerContext, set: EventSet) -> DebuggerResult<()> {
    let classes: Vec<EventClass> = set.events.iter().map(classify).collect();

    if classes.contains(&EventClass::Terminal) {
        info!("Debuggee terminated");
        cx.teardown(false).await;
        return Ok(());
    }

    for (event, class) in set.events.iter().zip(&classes) {
        if *class == EventClass::Inline {
            handle_inline(cx, event);
        }
    }

    if classes.iter().all(|c| *c == EventClass::Inline) {
        return cx.suspend.resume_event_set(&set).await;
    }

    if let Some((existing, thread)) = reusable_context(cx, &set, &classes) {
        debug!("Reusing context {} for step on thread {}", existing, thread);
        let ready = cx.suspend.suspend_thread_again(existing, thread).await?;
        cx.suspend.resume_event_set(&set).await?;
        cx.reschedule(ready);
        return handle_step_event(cx, &set.events[0], StepMode::Reused(existing)).await;
    }

    let events = set.events.clone();
    let context = cx.suspend.push_event_set(set)?;

    let mut locatable = Vec::new();
    for (event, class) in events.into_iter().zip(classes) {
        let handled = match class {
            EventClass::Inline => cx.suspend.vote_resume(context).await,
            EventClass::ClassPrepare => match class_prepared(cx, &event).await {
                Ok(()) => cx.suspend.vote_resume(context).await,
                Err(e) => Err(e),
            },
            EventClass::Step => handle_step_event(cx, &event, StepMode::Fresh(context)).await,
            EventClass::Locatable => {
                locatable.push(event);
                Ok(())
            }
            EventClass::Terminal => Ok(()),
        };
        if let Err(e) = handled {
            fail_open(cx, context, e).await?;
        }
    }

    // Ahead of everything else queued, in event order
    for event in locatable.into_iter().rev() {
        cx.queue.invoke(SuspendContextCommand::new(
            context,
            None,
            command(Priority::High, move |cx| process_locatable(cx, context, event).boxed())
                .named("locatable-event"),
        ));
    }
    Ok(())
}

/// A failed event counts as a resume vote so the rest of the set still decides
async fn fail_open(cx: &mut DebuggerContext, context: ContextId, err: DebuggerError) -> DebuggerResult<()> {
    if err.is_fatal() {
        return Err(err);
    }
    error!("Event in context {} failed, voting resume: {}", context, err);
    if let Err(e) = cx.suspend.vote_resume(context).await {
        debug!("Context {} already settled: {}", context, e);
    }
    Ok(())
}

fn handle_inline(cx: &mut DebuggerContext, event: &Event) {
    match &event.details {
        EventKind::ThreadStart { thread } => {
            debug!("Thread {} started", thread);
            cx.suspend.register_thread(*thread);
            cx.listeners.fire(|l| l.thread_started(*thread));
        }
        EventKind::ThreadDeath { thread } => {
            debug!("Thread {} died", thread);
            cx.suspend.thread_died(*thread);
            cx.listeners.fire(|l| l.thread_stopped(*thread));
        }
        EventKind::VMStart { thread } => {
            info!("VM started, main thread {}", thread);
            cx.suspend.register_thread(*thread);
        }
        EventKind::ClassUnload { signature } => {
            debug!("Class {} unloaded", signature_to_class_name(signature));
        }
        EventKind::Unknown { kind } => {
            debug!("Ignoring event kind {}", kind);
        }
        _ => {}
    }
}

/// Context that let the stepping thread go and should take the step event back
fn reusable_context(
    cx: &DebuggerContext,
    set: &EventSet,
    classes: &[EventClass],
) -> Option<(ContextId, ThreadId)> {
    if !cx.settings.resume_only_current_thread
        || set.suspend_policy != SuspendPolicy::All
        || *classes != [EventClass::Step]
    {
        return None;
    }
    let thread = set.events.first()?.thread()?;
    cx.suspend
        .context_with_resumed_thread(thread)
        .map(|context| (context, thread))
}

async fn class_prepared(cx: &mut DebuggerContext, event: &Event) -> DebuggerResult<()> {
    let EventKind::ClassPrepare { ref_type, signature, .. } = &event.details else {
        return Ok(());
    };
    let class = PreparedClass {
        id: *ref_type,
        name: signature_to_class_name(signature),
    };
    debug!("Class {} prepared", class.name);

    match cx.registry.process_class_prepared(event.request_id, &class).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Could not resolve requests in {}: {}", class.name, e);
            Ok(())
        }
    }
}

/// Ask the owning requestor whether the event stops the debuggee
async fn process_locatable(cx: &mut DebuggerContext, context: ContextId, event: Event) -> DebuggerResult<()> {
    let Some((id, requestor)) = cx.registry.find_requestor(event.request_id) else {
        debug!("No requestor for request {}", event.request_id);
        return cx.suspend.vote_resume(context).await;
    };

    let outcome = {
        let suspend_context = cx.suspend.context(context)?;
        requestor.process_locatable_event(&event, suspend_context)
    };
    match outcome {
        Ok(true) if requestor.suspend_policy() != SuspendPolicy::None => cx.suspend.vote_suspend(context).await,
        Ok(_) => cx.suspend.vote_resume(context).await,
        Err(e) => {
            warn!("{} failed to process event: {:#}", id, e);
            cx.suspend.vote_resume(context).await
        }
    }
}
