// Method invocation in a suspended debuggee thread
//
// The invocation runs on a worker so the manager keeps processing events. The
// thread counts as running for the duration and is restored by the switch-back.

use crate::command::{command, Priority, SuspendContextCommand};
use crate::context::DebuggerContext;
use crate::error::{DebuggerError, DebuggerResult};
use crate::suspend::ContextId;
use crate::vm::{InvokeRequest, VirtualMachine};
use futures::future::FutureExt;
use jdwp_client::invoke::InvokeResult;
use jdwp_client::Value;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub(crate) type InvokeReply = oneshot::Sender<DebuggerResult<Value>>;

/// Command that invokes `request` once `context` suspends the target thread
pub(crate) fn invoke_command(context: ContextId, request: InvokeRequest, reply: InvokeReply) -> SuspendContextCommand {
    let thread = request.thread;
    SuspendContextCommand::new(
        context,
        Some(thread),
        command(Priority::Normal, move |cx| start_invocation(cx, context, request, reply).boxed()).named("invoke-method"),
    )
}

async fn start_invocation(
    cx: &mut DebuggerContext,
    context: ContextId,
    request: InvokeRequest,
    reply: InvokeReply,
) -> DebuggerResult<()> {
    let thread = request.thread;
    if let Err(e) = cx.suspend.begin_evaluation(context, thread) {
        reply.send(Err(e)).ok();
        return Ok(());
    }

    let vm = cx.vm.clone();
    let description = format!("invoke method {:x} on thread {}", request.method, thread);
    let op = async move {
        AssertUnwindSafe(invoke_with_class_load(vm.as_ref(), request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(DebuggerError::Evaluation("invocation panicked".to_string())))
    };

    cx.start_long_process_and_fork(description, op, move |cx, result| {
        async move {
            let ready = cx.suspend.end_evaluation(context, thread)?;
            cx.reschedule(ready);

            let outcome = finish_invocation(cx, context, result).await;
            let fatal = matches!(outcome, Err(DebuggerError::ProtocolDisconnected));
            reply.send(outcome).ok();
            if fatal {
                Err(DebuggerError::ProtocolDisconnected)
            } else {
                Ok(())
            }
        }
        .boxed()
    })
}

/// Invoke, loading the declaring class first if the debuggee has not yet
async fn invoke_with_class_load(vm: &dyn VirtualMachine, request: InvokeRequest) -> DebuggerResult<InvokeResult> {
    match vm.invoke_method(request.clone()).await {
        Err(DebuggerError::ClassNotLoaded(class_name)) => {
            info!("Loading {} before invocation", class_name);
            vm.load_class(request.thread, class_name).await?;
            vm.invoke_method(request).await
        }
        other => other,
    }
}

/// Pin returned objects to the context and turn a thrown exception into an error
async fn finish_invocation(
    cx: &mut DebuggerContext,
    context: ContextId,
    result: DebuggerResult<InvokeResult>,
) -> DebuggerResult<Value> {
    let result = result?;

    if let Some(exception) = result.exception {
        keep(cx, context, exception).await?;
        return Err(DebuggerError::Evaluation(format!(
            "method threw exception object {:x}",
            exception
        )));
    }
    if let Some(object) = result.value.object_id() {
        keep(cx, context, object).await?;
    }
    debug!("Invocation returned {}", result.value.format());
    Ok(result.value)
}

async fn keep(cx: &mut DebuggerContext, context: ContextId, object: u64) -> DebuggerResult<()> {
    match cx.suspend.keep_reference(context, object).await {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Could not keep object {:x} in context {}: {}", object, context, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
