// End-to-end session scenarios against the in-memory VM

mod common;

use common::{eventually, within, Fixture, Notice};
use debugger_core::mock;
use debugger_core::{
    DebuggerError, DebuggerSettings, InvokeRequest, InvokeTarget, LineBreakpoint, MethodDescriptor, MethodFilter,
    PreparedClass, Priority, RequestKind, SourcePosition, StepDepth, StepOptions,
};
use futures::future::FutureExt;
use jdwp_client::invoke::InvokeResult;
use jdwp_client::types::tags;
use jdwp_client::{Location, SuspendPolicy, Value};
use std::sync::Arc;

const THREADS: [u64; 3] = [1, 2, 3];
const APP: u64 = 7;
const RUN: u64 = 1;

fn line_12() -> Location {
    Location::new(APP, RUN, 4)
}

fn line_13() -> Location {
    Location::new(APP, RUN, 10)
}

/// Attach with `com.example.App` loaded and a breakpoint on line 12
async fn with_breakpoint(settings: DebuggerSettings) -> (Fixture, i32) {
    let fx = Fixture::attach(&THREADS, settings).await;
    fx.vm.add_class(PreparedClass {
        id: APP,
        name: "com.example.App".to_string(),
    });
    fx.vm.set_line_locations(APP, 12, vec![line_12()]);
    fx.vm.set_method(line_12(), MethodDescriptor::new("com.example.App", "run", "()V"));
    fx.vm.set_line(line_12(), 12);
    fx.vm.set_line(line_13(), 13);

    fx.session
        .add_line_breakpoint(LineBreakpoint::new(SourcePosition::new("App.java", 12)))
        .await
        .unwrap();
    let breakpoints = fx.vm.requests_of_kind(RequestKind::Breakpoint);
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].location, Some(line_12()));
    (fx, breakpoints[0].id)
}

async fn hit_breakpoint(fx: &mut Fixture, request: i32) -> debugger_core::ContextId {
    fx.vm.emit(mock::event_set(
        SuspendPolicy::All,
        vec![mock::breakpoint(request, 1, line_12())],
    ));
    fx.next_paused().await
}

async fn breakpoints_muted(fx: &Fixture) -> bool {
    fx.session
        .call(Priority::Normal, |cx| async move { Ok(cx.registry.breakpoints_muted()) }.boxed())
        .await
        .unwrap()
}

/// The single outstanding step request
fn only_step(fx: &Fixture) -> mock::MockRequest {
    let steps = fx.vm.requests_of_kind(RequestKind::Step);
    assert_eq!(steps.len(), 1, "step requests: {:?}", steps);
    steps[0].clone()
}

#[tokio::test]
async fn test_breakpoint_suspends_every_thread_once() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;

    fx.assert_counts(&THREADS, 1).await;
    let contexts = fx.session.active_contexts().await.unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].id, context);
    assert_eq!(contexts[0].thread, Some(1));
    assert_eq!(contexts[0].suspended_threads, THREADS.to_vec());

    fx.session.resume(context).await.unwrap();
    assert_eq!(fx.next_resumed().await, context);
    fx.assert_counts(&THREADS, 0).await;
    assert!(fx.session.active_contexts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_step_over_reuses_context_when_resuming_one_thread() {
    let settings = DebuggerSettings {
        resume_only_current_thread: true,
        ..DebuggerSettings::default()
    };
    let (mut fx, request) = with_breakpoint(settings).await;
    let context = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);

    fx.session.step_over(context, 1).await.unwrap();
    assert_eq!(fx.session.suspend_count(1).await.unwrap(), 0);
    assert_eq!(fx.vm.protocol_suspend_count(1), 0);
    assert_eq!(fx.session.suspend_count(2).await.unwrap(), 1);
    let steps = fx.vm.requests_of_kind(RequestKind::Step);
    assert_eq!(steps.len(), 1);
    let step = steps[0].step.clone().unwrap();
    assert_eq!(step.thread, 1);
    assert_eq!(step.policy, SuspendPolicy::All);
    assert!(step.class_excludes.contains(&"java.*".to_string()));

    // The step lands on the next line with every thread suspended again
    fx.vm.set_frames(1, vec![line_13()]);
    fx.vm.emit(mock::event_set(
        SuspendPolicy::All,
        vec![mock::step(steps[0].id, 1, line_13())],
    ));
    assert_eq!(fx.next_paused().await, context);

    fx.assert_counts(&THREADS, 1).await;
    assert_eq!(fx.session.active_contexts().await.unwrap().len(), 1);
    assert!(fx.vm.requests_of_kind(RequestKind::Step).is_empty());

    fx.session.resume(context).await.unwrap();
    fx.assert_counts(&THREADS, 0).await;
}

#[tokio::test]
async fn test_step_over_continues_while_on_the_same_line() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);

    fx.session.step_over(context, 1).await.unwrap();
    assert_eq!(fx.next_resumed().await, context);
    fx.assert_counts(&THREADS, 0).await;

    // Still on line 12: the engine steps again instead of stopping
    let first = fx.vm.requests_of_kind(RequestKind::Step)[0].id;
    let same_line = Location::new(APP, RUN, 6);
    fx.vm.set_line(same_line, 12);
    fx.vm.set_frames(1, vec![same_line]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(first, 1, same_line)]));
    fx.next_resumed().await;
    eventually(|| {
        fx.vm
            .requests_of_kind(RequestKind::Step)
            .iter()
            .any(|r| r.id != first)
    })
    .await;
    fx.assert_counts(&THREADS, 0).await;

    let second = fx.vm.requests_of_kind(RequestKind::Step)[0].id;
    fx.vm.set_frames(1, vec![line_13()]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(second, 1, line_13())]));
    let stopped = fx.next_paused().await;
    fx.assert_counts(&THREADS, 1).await;
    fx.session.resume(stopped).await.unwrap();
}

#[tokio::test]
async fn test_invocation_restores_counts_without_blocking_the_manager() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.assert_counts(&THREADS, 1).await;

    fx.vm.hold_invocations();
    fx.vm.push_invoke_result(Ok(InvokeResult {
        value: Value::object(tags::OBJECT, 0x55),
        exception: None,
    }));
    let session = fx.session.clone();
    let invocation = tokio::spawn(async move {
        session
            .invoke_method(
                context,
                InvokeRequest {
                    thread: 1,
                    target: InvokeTarget::Static { class: APP },
                    method: 3,
                    args: vec![Value::int(42)],
                    single_threaded: true,
                },
            )
            .await
    });

    // While the worker runs, the manager keeps answering
    let manager = fx.session.manager().clone();
    eventually(|| manager.outstanding_forks() == 1).await;
    assert_eq!(fx.session.suspend_count(1).await.unwrap(), 0);
    assert_eq!(fx.session.suspend_count(2).await.unwrap(), 1);
    let contexts = fx.session.active_contexts().await.unwrap();
    assert_eq!(contexts[0].evaluating, Some(1));
    fx.session.verify_counts().await.unwrap();

    fx.vm.release_invocations();
    let value = within(invocation).await.unwrap().unwrap();
    assert_eq!(value.object_id(), Some(0x55));
    assert_eq!(fx.vm.invocations().len(), 1);
    assert_eq!(manager.outstanding_forks(), 0);
    fx.assert_counts(&THREADS, 1).await;
    assert_eq!(fx.vm.pinned_objects(), vec![0x55]);

    fx.session.resume(context).await.unwrap();
    fx.assert_counts(&THREADS, 0).await;
    assert!(fx.vm.pinned_objects().is_empty());
}

#[tokio::test]
async fn test_invocation_exception_is_an_error() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.vm.push_invoke_result(Ok(InvokeResult {
        value: Value::void(),
        exception: Some(0x99),
    }));

    let result = fx
        .session
        .invoke_method(
            context,
            InvokeRequest {
                thread: 2,
                target: InvokeTarget::Instance { object: 0x10, class: APP },
                method: 3,
                args: Vec::new(),
                single_threaded: false,
            },
        )
        .await;
    assert!(matches!(result, Err(DebuggerError::Evaluation(_))));
    // The exception object stays reachable until the context resumes
    assert_eq!(fx.vm.pinned_objects(), vec![0x99]);
    fx.assert_counts(&THREADS, 1).await;
    fx.session.resume(context).await.unwrap();
}

#[tokio::test]
async fn test_invocation_loads_missing_class_and_retries() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.vm.push_invoke_result(Err(DebuggerError::ClassNotLoaded(
        "com.example.Helper".to_string(),
    )));

    let value = fx
        .session
        .invoke_method(
            context,
            InvokeRequest {
                thread: 1,
                target: InvokeTarget::Static { class: 8 },
                method: 1,
                args: Vec::new(),
                single_threaded: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(value, Value::void());
    assert_eq!(
        fx.vm.loaded_classes_by_request(),
        vec![(1, "com.example.Helper".to_string())]
    );
    fx.session.resume(context).await.unwrap();
}

#[tokio::test]
async fn test_user_detach_disposes_the_vm() {
    let (mut fx, _) = with_breakpoint(DebuggerSettings::default()).await;
    let session = Arc::clone(&fx.session);
    within(session.detach()).await.unwrap();

    assert!(fx.vm.is_disposed());
    loop {
        if let Notice::Detached(closed_by_user) = fx.next_notice().await {
            assert!(closed_by_user);
            break;
        }
    }
    assert!(matches!(
        fx.session.pause().await,
        Err(DebuggerError::Cancelled)
    ));
}

#[tokio::test]
async fn test_failed_step_in_event_set_lets_the_debuggee_run() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);
    fx.session.step_over(context, 1).await.unwrap();
    fx.next_resumed().await;
    let first = only_step(&fx).id;

    // Same line again, so the engine has to step once more and that fails
    let same_line = Location::new(APP, RUN, 6);
    fx.vm.set_line(same_line, 12);
    fx.vm.set_frames(1, vec![same_line]);
    fx.vm.fail_next(
        "create_step_request",
        DebuggerError::Vm {
            code: 10,
            message: "INVALID_THREAD".to_string(),
        },
    );
    fx.vm.emit(mock::event_set(
        SuspendPolicy::All,
        vec![
            mock::step(first, 1, same_line),
            mock::breakpoint(404, 2, Location::new(APP, RUN, 0)),
        ],
    ));

    fx.next_resumed().await;
    fx.assert_counts(&THREADS, 0).await;
    assert!(fx.session.active_contexts().await.unwrap().is_empty());
    assert!(fx.vm.requests_of_kind(RequestKind::Step).is_empty());
}

#[tokio::test]
async fn test_replacing_a_muting_step_unmutes_breakpoints() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let first = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);

    fx.session
        .step(first, 1, StepOptions::over().restoring_breakpoints())
        .await
        .unwrap();
    fx.next_resumed().await;
    assert!(breakpoints_muted(&fx).await);

    // Suspended again before the muting step completes, then stepped from there
    let paused = fx.session.pause().await.unwrap();
    fx.session.step_over(paused, 1).await.unwrap();
    assert_eq!(fx.next_resumed().await, paused);
    assert!(!breakpoints_muted(&fx).await);

    let step = only_step(&fx);
    fx.vm.set_frames(1, vec![line_13()]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(step.id, 1, line_13())]));
    let stopped = fx.next_paused().await;
    fx.session.resume(stopped).await.unwrap();
    fx.assert_counts(&THREADS, 0).await;

    // Breakpoints stop the debuggee again
    let hit = hit_breakpoint(&mut fx, request).await;
    fx.assert_counts(&THREADS, 1).await;
    fx.session.resume(hit).await.unwrap();
}

#[tokio::test]
async fn test_failed_step_request_leaves_breakpoints_active() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);
    fx.vm.fail_next(
        "create_step_request",
        DebuggerError::Vm {
            code: 10,
            message: "INVALID_THREAD".to_string(),
        },
    );

    let result = fx
        .session
        .step(context, 1, StepOptions::over().restoring_breakpoints())
        .await;
    assert!(matches!(result, Err(DebuggerError::Vm { code: 10, .. })));
    assert!(!breakpoints_muted(&fx).await);
    // The context was never let go
    fx.assert_counts(&THREADS, 1).await;
    fx.session.resume(context).await.unwrap();
}

#[tokio::test]
async fn test_step_into_leaves_filtered_classes() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);
    fx.session.step_into(context, 1).await.unwrap();
    fx.next_resumed().await;
    let into = only_step(&fx);
    assert_eq!(into.step.as_ref().unwrap().depth, StepDepth::Into);

    // Landed in a JDK class despite the exclusion patterns
    let list_add = Location::new(40, 2, 0);
    fx.vm.set_method(list_add, MethodDescriptor::new("java.util.ArrayList", "add", "(Ljava/lang/Object;)Z"));
    fx.vm.set_frames(1, vec![list_add, line_12()]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(into.id, 1, list_add)]));
    fx.next_resumed().await;
    let out = only_step(&fx);
    assert_ne!(out.id, into.id);
    assert_eq!(out.step.as_ref().unwrap().depth, StepDepth::Out);

    fx.vm.set_frames(1, vec![line_13()]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(out.id, 1, line_13())]));
    let stopped = fx.next_paused().await;
    fx.assert_counts(&THREADS, 1).await;
    assert!(fx.vm.requests_of_kind(RequestKind::Step).is_empty());
    fx.session.resume(stopped).await.unwrap();
}

#[tokio::test]
async fn test_smart_step_into_stops_at_the_chosen_call() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;
    fx.vm.set_frames(1, vec![line_12()]);
    fx.session
        .smart_step_into(context, 1, MethodFilter::method("com.example.Service", "handle", None))
        .await
        .unwrap();
    fx.next_resumed().await;

    // An argument is computed first; step back out of it
    let format = Location::new(9, 1, 0);
    fx.vm.set_method(format, MethodDescriptor::new("com.example.Util", "format", "()Ljava/lang/String;"));
    fx.vm.set_frames(1, vec![format, line_12()]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(only_step(&fx).id, 1, format)]));
    fx.next_resumed().await;
    assert_eq!(only_step(&fx).step.unwrap().depth, StepDepth::Out);

    // Back on the calling line
    let call_site = Location::new(APP, RUN, 6);
    fx.vm.set_line(call_site, 12);
    fx.vm.set_frames(1, vec![call_site]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(only_step(&fx).id, 1, call_site)]));
    fx.next_resumed().await;
    assert_eq!(only_step(&fx).step.unwrap().depth, StepDepth::Into);

    // The implementation of the target, found through its supertypes
    let handle = Location::new(11, 4, 0);
    fx.vm.set_method(handle, MethodDescriptor::new("com.example.ServiceImpl", "handle", "()V"));
    fx.vm.set_supertypes(11, vec!["com.example.Service".to_string()]);
    fx.vm.set_frames(1, vec![handle, call_site]);
    fx.vm.emit(mock::event_set(SuspendPolicy::All, vec![mock::step(only_step(&fx).id, 1, handle)]));
    let stopped = fx.next_paused().await;

    assert_eq!(fx.session.active_contexts().await.unwrap()[0].thread, Some(1));
    assert!(fx.vm.requests_of_kind(RequestKind::Step).is_empty());
    fx.assert_counts(&THREADS, 1).await;
    fx.session.resume(stopped).await.unwrap();
}

#[tokio::test]
async fn test_frozen_thread_outlives_a_breakpoint_context() {
    let (mut fx, request) = with_breakpoint(DebuggerSettings::default()).await;
    let context = hit_breakpoint(&mut fx, request).await;

    fx.session.freeze(2).await.unwrap();
    assert_eq!(fx.vm.protocol_suspend_count(2), 2);
    fx.session.verify_counts().await.unwrap();

    fx.session.resume(context).await.unwrap();
    assert_eq!(fx.next_resumed().await, context);
    fx.assert_counts(&[1, 3], 0).await;
    fx.assert_counts(&[2], 1).await;
    assert!(fx.session.is_suspended(2).await.unwrap());

    // The next hit stacks on top of the freeze
    let again = hit_breakpoint(&mut fx, request).await;
    assert_eq!(fx.vm.protocol_suspend_count(2), 2);
    fx.session.resume(again).await.unwrap();

    fx.session.unfreeze(2).await.unwrap();
    fx.assert_counts(&THREADS, 0).await;
}

#[tokio::test]
async fn test_detach_with_invocation_in_flight_retires_the_worker() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.vm.hold_invocations();

    let session = fx.session.clone();
    let invocation = tokio::spawn(async move {
        session
            .invoke_method(
                context,
                InvokeRequest {
                    thread: 1,
                    target: InvokeTarget::Static { class: APP },
                    method: 3,
                    args: Vec::new(),
                    single_threaded: true,
                },
            )
            .await
    });
    let manager = fx.session.manager().clone();
    eventually(|| manager.outstanding_forks() == 1).await;

    within(fx.session.detach()).await.unwrap();
    assert!(manager.is_closed());
    assert!(fx.vm.is_disposed());
    assert_eq!(manager.outstanding_forks(), 1);

    // The switch-back still runs on the closed queue
    fx.vm.release_invocations();
    assert_eq!(within(invocation).await.unwrap().unwrap(), Value::void());
    eventually(|| manager.outstanding_forks() == 0).await;
    assert!(matches!(
        fx.session.pause().await,
        Err(DebuggerError::Cancelled)
    ));
}
