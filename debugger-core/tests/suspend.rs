// Suspend accounting through the session API

mod common;

use common::{eventually, within, Fixture};
use debugger_core::mock;
use debugger_core::{DebuggerError, DebuggerSettings, InvokeRequest, InvokeTarget};
use jdwp_client::{Location, SuspendPolicy, ThreadId, Value};

const THREADS: [ThreadId; 3] = [1, 2, 3];

async fn counts_match(fx: &Fixture) {
    for thread in THREADS {
        assert_eq!(
            fx.session.suspend_count(thread).await.unwrap(),
            fx.vm.protocol_suspend_count(thread),
            "thread {}",
            thread
        );
    }
    fx.session.verify_counts().await.unwrap();
}

fn invoke_on(thread: ThreadId) -> InvokeRequest {
    InvokeRequest {
        thread,
        target: InvokeTarget::Static { class: 7 },
        method: 2,
        args: Vec::new(),
        single_threaded: true,
    }
}

#[tokio::test]
async fn test_nested_suspensions_are_released_exactly_once() {
    let mut fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;

    let frozen = fx.session.freeze(2).await.unwrap();
    counts_match(&fx).await;
    assert_eq!(fx.vm.protocol_suspend_count(2), 1);

    let paused = fx.session.pause().await.unwrap();
    counts_match(&fx).await;
    assert_eq!(fx.vm.protocol_suspend_count(2), 2);

    fx.vm.emit(mock::event_set(
        SuspendPolicy::EventThread,
        vec![mock::breakpoint(404, 3, Location::new(7, 1, 0))],
    ));
    // The unowned breakpoint resumes its own context only
    fx.next_resumed().await;
    counts_match(&fx).await;
    assert_eq!(fx.vm.protocol_suspend_count(3), 1);

    fx.session.resume(paused).await.unwrap();
    counts_match(&fx).await;
    assert_eq!(fx.vm.protocol_suspend_count(1), 0);
    assert_eq!(fx.vm.protocol_suspend_count(2), 1);
    assert!(fx.session.is_suspended(2).await.unwrap());

    fx.session.unfreeze(2).await.unwrap();
    counts_match(&fx).await;
    assert!(!fx.session.is_suspended(2).await.unwrap());
    assert!(matches!(
        fx.session.resume(frozen).await,
        Err(DebuggerError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_second_resume_is_rejected() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.session.resume(context).await.unwrap();

    let resumes = fx.vm.calls().iter().filter(|c| *c == "resume").count();
    assert!(matches!(
        fx.session.resume(context).await,
        Err(DebuggerError::InvalidState(_))
    ));
    assert_eq!(fx.vm.calls().iter().filter(|c| *c == "resume").count(), resumes);
    counts_match(&fx).await;
}

#[tokio::test]
async fn test_second_pause_is_rejected() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    assert!(matches!(fx.session.pause().await, Err(DebuggerError::InvalidState(_))));
    counts_match(&fx).await;
    fx.session.resume(context).await.unwrap();
}

#[tokio::test]
async fn test_resume_thread_inside_context() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();

    fx.session.resume_thread(context, 3).await.unwrap();
    assert!(!fx.session.is_suspended(3).await.unwrap());
    counts_match(&fx).await;

    fx.session.resume(context).await.unwrap();
    counts_match(&fx).await;
    for thread in THREADS {
        assert_eq!(fx.vm.protocol_suspend_count(thread), 0);
    }
}

#[tokio::test]
async fn test_invocations_on_one_thread_run_in_turn() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.vm.hold_invocations();

    let first = {
        let session = fx.session.clone();
        tokio::spawn(async move { session.invoke_method(context, invoke_on(1)).await })
    };
    let manager = fx.session.manager().clone();
    eventually(|| manager.outstanding_forks() == 1).await;

    // Waits on the context until the first invocation gives the thread back
    let second = {
        let session = fx.session.clone();
        tokio::spawn(async move { session.invoke_method(context, invoke_on(1)).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(fx.session.active_contexts().await.unwrap()[0].evaluating, Some(1));

    fx.vm.release_invocations();
    assert_eq!(within(first).await.unwrap().unwrap(), Value::void());
    assert_eq!(within(second).await.unwrap().unwrap(), Value::void());
    assert_eq!(fx.vm.invocations().len(), 2);
    counts_match(&fx).await;
    fx.session.resume(context).await.unwrap();
}

#[tokio::test]
async fn test_waiting_command_is_cancelled_when_its_context_resumes() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.vm.hold_invocations();

    let first = {
        let session = fx.session.clone();
        tokio::spawn(async move { session.invoke_method(context, invoke_on(1)).await })
    };
    let manager = fx.session.manager().clone();
    eventually(|| manager.outstanding_forks() == 1).await;

    let second = {
        let session = fx.session.clone();
        tokio::spawn(async move { session.invoke_method(context, invoke_on(1)).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    fx.session.resume(context).await.unwrap();

    assert!(matches!(
        within(second).await.unwrap(),
        Err(DebuggerError::Cancelled)
    ));
    fx.vm.release_invocations();
    // The running invocation still completes against the resumed context
    assert_eq!(within(first).await.unwrap().unwrap(), Value::void());
    counts_match(&fx).await;
    for thread in THREADS {
        assert_eq!(fx.vm.protocol_suspend_count(thread), 0);
    }
}

#[tokio::test]
async fn test_invocation_requires_a_suspending_context() {
    let fx = Fixture::attach(&THREADS, DebuggerSettings::default()).await;
    let context = fx.session.pause().await.unwrap();
    fx.session.resume(context).await.unwrap();

    let result = fx.session.invoke_method(context, invoke_on(1)).await;
    assert!(matches!(result, Err(DebuggerError::Cancelled)));
}
