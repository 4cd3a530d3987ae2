// Shared fixtures for session tests

#![allow(dead_code)]

use debugger_core::{
    ContextId, DebugProcessListener, DebuggerSettings, Listeners, MockVirtualMachine, PositionManager, Session,
    SourcePosition, SuspendContext,
};
use jdwp_client::{Location, ThreadId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Attached,
    Paused(ContextId),
    Resumed(ContextId),
    ThreadStarted(ThreadId),
    Detached(bool),
}

pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Notice>,
}

impl DebugProcessListener for RecordingListener {
    fn paused(&self, context: &SuspendContext) {
        self.tx.send(Notice::Paused(context.id())).ok();
    }

    fn resumed(&self, context: &SuspendContext) {
        self.tx.send(Notice::Resumed(context.id())).ok();
    }

    fn process_attached(&self) {
        self.tx.send(Notice::Attached).ok();
    }

    fn process_detached(&self, closed_by_user: bool) {
        self.tx.send(Notice::Detached(closed_by_user)).ok();
    }

    fn thread_started(&self, thread: ThreadId) {
        self.tx.send(Notice::ThreadStarted(thread)).ok();
    }
}

/// Every source file maps to the classes of `com.example`
pub struct ExamplePositions;

impl PositionManager for ExamplePositions {
    fn source_position(&self, _location: &Location) -> Option<SourcePosition> {
        None
    }

    fn class_prepare_pattern(&self, position: &SourcePosition) -> Option<String> {
        position
            .file
            .strip_suffix(".java")
            .map(|name| format!("com.example.{}", name))
    }
}

pub struct Fixture {
    pub vm: Arc<MockVirtualMachine>,
    pub session: Arc<Session>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

impl Fixture {
    pub async fn attach(threads: &[ThreadId], settings: DebuggerSettings) -> Fixture {
        init_tracing();
        let vm = Arc::new(MockVirtualMachine::new());
        for thread in threads {
            vm.add_thread(*thread);
        }

        let (tx, notices) = mpsc::unbounded_channel();
        let listeners = Listeners::new(vec![Arc::new(RecordingListener { tx })]);
        let session = Session::attach(vm.clone(), settings, Arc::new(ExamplePositions), listeners)
            .await
            .expect("attach");

        let mut fixture = Fixture {
            vm,
            session: Arc::new(session),
            notices,
        };
        assert_eq!(fixture.next_notice().await, Notice::Attached);
        fixture
    }

    pub async fn next_notice(&mut self) -> Notice {
        within(self.notices.recv()).await.expect("listener dropped")
    }

    /// Skip notices until a context pauses
    pub async fn next_paused(&mut self) -> ContextId {
        loop {
            if let Notice::Paused(context) = self.next_notice().await {
                return context;
            }
        }
    }

    pub async fn next_resumed(&mut self) -> ContextId {
        loop {
            if let Notice::Resumed(context) = self.next_notice().await {
                return context;
            }
        }
    }

    /// Protocol counts agree with the session's model for every thread
    pub async fn assert_counts(&self, threads: &[ThreadId], expected: usize) {
        for thread in threads {
            assert_eq!(self.session.suspend_count(*thread).await.unwrap(), expected, "thread {}", thread);
            assert_eq!(self.vm.protocol_suspend_count(*thread), expected, "thread {}", thread);
        }
        self.session.verify_counts().await.unwrap();
    }
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

/// Poll until `condition` holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
