// In-memory virtual machine
//
// Deterministic stand-in for a debuggee. It keeps JDWP suspend semantics (suspends
// nest per thread, VM resume undoes one level on every thread) so tests can check
// that every protocol suspension is released exactly once.

use crate::config::ClassFilter;
use crate::error::{DebuggerError, DebuggerResult};
use crate::vm::{
    InvokeRequest, MethodDescriptor, PreparedClass, RequestKind, StepRequestSpec, VirtualMachine, VmFuture,
};
use futures::future::FutureExt;
use jdwp_client::commands::event_kinds;
use jdwp_client::invoke::InvokeResult;
use jdwp_client::types::{class_name_to_signature, class_status, type_tags, MethodId, ObjectId, ReferenceTypeId};
use jdwp_client::{Event, EventKind, EventSet, Location, RequestId, SuspendPolicy, ThreadId, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// An event request as the mock recorded it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub policy: SuspendPolicy,
    pub location: Option<Location>,
    pub step: Option<StepRequestSpec>,
    pub pattern: Option<String>,
}

#[derive(Default)]
struct State {
    /// Protocol-level suspend count per live thread
    threads: BTreeMap<ThreadId, usize>,
    frames: HashMap<ThreadId, Vec<Location>>,
    methods: HashMap<(ReferenceTypeId, MethodId), MethodDescriptor>,
    lines: HashMap<Location, u32>,
    supertypes: HashMap<ReferenceTypeId, Vec<String>>,
    classes: Vec<PreparedClass>,
    line_locations: HashMap<(ReferenceTypeId, u32), Vec<Location>>,
    requests: BTreeMap<RequestId, MockRequest>,
    next_request: RequestId,
    invoke_results: VecDeque<DebuggerResult<InvokeResult>>,
    invocations: Vec<InvokeRequest>,
    loaded: Vec<(ThreadId, String)>,
    pinned: HashSet<ObjectId>,
    calls: Vec<String>,
    /// Injected failures, matched by call name prefix and consumed once
    failures: Vec<(String, DebuggerError)>,
    gate: Option<Arc<Semaphore>>,
    disconnected: bool,
    disposed: bool,
}

pub struct MockVirtualMachine {
    state: Mutex<State>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<EventSet>>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EventSet>>,
}

impl Default for MockVirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVirtualMachine {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(State {
                next_request: 1,
                ..State::default()
            }),
            events_tx: Mutex::new(Some(tx)),
            events_rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn add_thread(&self, thread: ThreadId) {
        self.state.lock().threads.entry(thread).or_insert(0);
    }

    pub fn remove_thread(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        state.threads.remove(&thread);
        state.frames.remove(&thread);
    }

    /// Stack of a thread, top frame first
    pub fn set_frames(&self, thread: ThreadId, frames: Vec<Location>) {
        self.state.lock().frames.insert(thread, frames);
    }

    pub fn set_method(&self, location: Location, method: MethodDescriptor) {
        self.state
            .lock()
            .methods
            .insert((location.class_id, location.method_id), method);
    }

    pub fn set_line(&self, location: Location, line: u32) {
        self.state.lock().lines.insert(location, line);
    }

    pub fn set_supertypes(&self, class: ReferenceTypeId, supertypes: Vec<String>) {
        self.state.lock().supertypes.insert(class, supertypes);
    }

    pub fn add_class(&self, class: PreparedClass) {
        self.state.lock().classes.push(class);
    }

    pub fn set_line_locations(&self, class: ReferenceTypeId, line: u32, locations: Vec<Location>) {
        self.state.lock().line_locations.insert((class, line), locations);
    }

    /// Queue the outcome of the next invocation; unqueued invocations return void
    pub fn push_invoke_result(&self, result: DebuggerResult<InvokeResult>) {
        self.state.lock().invoke_results.push_back(result);
    }

    /// Fail the next call whose name starts with `call`
    pub fn fail_next(&self, call: impl Into<String>, error: DebuggerError) {
        self.state.lock().failures.push((call.into(), error));
    }

    /// Make invocations wait until `release_invocations`
    pub fn hold_invocations(&self) {
        self.state.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_invocations(&self) {
        if let Some(gate) = self.state.lock().gate.take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Deliver an event set, suspending threads per its policy first
    pub fn emit(&self, set: EventSet) {
        {
            let mut state = self.state.lock();
            match set.suspend_policy {
                SuspendPolicy::All => state.threads.values_mut().for_each(|count| *count += 1),
                SuspendPolicy::EventThread => {
                    if let Some(count) = set.thread().and_then(|t| state.threads.get_mut(&t)) {
                        *count += 1;
                    }
                }
                SuspendPolicy::None => {}
            }
        }
        if let Some(tx) = self.events_tx.lock().as_ref() {
            tx.send(set).ok();
        }
    }

    /// Drop the connection; every later call fails with `ProtocolDisconnected`
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
        self.events_tx.lock().take();
    }

    pub fn protocol_suspend_count(&self, thread: ThreadId) -> usize {
        self.state.lock().threads.get(&thread).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn live_requests(&self) -> Vec<MockRequest> {
        self.state.lock().requests.values().cloned().collect()
    }

    pub fn requests_of_kind(&self, kind: RequestKind) -> Vec<MockRequest> {
        self.state
            .lock()
            .requests
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn invocations(&self) -> Vec<InvokeRequest> {
        self.state.lock().invocations.clone()
    }

    pub fn loaded_classes_by_request(&self) -> Vec<(ThreadId, String)> {
        self.state.lock().loaded.clone()
    }

    pub fn pinned_objects(&self) -> Vec<ObjectId> {
        let mut pinned: Vec<ObjectId> = self.state.lock().pinned.iter().copied().collect();
        pinned.sort_unstable();
        pinned
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Run `f` against the state as one protocol call
    fn with_state<T>(&self, call: impl Into<String>, f: impl FnOnce(&mut State) -> DebuggerResult<T>) -> DebuggerResult<T> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(DebuggerError::ProtocolDisconnected);
        }
        let call = call.into();
        let failure = state.failures.iter().position(|(prefix, _)| call.starts_with(prefix.as_str()));
        state.calls.push(call);
        if let Some(index) = failure {
            return Err(state.failures.remove(index).1);
        }
        f(&mut state)
    }

    fn add_request(&self, call: &str, mut request: MockRequest) -> DebuggerResult<RequestId> {
        self.with_state(call, |state| {
            let id = state.next_request;
            state.next_request += 1;
            request.id = id;
            state.requests.insert(id, request);
            Ok(id)
        })
    }
}

fn thread_count(state: &mut State, thread: ThreadId) -> DebuggerResult<&mut usize> {
    state
        .threads
        .get_mut(&thread)
        .ok_or_else(|| DebuggerError::InvalidState(format!("INVALID_THREAD {}", thread)))
}

fn require_suspended(state: &mut State, thread: ThreadId) -> DebuggerResult<()> {
    if *thread_count(state, thread)? == 0 {
        return Err(DebuggerError::InvalidState(format!("THREAD_NOT_SUSPENDED {}", thread)));
    }
    Ok(())
}

impl VirtualMachine for MockVirtualMachine {
    fn all_threads(&self) -> VmFuture<'_, Vec<ThreadId>> {
        let result = self.with_state("all_threads", |state| Ok(state.threads.keys().copied().collect()));
        async move { result }.boxed()
    }

    fn suspend(&self) -> VmFuture<'_, ()> {
        let result = self.with_state("suspend", |state| {
            state.threads.values_mut().for_each(|count| *count += 1);
            Ok(())
        });
        async move { result }.boxed()
    }

    fn resume(&self) -> VmFuture<'_, ()> {
        let result = self.with_state("resume", |state| {
            state
                .threads
                .values_mut()
                .for_each(|count| *count = count.saturating_sub(1));
            Ok(())
        });
        async move { result }.boxed()
    }

    fn suspend_thread(&self, thread: ThreadId) -> VmFuture<'_, ()> {
        let result = self.with_state(format!("suspend_thread({})", thread), |state| {
            *thread_count(state, thread)? += 1;
            Ok(())
        });
        async move { result }.boxed()
    }

    fn resume_thread(&self, thread: ThreadId) -> VmFuture<'_, ()> {
        let result = self.with_state(format!("resume_thread({})", thread), |state| {
            let count = thread_count(state, thread)?;
            *count = count.saturating_sub(1);
            Ok(())
        });
        async move { result }.boxed()
    }

    fn frame_count(&self, thread: ThreadId) -> VmFuture<'_, usize> {
        let result = self.with_state(format!("frame_count({})", thread), |state| {
            require_suspended(state, thread)?;
            Ok(state.frames.get(&thread).map_or(0, Vec::len))
        });
        async move { result }.boxed()
    }

    fn frames(&self, thread: ThreadId, start: usize, len: usize) -> VmFuture<'_, Vec<Location>> {
        let result = self.with_state(format!("frames({})", thread), |state| {
            require_suspended(state, thread)?;
            let frames = state.frames.get(&thread).cloned().unwrap_or_default();
            Ok(frames.into_iter().skip(start).take(len).collect())
        });
        async move { result }.boxed()
    }

    fn method(&self, location: Location) -> VmFuture<'_, MethodDescriptor> {
        let result = self.with_state("method", |state| {
            state
                .methods
                .get(&(location.class_id, location.method_id))
                .cloned()
                .ok_or_else(|| DebuggerError::FilterResolution(format!("no method at {:?}", location)))
        });
        async move { result }.boxed()
    }

    fn supertypes(&self, class: ReferenceTypeId) -> VmFuture<'_, Vec<String>> {
        let result = self.with_state("supertypes", |state| {
            Ok(state.supertypes.get(&class).cloned().unwrap_or_default())
        });
        async move { result }.boxed()
    }

    fn line_number(&self, location: Location) -> VmFuture<'_, Option<u32>> {
        let result = self.with_state("line_number", |state| Ok(state.lines.get(&location).copied()));
        async move { result }.boxed()
    }

    fn loaded_classes(&self, pattern: String) -> VmFuture<'_, Vec<PreparedClass>> {
        let filter = ClassFilter::new(pattern);
        let result = self.with_state("loaded_classes", |state| {
            Ok(state
                .classes
                .iter()
                .filter(|c| filter.matches(&c.name))
                .cloned()
                .collect())
        });
        async move { result }.boxed()
    }

    fn locations_of_line(
        &self,
        class: ReferenceTypeId,
        line: u32,
        _method_name: Option<String>,
    ) -> VmFuture<'_, Vec<Location>> {
        let result = self.with_state("locations_of_line", |state| {
            Ok(state.line_locations.get(&(class, line)).cloned().unwrap_or_default())
        });
        async move { result }.boxed()
    }

    fn create_breakpoint_request(&self, location: Location, policy: SuspendPolicy) -> VmFuture<'_, RequestId> {
        let result = self.add_request(
            "create_breakpoint_request",
            MockRequest {
                id: 0,
                kind: RequestKind::Breakpoint,
                policy,
                location: Some(location),
                step: None,
                pattern: None,
            },
        );
        async move { result }.boxed()
    }

    fn create_step_request(&self, spec: StepRequestSpec) -> VmFuture<'_, RequestId> {
        let result = self.add_request(
            "create_step_request",
            MockRequest {
                id: 0,
                kind: RequestKind::Step,
                policy: spec.policy,
                location: None,
                step: Some(spec),
                pattern: None,
            },
        );
        async move { result }.boxed()
    }

    fn create_class_prepare_request(&self, pattern: String, policy: SuspendPolicy) -> VmFuture<'_, RequestId> {
        let result = self.add_request(
            "create_class_prepare_request",
            MockRequest {
                id: 0,
                kind: RequestKind::ClassPrepare,
                policy,
                location: None,
                step: None,
                pattern: Some(pattern),
            },
        );
        async move { result }.boxed()
    }

    fn delete_request(&self, kind: RequestKind, request: RequestId) -> VmFuture<'_, ()> {
        let result = self.with_state(format!("delete_request({})", request), |state| {
            if state.requests.get(&request).map(|r| r.kind) == Some(kind) {
                state.requests.remove(&request);
            }
            Ok(())
        });
        async move { result }.boxed()
    }

    fn invoke_method(&self, request: InvokeRequest) -> VmFuture<'_, InvokeResult> {
        async move {
            let gate = self.with_state(format!("invoke_method({})", request.thread), |state| {
                require_suspended(state, request.thread)?;
                Ok(state.gate.clone())
            })?;
            if let Some(gate) = gate {
                // The permit only signals release; it is not kept
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|_| DebuggerError::Cancelled)?;
            }

            let mut state = self.state.lock();
            if state.disconnected {
                return Err(DebuggerError::ProtocolDisconnected);
            }
            state.invocations.push(request);
            state.invoke_results.pop_front().unwrap_or(Ok(InvokeResult {
                value: Value::void(),
                exception: None,
            }))
        }
        .boxed()
    }

    fn load_class(&self, thread: ThreadId, class_name: String) -> VmFuture<'_, ()> {
        let result = self.with_state(format!("load_class({})", class_name), |state| {
            require_suspended(state, thread)?;
            state.loaded.push((thread, class_name));
            Ok(())
        });
        async move { result }.boxed()
    }

    fn disable_collection(&self, object: ObjectId) -> VmFuture<'_, ()> {
        let result = self.with_state(format!("disable_collection({:x})", object), |state| {
            state.pinned.insert(object);
            Ok(())
        });
        async move { result }.boxed()
    }

    fn enable_collection(&self, object: ObjectId) -> VmFuture<'_, ()> {
        let result = self.with_state(format!("enable_collection({:x})", object), |state| {
            state.pinned.remove(&object);
            Ok(())
        });
        async move { result }.boxed()
    }

    fn next_event_set(&self) -> VmFuture<'_, EventSet> {
        async move {
            self.events_rx
                .lock()
                .await
                .recv()
                .await
                .ok_or(DebuggerError::ProtocolDisconnected)
        }
        .boxed()
    }

    fn dispose(&self) -> VmFuture<'_, ()> {
        let result = self.with_state("dispose", |state| {
            state.threads.values_mut().for_each(|count| *count = 0);
            state.requests.clear();
            state.disposed = true;
            Ok(())
        });
        self.events_tx.lock().take();
        async move { result }.boxed()
    }
}

/// Event set with the given policy
pub fn event_set(policy: SuspendPolicy, events: Vec<Event>) -> EventSet {
    EventSet {
        suspend_policy: policy,
        events,
    }
}

pub fn breakpoint(request: RequestId, thread: ThreadId, location: Location) -> Event {
    Event {
        kind: event_kinds::BREAKPOINT,
        request_id: request,
        details: EventKind::Breakpoint { thread, location },
    }
}

pub fn step(request: RequestId, thread: ThreadId, location: Location) -> Event {
    Event {
        kind: event_kinds::SINGLE_STEP,
        request_id: request,
        details: EventKind::Step { thread, location },
    }
}

pub fn thread_start(thread: ThreadId) -> Event {
    Event {
        kind: event_kinds::THREAD_START,
        request_id: 0,
        details: EventKind::ThreadStart { thread },
    }
}

pub fn thread_death(thread: ThreadId) -> Event {
    Event {
        kind: event_kinds::THREAD_DEATH,
        request_id: 0,
        details: EventKind::ThreadDeath { thread },
    }
}

pub fn class_prepare(request: RequestId, thread: ThreadId, class: &PreparedClass) -> Event {
    Event {
        kind: event_kinds::CLASS_PREPARE,
        request_id: request,
        details: EventKind::ClassPrepare {
            thread,
            ref_type_tag: type_tags::CLASS,
            ref_type: class.id,
            signature: class_name_to_signature(&class.name),
            status: class_status::PREPARED,
        },
    }
}

pub fn vm_death() -> Event {
    Event {
        kind: event_kinds::VM_DEATH,
        request_id: 0,
        details: EventKind::VMDeath,
    }
}
