// Event request registry
//
// Maps protocol request ids to the requestors that own them. Requestors keep their
// id across class redefinition; only their protocol requests are replaced.

use crate::error::{DebuggerError, DebuggerResult};
use crate::position::SourcePosition;
use crate::suspend::SuspendContext;
use crate::vm::{PreparedClass, RequestKind, VirtualMachine};
use jdwp_client::types::ReferenceTypeId;
use jdwp_client::{Event, Location, RequestId, SuspendPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestorId(u64);

impl std::fmt::Display for RequestorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "requestor-{}", self.0)
    }
}

/// A source line a requestor wants a breakpoint on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointTarget {
    pub line: u32,
    /// Restrict to one method, e.g. for lambda or method breakpoints
    pub method_name: Option<String>,
}

impl BreakpointTarget {
    pub fn line(line: u32) -> Self {
        Self { line, method_name: None }
    }
}

/// Owner of event requests: a breakpoint, a watch, a run-to-cursor target
pub trait Requestor: Send + Sync {
    fn suspend_policy(&self) -> SuspendPolicy {
        SuspendPolicy::All
    }

    /// Whether the event should stop the debuggee (condition evaluation lives here)
    fn process_locatable_event(&self, _event: &Event, _context: &SuspendContext) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Breakpoint targets inside a newly prepared class
    fn class_prepared(&self, _class: &PreparedClass) -> Vec<BreakpointTarget> {
        Vec::new()
    }

    fn is_breakpoint(&self) -> bool {
        false
    }
}

/// What to ask the debuggee for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSpec {
    Breakpoint { location: Location, policy: SuspendPolicy },
    ClassPrepare { pattern: String },
}

#[derive(Debug, Clone)]
struct RequestEntry {
    requestor: RequestorId,
    kind: RequestKind,
    location: Option<Location>,
}

pub struct RequestRegistry {
    vm: Arc<dyn VirtualMachine>,
    requestors: HashMap<RequestorId, Arc<dyn Requestor>>,
    requests: HashMap<RequestId, RequestEntry>,
    by_requestor: HashMap<RequestorId, Vec<RequestId>>,
    patterns: HashMap<RequestorId, Vec<String>>,
    next_id: u64,
    /// Breakpoints are muted while any breakpoint-restoring step runs
    muted: usize,
}

impl RequestRegistry {
    pub fn new(vm: Arc<dyn VirtualMachine>) -> Self {
        Self {
            vm,
            requestors: HashMap::new(),
            requests: HashMap::new(),
            by_requestor: HashMap::new(),
            patterns: HashMap::new(),
            next_id: 0,
            muted: 0,
        }
    }

    pub fn register(&mut self, requestor: Arc<dyn Requestor>) -> RequestorId {
        self.next_id += 1;
        let id = RequestorId(self.next_id);
        self.requestors.insert(id, requestor);
        self.by_requestor.insert(id, Vec::new());
        id
    }

    pub fn requestor(&self, id: RequestorId) -> Option<Arc<dyn Requestor>> {
        self.requestors.get(&id).cloned()
    }

    /// Live protocol requests of a requestor
    pub fn requests_of(&self, id: RequestorId) -> &[RequestId] {
        self.by_requestor.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn patterns_of(&self, id: RequestorId) -> &[String] {
        self.patterns.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub async fn create_request(&mut self, requestor: RequestorId, spec: RequestSpec) -> DebuggerResult<RequestId> {
        if !self.requestors.contains_key(&requestor) {
            return Err(DebuggerError::InvalidState(format!("unknown {}", requestor)));
        }

        let (request, entry) = match spec {
            RequestSpec::Breakpoint { location, policy } => {
                let request = self.vm.create_breakpoint_request(location, policy).await?;
                let entry = RequestEntry {
                    requestor,
                    kind: RequestKind::Breakpoint,
                    location: Some(location),
                };
                (request, entry)
            }
            RequestSpec::ClassPrepare { pattern } => {
                let request = self
                    .vm
                    .create_class_prepare_request(pattern.clone(), SuspendPolicy::EventThread)
                    .await?;
                let patterns = self.patterns.entry(requestor).or_default();
                if !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
                let entry = RequestEntry {
                    requestor,
                    kind: RequestKind::ClassPrepare,
                    location: None,
                };
                (request, entry)
            }
        };

        debug!("Request {} ({:?}) created for {}", request, entry.kind, requestor);
        self.requests.insert(request, entry);
        self.by_requestor.entry(requestor).or_default().push(request);
        Ok(request)
    }

    /// Owner of a request; muted breakpoints have none
    pub fn find_requestor(&self, request: RequestId) -> Option<(RequestorId, Arc<dyn Requestor>)> {
        let entry = self.requests.get(&request)?;
        let requestor = self.requestors.get(&entry.requestor)?;
        if self.muted > 0 && entry.kind == RequestKind::Breakpoint && requestor.is_breakpoint() {
            debug!("Breakpoint request {} muted", request);
            return None;
        }
        Some((entry.requestor, requestor.clone()))
    }

    pub async fn delete_request(&mut self, request: RequestId) -> DebuggerResult<()> {
        let Some(entry) = self.requests.remove(&request) else {
            return Ok(());
        };
        if let Some(requests) = self.by_requestor.get_mut(&entry.requestor) {
            requests.retain(|r| *r != request);
        }
        match self.vm.delete_request(entry.kind, request).await {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("Request {} already gone: {}", request, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Delete every request of a requestor and forget it
    pub async fn delete_requestor(&mut self, requestor: RequestorId) -> DebuggerResult<()> {
        let requests = self.by_requestor.get(&requestor).cloned().unwrap_or_default();
        for request in requests {
            self.delete_request(request).await?;
        }
        self.by_requestor.remove(&requestor);
        self.patterns.remove(&requestor);
        self.requestors.remove(&requestor);
        Ok(())
    }

    /// Resolve the requestor behind a class prepare request against the new class
    pub async fn process_class_prepared(
        &mut self,
        request: RequestId,
        class: &PreparedClass,
    ) -> DebuggerResult<Vec<RequestId>> {
        let Some(entry) = self.requests.get(&request) else {
            debug!("Class prepare for unknown request {}", request);
            return Ok(Vec::new());
        };
        let requestor = entry.requestor;
        self.resolve_in_class(requestor, class).await
    }

    /// Resolve against classes loaded before the requestor was added
    pub async fn resolve_loaded(&mut self, requestor: RequestorId, pattern: &str) -> DebuggerResult<Vec<RequestId>> {
        let classes = self.vm.loaded_classes(pattern.to_string()).await?;
        let mut created = Vec::new();
        for class in &classes {
            created.extend(self.resolve_in_class(requestor, class).await?);
        }
        Ok(created)
    }

    async fn resolve_in_class(&mut self, requestor: RequestorId, class: &PreparedClass) -> DebuggerResult<Vec<RequestId>> {
        let Some(handler) = self.requestors.get(&requestor).cloned() else {
            return Ok(Vec::new());
        };

        let mut created = Vec::new();
        for target in handler.class_prepared(class) {
            let locations = match self
                .vm
                .locations_of_line(class.id, target.line, target.method_name.clone())
                .await
            {
                Ok(locations) => locations,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Could not resolve line {} in {}: {}", target.line, class.name, e);
                    continue;
                }
            };
            if locations.is_empty() {
                debug!("No code at line {} in {}", target.line, class.name);
            }
            for location in locations {
                if self.has_breakpoint_at(requestor, &location) {
                    continue;
                }
                let spec = RequestSpec::Breakpoint {
                    location,
                    policy: handler.suspend_policy(),
                };
                created.push(self.create_request(requestor, spec).await?);
            }
        }
        if !created.is_empty() {
            info!("Resolved {} breakpoint locations in {} for {}", created.len(), class.name, requestor);
        }
        Ok(created)
    }

    fn has_breakpoint_at(&self, requestor: RequestorId, location: &Location) -> bool {
        self.requests_of(requestor).iter().any(|request| {
            self.requests
                .get(request)
                .map_or(false, |entry| entry.location.as_ref() == Some(location))
        })
    }

    /// Replace breakpoint requests located in redefined classes
    pub async fn classes_redefined(&mut self, classes: &[PreparedClass]) -> DebuggerResult<Vec<RequestId>> {
        self.vm.forget_classes(classes);
        let redefined: HashSet<ReferenceTypeId> = classes.iter().map(|c| c.id).collect();
        let stale: Vec<(RequestId, RequestorId)> = self
            .requests
            .iter()
            .filter(|(_, entry)| {
                entry.kind == RequestKind::Breakpoint
                    && entry.location.map_or(false, |l| redefined.contains(&l.class_id))
            })
            .map(|(request, entry)| (*request, entry.requestor))
            .collect();

        let mut affected: Vec<RequestorId> = Vec::new();
        for (request, requestor) in stale {
            self.delete_request(request).await?;
            if !affected.contains(&requestor) {
                affected.push(requestor);
            }
        }

        let mut created = Vec::new();
        for requestor in affected {
            for class in classes {
                created.extend(self.resolve_in_class(requestor, class).await?);
            }
        }
        Ok(created)
    }

    pub fn mute_breakpoints(&mut self) {
        self.muted += 1;
    }

    pub fn unmute_breakpoints(&mut self) {
        self.muted = self.muted.saturating_sub(1);
    }

    pub fn breakpoints_muted(&self) -> bool {
        self.muted > 0
    }
}

/// Line breakpoint resolved by class name pattern
#[derive(Debug)]
pub struct LineBreakpoint {
    position: SourcePosition,
    method_name: Option<String>,
    policy: SuspendPolicy,
    hits: AtomicUsize,
}

impl LineBreakpoint {
    pub fn new(position: SourcePosition) -> Self {
        Self {
            position,
            method_name: None,
            policy: SuspendPolicy::All,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn in_method(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }

    pub fn with_policy(mut self, policy: SuspendPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn position(&self) -> &SourcePosition {
        &self.position
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Requestor for LineBreakpoint {
    fn suspend_policy(&self) -> SuspendPolicy {
        self.policy
    }

    fn process_locatable_event(&self, _event: &Event, _context: &SuspendContext) -> anyhow::Result<bool> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn class_prepared(&self, _class: &PreparedClass) -> Vec<BreakpointTarget> {
        vec![BreakpointTarget {
            line: self.position.line,
            method_name: self.method_name.clone(),
        }]
    }

    fn is_breakpoint(&self) -> bool {
        true
    }
}
