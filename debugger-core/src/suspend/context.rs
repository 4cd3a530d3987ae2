// One suspension episode of the debuggee

use crate::command::SuspendContextCommand;
use crate::error::{DebuggerError, DebuggerResult};
use jdwp_client::types::ObjectId;
use jdwp_client::{EventSet, SuspendPolicy, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// Opaque handle to a context in the suspend manager's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(pub(crate) u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What created a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    /// A debuggee event set
    Event,
    /// User pause of the whole VM
    Pause,
    /// User freeze of a single thread
    Freeze,
}

pub struct SuspendContext {
    pub(crate) id: ContextId,
    pub(crate) policy: SuspendPolicy,
    pub(crate) kind: ContextKind,
    pub(crate) event_set: Option<EventSet>,
    pub(crate) thread: Option<ThreadId>,
    pub(crate) votes_to_resume: usize,
    pub(crate) resume_votes: usize,
    pub(crate) suspend_votes: usize,
    /// Threads this context holds suspended, fixed when it was pushed
    pub(crate) suspended: BTreeSet<ThreadId>,
    /// Threads let go inside this context while it stays suspended
    pub(crate) resumed_threads: BTreeSet<ThreadId>,
    pub(crate) evaluating: Option<ThreadId>,
    pub(crate) resumed: bool,
    /// Pinned contexts only resume on explicit request
    pub(crate) pinned: bool,
    pub(crate) kept_references: Vec<ObjectId>,
    pub(crate) postponed: VecDeque<SuspendContextCommand>,
}

impl fmt::Debug for SuspendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendContext")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("kind", &self.kind)
            .field("thread", &self.thread)
            .field("votes_to_resume", &self.votes_to_resume)
            .field("suspended", &self.suspended)
            .field("resumed_threads", &self.resumed_threads)
            .field("evaluating", &self.evaluating)
            .field("resumed", &self.resumed)
            .field("postponed", &self.postponed.len())
            .finish()
    }
}

impl SuspendContext {
    pub(crate) fn new(
        id: ContextId,
        policy: SuspendPolicy,
        kind: ContextKind,
        event_set: Option<EventSet>,
        votes_to_resume: usize,
    ) -> Self {
        let thread = event_set.as_ref().and_then(EventSet::thread);
        Self {
            id,
            policy,
            kind,
            event_set,
            thread,
            votes_to_resume,
            resume_votes: 0,
            suspend_votes: 0,
            suspended: BTreeSet::new(),
            resumed_threads: BTreeSet::new(),
            evaluating: None,
            resumed: false,
            pinned: false,
            kept_references: Vec::new(),
            postponed: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn suspend_policy(&self) -> SuspendPolicy {
        self.policy
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn event_set(&self) -> Option<&EventSet> {
        self.event_set.as_ref()
    }

    pub fn thread(&self) -> Option<ThreadId> {
        self.thread
    }

    /// Bind the context to a thread; a different thread later is an error
    pub fn set_thread(&mut self, thread: ThreadId) -> DebuggerResult<()> {
        match self.thread {
            Some(current) if current != thread => Err(DebuggerError::InvalidState(format!(
                "context {} already bound to thread {}, not {}",
                self.id, current, thread
            ))),
            _ => {
                self.thread = Some(thread);
                Ok(())
            }
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn is_evaluating(&self) -> bool {
        self.evaluating.is_some()
    }

    pub fn evaluating_thread(&self) -> Option<ThreadId> {
        self.evaluating
    }

    pub fn resumed_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.resumed_threads.iter().copied()
    }

    /// Votes still expected before the context decides
    pub fn pending_votes(&self) -> usize {
        self.votes_to_resume
            .saturating_sub(self.resume_votes + self.suspend_votes)
    }

    /// True while this context keeps `thread` suspended
    pub fn suspends(&self, thread: ThreadId) -> bool {
        !self.resumed && self.suspended.contains(&thread) && !self.resumed_threads.contains(&thread)
    }

    pub fn suspended_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.suspended
            .iter()
            .copied()
            .filter(move |thread| !self.resumed_threads.contains(thread))
    }

    pub fn kept_references(&self) -> &[ObjectId] {
        &self.kept_references
    }
}
