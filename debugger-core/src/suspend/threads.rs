// Debuggee thread bookkeeping

use crate::error::{DebuggerError, DebuggerResult};
use jdwp_client::ThreadId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadState {
    /// Number of active contexts suspending the thread
    pub suspend_count: usize,
    pub frozen: bool,
    /// The thread died; it can no longer be queried
    pub collected: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ThreadRegistry {
    threads: BTreeMap<ThreadId, ThreadState>,
}

impl ThreadRegistry {
    pub fn register(&mut self, thread: ThreadId) {
        self.threads.entry(thread).or_default();
    }

    pub fn mark_collected(&mut self, thread: ThreadId) {
        self.threads.entry(thread).or_default().collected = true;
    }

    /// Live threads in id order
    pub fn live(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads
            .iter()
            .filter(|(_, state)| !state.collected)
            .map(|(thread, _)| *thread)
    }

    pub fn get(&self, thread: ThreadId) -> DebuggerResult<&ThreadState> {
        match self.threads.get(&thread) {
            Some(state) if !state.collected => Ok(state),
            Some(_) => Err(DebuggerError::InvalidState(format!("thread {} was collected", thread))),
            None => Err(DebuggerError::InvalidState(format!("unknown thread {}", thread))),
        }
    }

    pub fn state_mut(&mut self, thread: ThreadId) -> &mut ThreadState {
        self.threads.entry(thread).or_default()
    }

    pub fn increment(&mut self, thread: ThreadId) {
        self.state_mut(thread).suspend_count += 1;
    }

    pub fn decrement(&mut self, thread: ThreadId) {
        let state = self.state_mut(thread);
        state.suspend_count = state.suspend_count.saturating_sub(1);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &ThreadState)> + '_ {
        self.threads.iter().map(|(thread, state)| (*thread, state))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ThreadId, &mut ThreadState)> + '_ {
        self.threads.iter_mut().map(|(thread, state)| (*thread, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collected_threads_are_invalid() {
        let mut registry = ThreadRegistry::default();
        registry.register(1);
        registry.register(2);
        registry.mark_collected(2);

        assert_eq!(registry.live().collect::<Vec<_>>(), vec![1]);
        assert!(registry.get(1).is_ok());
        assert!(matches!(registry.get(2), Err(DebuggerError::InvalidState(_))));
        assert!(registry.get(3).is_err());
    }
}
