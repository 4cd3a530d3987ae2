// Debug process listeners
//
// Listeners are notified on the manager thread. They must not block.

use crate::suspend::SuspendContext;
use jdwp_client::ThreadId;
use parking_lot::RwLock;
use std::sync::Arc;

pub trait DebugProcessListener: Send + Sync {
    /// A context finished voting and keeps the debuggee suspended
    fn paused(&self, _context: &SuspendContext) {}

    fn resumed(&self, _context: &SuspendContext) {}

    fn process_attached(&self) {}

    fn process_detached(&self, _closed_by_user: bool) {}

    fn thread_started(&self, _thread: ThreadId) {}

    fn thread_stopped(&self, _thread: ThreadId) {}
}

/// Shared, append-only listener list
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<RwLock<Vec<Arc<dyn DebugProcessListener>>>>,
}

impl Listeners {
    pub fn new(listeners: Vec<Arc<dyn DebugProcessListener>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(listeners)),
        }
    }

    pub fn add(&self, listener: Arc<dyn DebugProcessListener>) {
        self.inner.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub(crate) fn fire(&self, f: impl Fn(&dyn DebugProcessListener)) {
        let snapshot = self.inner.read().clone();
        for listener in snapshot {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl DebugProcessListener for Counter {
        fn thread_started(&self, _thread: ThreadId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_every_listener_is_notified() {
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let listeners = Listeners::new(vec![a.clone()]);
        listeners.add(b.clone());

        listeners.fire(|l| l.thread_started(1));
        listeners.fire(|l| l.process_attached());

        assert_eq!(listeners.len(), 2);
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }
}
