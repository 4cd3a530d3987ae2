// Worker requests
//
// Bookkeeping for long protocol operations forked off the manager thread. Each
// request stays registered until its switch-back command retires it.

use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerRequestId(u64);

#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub id: WorkerRequestId,
    pub description: String,
    pub started: Instant,
}

#[derive(Debug, Default)]
pub struct WorkerPool {
    outstanding: HashMap<WorkerRequestId, WorkerRequest>,
    next_id: u64,
}

impl WorkerPool {
    pub fn begin(&mut self, description: impl Into<String>) -> WorkerRequestId {
        self.next_id += 1;
        let id = WorkerRequestId(self.next_id);
        let request = WorkerRequest {
            id,
            description: description.into(),
            started: Instant::now(),
        };
        debug!("Worker request {} started", request.description);
        self.outstanding.insert(id, request);
        id
    }

    pub fn retire(&mut self, id: WorkerRequestId) -> Option<WorkerRequest> {
        let request = self.outstanding.remove(&id);
        match &request {
            Some(request) => debug!(
                "Worker request {} retired after {:?}",
                request.description,
                request.started.elapsed()
            ),
            None => warn!("Worker request {:?} retired twice", id),
        }
        request
    }

    pub fn outstanding(&self) -> impl Iterator<Item = &WorkerRequest> + '_ {
        self.outstanding.values()
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_retire_once() {
        let mut pool = WorkerPool::default();
        let a = pool.begin("invoke toString");
        let b = pool.begin("invoke hashCode");
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.retire(a).map(|r| r.description), Some("invoke toString".to_string()));
        assert!(pool.retire(a).is_none());
        assert_eq!(pool.outstanding().map(|r| r.id).collect::<Vec<_>>(), vec![b]);
    }
}
