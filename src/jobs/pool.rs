//! Bounded worker pool: FIFO admission of thread jobs into execution slots.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use futures::future::AbortHandle;
use tracing::{debug, info};

use crate::jobs::JobId;
use crate::services::{JobFunction, MessageHandler};

/// A thread job waiting for, or occupying, an execution slot.
pub struct QueueEntry {
    pub job_id: JobId,
    pub function: Arc<dyn JobFunction>,
    pub payload: Value,
    pub handler: Option<Arc<dyn MessageHandler>>,
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("job_id", &self.job_id)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// What [`WorkerPool::terminate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The job was in flight and its context was told to stop. The slot
    /// stays held until the context exits and the caller releases it.
    Aborted,
    /// The job was still pending and has been removed from the queue.
    Dequeued,
    /// The pool holds nothing for this job.
    Untracked,
}

/// FIFO queue in front of a fixed number of execution slots.
///
/// The pool does not start anything itself: [`dispatch`](Self::dispatch)
/// hands each admitted entry to a launcher supplied by the caller. The
/// active set is keyed by job id so releasing a slot is idempotent.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    pending: VecDeque<QueueEntry>,
    active: HashSet<JobId>,
}

impl WorkerPool {
    /// Create a pool. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: VecDeque::new(),
            active: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_free_slot(&self) -> bool {
        self.active.len() < self.capacity
    }

    /// Append to the tail of the queue. Callers dispatch afterwards.
    pub fn enqueue(&mut self, entry: QueueEntry) {
        debug!(job_id = %entry.job_id, position = self.pending.len(), "Job queued");
        self.pending.push_back(entry);
    }

    /// Admit the head entry if a slot is free, passing it to `launch`.
    /// Returns the admitted job's id.
    pub fn dispatch_next<F>(&mut self, launch: F) -> Option<JobId>
    where
        F: FnOnce(QueueEntry),
    {
        if !self.has_free_slot() {
            return None;
        }
        let entry = self.pending.pop_front()?;
        let job_id = entry.job_id;
        self.active.insert(job_id);
        info!(
            job_id = %job_id,
            active = self.active.len(),
            capacity = self.capacity,
            "Dispatching job"
        );
        launch(entry);
        Some(job_id)
    }

    /// Admit entries in FIFO order until the slots or the queue run out.
    /// Returns how many were admitted.
    pub fn dispatch<F>(&mut self, mut launch: F) -> usize
    where
        F: FnMut(QueueEntry),
    {
        let mut admitted = 0;
        while self.dispatch_next(&mut launch).is_some() {
            admitted += 1;
        }
        admitted
    }

    /// Remove a not-yet-dispatched entry.
    pub fn remove_queued(&mut self, job_id: JobId) -> Option<QueueEntry> {
        let position = self.pending.iter().position(|e| e.job_id == job_id)?;
        self.pending.remove(position)
    }

    /// Free the slot held by `job_id`. Returns false if it held none.
    pub fn release(&mut self, job_id: JobId) -> bool {
        let released = self.active.remove(&job_id);
        if released {
            debug!(job_id = %job_id, active = self.active.len(), "Released execution slot");
        }
        released
    }

    /// Stop a job: abort it if in flight, otherwise drop it from the queue.
    ///
    /// An in-flight job keeps its slot until [`release`](Self::release) is
    /// called on exit, so a context that is slow to stop still counts
    /// against capacity.
    pub fn terminate(&mut self, job_id: JobId, handle: Option<&AbortHandle>) -> Termination {
        if self.remove_queued(job_id).is_some() {
            return Termination::Dequeued;
        }
        if self.active.contains(&job_id) {
            if let Some(handle) = handle {
                handle.abort();
            }
            debug!(job_id = %job_id, "Abort requested; slot held until exit");
            return Termination::Aborted;
        }
        Termination::Untracked
    }

    /// True while `job_id` waits in the queue.
    pub fn contains(&self, job_id: JobId) -> bool {
        self.pending.iter().any(|e| e.job_id == job_id)
    }

    /// True while `job_id` holds a slot.
    pub fn is_active(&self, job_id: JobId) -> bool {
        self.active.contains(&job_id)
    }
}
