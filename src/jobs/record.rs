//! Registry-owned job records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use futures::future::AbortHandle;
use tracing::warn;

use crate::execution::runner::Running;
use crate::jobs::model::{Job, JobId, JobKind, JobResult, JobSummary, WorkDescriptor};
use crate::jobs::state::JobStatus;
use crate::schedule::{CronSpec, TriggerHandle};
use crate::services::MessageHandler;

/// What keeps a job alive: an execution context, a cron trigger, or nothing.
#[derive(Debug, Default)]
pub enum ExecutionHandle {
    #[default]
    None,
    Thread {
        abort: AbortHandle,
        inbound: Option<mpsc::UnboundedSender<Value>>,
    },
    Scheduler(TriggerHandle),
}

impl ExecutionHandle {
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn abort_handle(&self) -> Option<&AbortHandle> {
        match self {
            Self::Thread { abort, .. } => Some(abort),
            _ => None,
        }
    }

    pub fn inbound(&self) -> Option<&mpsc::UnboundedSender<Value>> {
        match self {
            Self::Thread { inbound, .. } => inbound.as_ref(),
            _ => None,
        }
    }
}

impl From<Running> for ExecutionHandle {
    fn from(running: Running) -> Self {
        Self::Thread {
            abort: running.abort,
            inbound: running.inbound,
        }
    }
}

/// The mutable state of one job. Only the registry holds these.
#[derive(Debug)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub parent_id: Option<JobId>,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub result: JobResult,
    pub work: WorkDescriptor,
    pub cron: Option<CronSpec>,
    pub handler: Option<Arc<dyn MessageHandler>>,
    pub handle: ExecutionHandle,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Record for a thread job waiting in the queue.
    pub fn queued(id: JobId, title: String, work: WorkDescriptor) -> Self {
        Self {
            id,
            kind: JobKind::Thread,
            parent_id: None,
            title,
            description: None,
            status: JobStatus::Queued,
            result: JobResult::new(JobStatus::Queued.code(), "Job is in queue"),
            work,
            cron: None,
            handler: None,
            handle: ExecutionHandle::None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Record for a scheduler job armed with `trigger`.
    pub fn scheduler(
        id: JobId,
        title: String,
        work: WorkDescriptor,
        cron: CronSpec,
        trigger: TriggerHandle,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: JobKind::Scheduler,
            parent_id: None,
            title,
            description: None,
            status: JobStatus::Running,
            result: JobResult::new(JobStatus::Running.code(), "Scheduler is running"),
            work,
            cron: Some(cron),
            handler: None,
            handle: ExecutionHandle::Scheduler(trigger),
            created_at: now,
            started_at: Some(now),
            finished_at: None,
        }
    }

    /// Attach a freshly launched execution context.
    pub fn start(&mut self, running: Running) {
        self.transition(JobStatus::Running);
        self.result.merge(JobResult::new(JobStatus::Running.code(), "Job is running"));
        self.handle = running.into();
        self.started_at = Some(Utc::now());
    }

    /// Merge a default-protocol result and move the status accordingly.
    pub fn apply_result(&mut self, patch: JobResult) {
        let next = JobStatus::from_result_code(patch.status);
        self.result.merge(patch);
        if let Some(next) = next {
            self.finish(next);
        }
    }

    /// Move to a terminal status with the given result and drop the handle.
    /// Returns the handle so the caller can stop whatever it owns.
    pub fn finish_with(&mut self, status: JobStatus, result: JobResult) -> ExecutionHandle {
        self.result.merge(result);
        self.finish(status)
    }

    fn finish(&mut self, status: JobStatus) -> ExecutionHandle {
        self.transition(status);
        self.finished_at = Some(Utc::now());
        std::mem::take(&mut self.handle)
    }

    fn transition(&mut self, target: JobStatus) {
        if !self.status.can_transition_to(target) {
            warn!(
                job_id = %self.id,
                from = %self.status,
                to = %target,
                "Unexpected job status transition"
            );
        }
        self.status = target;
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            kind: self.kind,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
        }
    }

    pub fn snapshot(&self) -> Job {
        Job {
            id: self.id,
            kind: self.kind,
            parent_id: self.parent_id,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            result: self.result.clone(),
            work: self.work.clone(),
            cron: self.cron.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
