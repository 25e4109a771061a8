//! Job registry: the orchestrator API.
//!
//! The registry owns every job record, the worker pool and the parent to
//! children index behind one mutex, so dispatches, results, exits and
//! cancellations never interleave. Scheduler triggers hold only a weak
//! reference back to the registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::{EnterGuard, Handle};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{JobError, JobErrorKind};
use crate::execution::runner::{self, ExecutionObserver, ExitReason, Launch};
use crate::jobs::model::{
    Confirmation, Job, JobDetail, JobId, JobKind, JobResult, JobSpec, PoolStats,
};
use crate::jobs::pool::{QueueEntry, Termination, WorkerPool};
use crate::jobs::record::{ExecutionHandle, JobRecord};
use crate::jobs::state::JobStatus;
use crate::schedule::{CronTimer, FireCallback, TokioCronTimer, TriggerHandle};
use crate::services::ServiceResolver;

/// Whether a new job's parent must still be a running scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lineage {
    Any,
    LiveScheduler,
}

#[derive(Debug)]
struct RegistryState {
    jobs: BTreeMap<JobId, JobRecord>,
    children: HashMap<JobId, Vec<JobId>>,
    pool: WorkerPool,
}

struct Inner {
    state: Mutex<RegistryState>,
    resolver: Arc<dyn ServiceResolver>,
    timer: Arc<dyn CronTimer>,
    /// Runtime that supervisors and tickers are spawned on, even when a job
    /// is created from inside another job's execution thread.
    runtime: Option<Handle>,
}

/// Creates, tracks, cancels and purges jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    /// Create a registry with `max_workers` execution slots and the
    /// wall-clock cron timer.
    pub fn new(resolver: Arc<dyn ServiceResolver>, max_workers: usize) -> Self {
        Self::with_timer(resolver, max_workers, Arc::new(TokioCronTimer))
    }

    pub fn from_config(config: &OrchestratorConfig, resolver: Arc<dyn ServiceResolver>) -> Self {
        Self::new(resolver, config.max_workers)
    }

    /// Registries built inside a tokio runtime keep spawning onto it.
    pub fn with_timer(
        resolver: Arc<dyn ServiceResolver>,
        max_workers: usize,
        timer: Arc<dyn CronTimer>,
    ) -> Self {
        let state = RegistryState {
            jobs: BTreeMap::new(),
            children: HashMap::new(),
            pool: WorkerPool::new(max_workers),
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                resolver,
                timer,
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    fn enter_runtime(&self) -> Option<EnterGuard<'_>> {
        self.inner.runtime.as_ref().map(Handle::enter)
    }

    fn bind_trigger(&self, scheduler_id: JobId, schedule: cron::Schedule) -> TriggerHandle {
        let _runtime = self.enter_runtime();
        self.inner.timer.bind(schedule, self.spawn_callback(scheduler_id))
    }

    /// Admit a new job and return its id without waiting for it to run.
    pub async fn create_job(&self, spec: JobSpec) -> Result<JobId, JobError> {
        self.admit(spec, Lineage::Any).await
    }

    async fn admit(&self, spec: JobSpec, lineage: Lineage) -> Result<JobId, JobError> {
        spec.validate()?;
        let function = self
            .inner
            .resolver
            .resolve(&spec.work.module, &spec.work.function)
            .await?;
        let armed = match spec.kind {
            JobKind::Scheduler => {
                let cron = spec.cron.clone().ok_or_else(|| JobError::missing_field("cron"))?;
                let schedule = cron.schedule()?;
                Some((cron, schedule))
            }
            JobKind::Thread => None,
        };

        let mut state = self.inner.state.lock().await;

        if let Some(parent_id) = spec.parent_id {
            let parent = state
                .jobs
                .get(&parent_id)
                .ok_or_else(|| JobError::parent_not_found(parent_id))?;
            if lineage == Lineage::LiveScheduler && parent.status != JobStatus::Running {
                return Err(JobError::parent_not_found(parent_id));
            }
        }

        if spec.kind == JobKind::Scheduler
            && state.jobs.values().any(|job| {
                job.kind == JobKind::Scheduler && job.title == spec.title && job.handle.is_live()
            })
        {
            return Err(JobError::scheduler_already_running(&spec.title));
        }

        let id = JobId::new();
        let JobSpec {
            kind,
            title,
            work,
            description,
            parent_id,
            handler,
            ..
        } = spec;

        let mut record = match armed {
            Some((cron, schedule)) => {
                let trigger = self.bind_trigger(id, schedule);
                JobRecord::scheduler(id, title, work.clone(), cron, trigger)
            }
            None => JobRecord::queued(id, title, work.clone()),
        };
        record.description = description;
        record.parent_id = parent_id;
        record.handler = handler.clone();

        info!(
            job_id = %id,
            kind = %kind,
            title = %record.title,
            parent_id = ?parent_id,
            "Job created"
        );

        if let Some(parent_id) = parent_id {
            state.children.entry(parent_id).or_default().push(id);
        }
        state.jobs.insert(id, record);

        if kind == JobKind::Thread {
            state.pool.enqueue(QueueEntry {
                job_id: id,
                function,
                payload: work.payload,
                handler,
            });
            self.dispatch(&mut state);
        }

        Ok(id)
    }

    /// Trigger callback for a scheduler: spawn one child per fire.
    fn spawn_callback(&self, scheduler_id: JobId) -> FireCallback {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    JobRegistry { inner }.spawn_child(scheduler_id).await;
                }
            }
            .boxed()
        })
    }

    async fn spawn_child(&self, scheduler_id: JobId) {
        let spec = {
            let state = self.inner.state.lock().await;
            let Some(parent) = state.jobs.get(&scheduler_id) else {
                return;
            };
            if parent.status != JobStatus::Running {
                return;
            }
            let mut spec = JobSpec::thread(
                format!("Child of scheduled job: {}", parent.title),
                parent.work.clone(),
            )
            .with_parent(scheduler_id);
            spec.description = parent.description.clone();
            spec.handler = parent.handler.clone();
            spec
        };

        match self.admit(spec, Lineage::LiveScheduler).await {
            Ok(child_id) => {
                info!(scheduler_id = %scheduler_id, job_id = %child_id, "Scheduler spawned child job");
            }
            Err(e) if e.kind() == JobErrorKind::ParentNotFound => {
                debug!(scheduler_id = %scheduler_id, "Scheduler stopped before its child was admitted");
            }
            Err(e) => {
                warn!(scheduler_id = %scheduler_id, error = %e, "Scheduler failed to spawn child job");
            }
        }
    }

    /// Fill free slots from the queue.
    fn dispatch(&self, state: &mut RegistryState) {
        let _runtime = self.enter_runtime();
        let RegistryState { jobs, pool, .. } = state;
        pool.dispatch(|entry| {
            let QueueEntry {
                job_id,
                function,
                payload,
                handler,
            } = entry;
            let observer: Arc<dyn ExecutionObserver> = Arc::new(self.clone());
            let running = runner::launch(
                Launch {
                    job_id,
                    function,
                    payload,
                    handler,
                },
                observer,
            );
            match jobs.get_mut(&job_id) {
                Some(record) => record.start(running),
                None => {
                    warn!(job_id = %job_id, "Dispatched job has no record; aborting");
                    running.abort.abort();
                }
            }
        });
    }

    /// Read-only copy of a job.
    pub async fn get_job(&self, job_id: JobId) -> Result<Job, JobError> {
        let state = self.inner.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .map(JobRecord::snapshot)
            .ok_or_else(|| JobError::job_not_found(job_id))
    }

    /// A job and its direct children.
    pub async fn get_job_detail(&self, job_id: JobId) -> Result<JobDetail, JobError> {
        let state = self.inner.state.lock().await;
        let record = state
            .jobs
            .get(&job_id)
            .ok_or_else(|| JobError::job_not_found(job_id))?;
        Ok(state.detail(record))
    }

    /// Every job, oldest first, each with its direct children.
    pub async fn list_jobs(&self) -> Vec<JobDetail> {
        let state = self.inner.state.lock().await;
        state.jobs.values().map(|record| state.detail(record)).collect()
    }

    pub async fn get_job_result(&self, job_id: JobId) -> Result<JobResult, JobError> {
        let state = self.inner.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .map(|record| record.result.clone())
            .ok_or_else(|| JobError::job_not_found(job_id))
    }

    /// Cancel a job. Cancelling a job that already finished succeeds without
    /// changing it.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<Confirmation, JobError> {
        let mut state = self.inner.state.lock().await;
        let confirmation = cancel_locked(&mut state, job_id)?;
        self.dispatch(&mut state);
        Ok(confirmation)
    }

    /// Drop every finished job that no longer holds a queue entry or slot.
    pub async fn purge_finished(&self) -> Confirmation {
        let mut state = self.inner.state.lock().await;
        let purgeable: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal()
                    && !state.pool.contains(job.id)
                    && !state.pool.is_active(job.id)
            })
            .map(|job| job.id)
            .collect();
        for job_id in &purgeable {
            state.remove(*job_id);
        }
        info!(count = purgeable.len(), "Purged finished jobs");
        Confirmation::ok(format!("Cleared data for {} finished jobs", purgeable.len()))
    }

    /// Drop one finished job.
    pub async fn purge_job(&self, job_id: JobId) -> Result<Confirmation, JobError> {
        let mut state = self.inner.state.lock().await;
        let record = state
            .jobs
            .get(&job_id)
            .ok_or_else(|| JobError::job_not_found(job_id))?;
        if !record.status.is_terminal() {
            return Err(JobError::not_purgeable(
                job_id,
                &format!("job is still {}", record.status),
            ));
        }
        if state.pool.contains(job_id) {
            return Err(JobError::not_purgeable(job_id, "job is still queued"));
        }
        if state.pool.is_active(job_id) {
            return Err(JobError::not_purgeable(
                job_id,
                "job still holds an execution slot",
            ));
        }
        state.remove(job_id);
        debug!(job_id = %job_id, "Purged job");
        Ok(Confirmation::ok(format!("Cleared data for job {job_id}")))
    }

    /// Send a custom message into a running job's execution context.
    pub async fn post_message(&self, job_id: JobId, payload: Value) -> Result<(), JobError> {
        let state = self.inner.state.lock().await;
        let record = state
            .jobs
            .get(&job_id)
            .ok_or_else(|| JobError::job_not_found(job_id))?;
        record
            .handle
            .inbound()
            .ok_or_else(|| JobError::channel_unavailable(job_id))?
            .send(payload)
            .map_err(|_| JobError::channel_unavailable(job_id))
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        PoolStats {
            capacity: state.pool.capacity(),
            active: state.pool.active_count(),
            pending: state.pool.pending_count(),
            jobs: state.jobs.len(),
        }
    }

    /// Cancel every job that has not finished, schedulers first.
    /// Returns how many jobs were cancelled.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let mut live: Vec<(JobKind, JobId)> = state
            .jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .map(|job| (job.kind, job.id))
            .collect();
        live.sort_by_key(|(kind, id)| (*kind == JobKind::Thread, *id));

        let mut cancelled = 0;
        for (_, job_id) in live {
            let still_live = state
                .jobs
                .get(&job_id)
                .is_some_and(|job| !job.status.is_terminal());
            if still_live && cancel_locked(&mut state, job_id).is_ok() {
                cancelled += 1;
            }
        }
        info!(cancelled, "Job registry shut down");
        cancelled
    }
}

/// Cancel `job_id` and, for a scheduler, its unfinished children.
fn cancel_locked(state: &mut RegistryState, job_id: JobId) -> Result<Confirmation, JobError> {
    let record = state
        .jobs
        .get_mut(&job_id)
        .ok_or_else(|| JobError::job_not_found(job_id))?;
    if record.status.is_terminal() {
        return Ok(Confirmation::ok(format!(
            "Job {job_id} is already {}",
            record.status
        )));
    }

    let kind = record.kind;
    let message = match kind {
        JobKind::Thread => match state.pool.terminate(job_id, record.handle.abort_handle()) {
            Termination::Aborted => format!("Job {job_id} terminated"),
            Termination::Dequeued => format!("Job {job_id} removed from queue"),
            Termination::Untracked => format!("Job {job_id} cancelled"),
        },
        JobKind::Scheduler => format!("Scheduler job {job_id} cancelled"),
    };

    let handle = record.finish_with(
        JobStatus::Cancelled,
        JobResult::new(JobStatus::Cancelled.code(), message.clone()),
    );
    if let ExecutionHandle::Scheduler(trigger) = handle {
        trigger.cancel();
    }
    info!(job_id = %job_id, kind = %kind, "Job cancelled");

    if kind == JobKind::Scheduler {
        let children = state.children.get(&job_id).cloned().unwrap_or_default();
        for child_id in children {
            let live = state
                .jobs
                .get(&child_id)
                .is_some_and(|child| !child.status.is_terminal());
            if live {
                cancel_locked(state, child_id)?;
            }
        }
    }

    Ok(Confirmation::ok(message))
}

impl RegistryState {
    fn detail(&self, record: &JobRecord) -> JobDetail {
        let children = self
            .children
            .get(&record.id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.jobs.get(id))
                    .map(JobRecord::summary)
                    .collect()
            })
            .unwrap_or_default();
        JobDetail {
            job: record.summary(),
            children,
        }
    }

    fn remove(&mut self, job_id: JobId) {
        let Some(record) = self.jobs.remove(&job_id) else {
            return;
        };
        if let Some(parent_id) = record.parent_id
            && let Some(siblings) = self.children.get_mut(&parent_id)
        {
            siblings.retain(|id| *id != job_id);
            if siblings.is_empty() {
                self.children.remove(&parent_id);
            }
        }
        self.children.remove(&job_id);
    }
}

#[async_trait]
impl ExecutionObserver for JobRegistry {
    async fn on_result(&self, job_id: JobId, result: JobResult) {
        let mut state = self.inner.state.lock().await;
        let Some(record) = state.jobs.get_mut(&job_id) else {
            debug!(job_id = %job_id, "Ignoring result for unknown job");
            return;
        };
        if record.status.is_terminal() {
            debug!(job_id = %job_id, status = %record.status, "Ignoring result for finished job");
            return;
        }
        record.apply_result(result);
        if record.status.is_terminal() {
            info!(job_id = %job_id, status = %record.status, "Job finished");
        }
    }

    async fn on_exit(&self, job_id: JobId, reason: ExitReason) {
        let mut state = self.inner.state.lock().await;
        state.pool.release(job_id);

        if let Some(record) = state.jobs.get_mut(&job_id)
            && !record.status.is_terminal()
        {
            let message = match reason {
                ExitReason::Panicked(detail) => format!("Execution context panicked: {detail}"),
                ExitReason::Failed(detail) => format!("Execution context failed: {detail}"),
                ExitReason::Returned | ExitReason::Aborted => {
                    "Execution context exited without a result".to_string()
                }
            };
            warn!(job_id = %job_id, %message, "Job exited without a final result");
            record.finish_with(
                JobStatus::Failed,
                JobResult::new(JobStatus::Failed.code(), message),
            );
        }

        self.dispatch(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::jobs::model::WorkDescriptor;
    use crate::schedule::ManualCronTimer;
    use crate::services::{JobOutput, ServiceRegistry, job_fn};

    async fn registry_with(max_workers: usize) -> (JobRegistry, Arc<Semaphore>, ManualCronTimer) {
        let gate = Arc::new(Semaphore::new(0));
        let services = ServiceRegistry::new();
        let held = gate.clone();
        services
            .register(
                "test",
                "wait",
                job_fn(move |_, _| {
                    let gate = held.clone();
                    async move {
                        gate.acquire().await?.forget();
                        Ok(JobOutput::Empty)
                    }
                }),
            )
            .await;
        services
            .register("test", "echo", job_fn(|payload, _| async move { Ok(payload.into()) }))
            .await;
        let timer = ManualCronTimer::new();
        let registry = JobRegistry::with_timer(Arc::new(services), max_workers, Arc::new(timer.clone()));
        (registry, gate, timer)
    }

    async fn wait_for_status(registry: &JobRegistry, id: JobId, status: JobStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.get_job(id).await.unwrap().status != status {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {status}"));
    }

    fn wait_job() -> JobSpec {
        JobSpec::thread("blocker", WorkDescriptor::new("test", "wait"))
    }

    #[tokio::test]
    async fn thread_job_completes_with_payload() {
        let (registry, _, _) = registry_with(2).await;
        let id = registry
            .create_job(JobSpec::thread(
                "echo",
                WorkDescriptor::new("test", "echo").with_payload(json!({"x": 1})),
            ))
            .await
            .unwrap();

        wait_for_status(&registry, id, JobStatus::Completed).await;
        let result = registry.get_job_result(id).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(
            result.data,
            Some(crate::jobs::ResultData::Json(json!({"x": 1})))
        );
        let job = registry.get_job(id).await.unwrap();
        assert!(job.started_at.is_some() && job.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancel_in_flight_dispatches_next() {
        let (registry, _, _) = registry_with(1).await;
        let first = registry.create_job(wait_job()).await.unwrap();
        let second = registry.create_job(wait_job()).await.unwrap();
        assert_eq!(registry.get_job(first).await.unwrap().status, JobStatus::Running);
        assert_eq!(registry.get_job(second).await.unwrap().status, JobStatus::Queued);

        let confirmation = registry.cancel_job(first).await.unwrap();
        assert_eq!(confirmation.status, 200);
        assert_eq!(registry.get_job(first).await.unwrap().status, JobStatus::Cancelled);
        // The slot passes on once the aborted context has exited.
        wait_for_status(&registry, second, JobStatus::Running).await;
        let stats = registry.stats().await;
        assert_eq!((stats.active, stats.pending), (1, 0));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_for_finished_jobs() {
        let (registry, _, _) = registry_with(1).await;
        let id = registry.create_job(wait_job()).await.unwrap();
        registry.cancel_job(id).await.unwrap();
        let again = registry.cancel_job(id).await.unwrap();
        assert!(again.message.contains("already cancelled"));
        assert_eq!(registry.get_job_result(id).await.unwrap().status, 499);

        let err = registry.cancel_job(JobId::new()).await.unwrap_err();
        assert_eq!(err.kind(), JobErrorKind::JobNotFound);
    }

    #[tokio::test]
    async fn purge_one_rejects_unfinished_jobs() {
        let (registry, gate, _) = registry_with(1).await;
        let running = registry.create_job(wait_job()).await.unwrap();
        let queued = registry.create_job(wait_job()).await.unwrap();

        for id in [running, queued] {
            let err = registry.purge_job(id).await.unwrap_err();
            assert_eq!(err.kind(), JobErrorKind::JobNotPurgeable);
        }

        gate.add_permits(2);
        wait_for_status(&registry, queued, JobStatus::Completed).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.purge_job(running).await.is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let err = registry.get_job(running).await.unwrap_err();
        assert_eq!(err.kind(), JobErrorKind::JobNotFound);
    }

    #[tokio::test]
    async fn post_message_requires_custom_channel() {
        let (registry, _, _) = registry_with(1).await;
        let id = registry.create_job(wait_job()).await.unwrap();
        let err = registry.post_message(id, json!("hi")).await.unwrap_err();
        assert_eq!(err.kind(), JobErrorKind::MessageChannelUnavailable);
    }

    #[tokio::test]
    async fn scheduler_children_are_indexed() {
        let (registry, _, timer) = registry_with(2).await;
        let cron = "*/5 * * * * *".parse().unwrap();
        let scheduler = registry
            .create_job(JobSpec::scheduler("tick", WorkDescriptor::new("test", "echo"), cron))
            .await
            .unwrap();

        timer.fire().await;
        timer.fire().await;
        let detail = registry.get_job_detail(scheduler).await.unwrap();
        assert_eq!(detail.children.len(), 2);
        assert!(detail.children[0].title.starts_with("Child of scheduled job: tick"));

        registry.cancel_job(scheduler).await.unwrap();
        assert_eq!(timer.fire().await, 0);
        assert_eq!(registry.get_job_detail(scheduler).await.unwrap().children.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_live() {
        let (registry, _, _) = registry_with(1).await;
        let a = registry.create_job(wait_job()).await.unwrap();
        let b = registry.create_job(wait_job()).await.unwrap();
        assert_eq!(registry.shutdown().await, 2);
        for id in [a, b] {
            assert_eq!(registry.get_job(id).await.unwrap().status, JobStatus::Cancelled);
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.stats().await.active != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("aborted context never released its slot");
    }
}
