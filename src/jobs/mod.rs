//! Jobs: records, the status state machine, the worker pool and the
//! registry that ties them together.

mod model;
mod pool;
mod record;
mod registry;
mod state;

pub use model::{
    Confirmation, Job, JobDetail, JobId, JobKind, JobResult, JobSpec, JobSummary, PoolStats,
    ResultData, WorkDescriptor,
};
pub use pool::{QueueEntry, Termination, WorkerPool};
pub use registry::JobRegistry;
pub use state::JobStatus;
