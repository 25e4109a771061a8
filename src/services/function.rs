//! Work functions and the values they return.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::execution::ExecutionContext;
use crate::jobs::{JobId, JobResult, ResultData};

/// A unit of work a thread job can execute.
///
/// Errors returned here never reach the registry as errors: they are turned
/// into a failed result carrying the error text.
#[async_trait]
pub trait JobFunction: Send + Sync {
    async fn call(&self, payload: Value, ctx: ExecutionContext) -> anyhow::Result<JobOutput>;
}

/// Successful return value of a [`JobFunction`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    /// Nothing to report beyond success.
    Empty,
    /// A plain message.
    Message(String),
    /// Structured data.
    Json(Value),
    /// A file-like payload, served back as raw bytes.
    File {
        name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl JobOutput {
    /// Final result for a job that returned this output.
    pub fn into_result(self) -> JobResult {
        let done = JobResult::new(200, "Job completed");
        match self {
            Self::Empty => done,
            Self::Message(message) => JobResult::new(200, message),
            Self::Json(value) => done.with_data(ResultData::Json(value)),
            Self::File {
                name,
                content_type,
                bytes,
            } => done
                .with_header("Content-Type", content_type)
                .with_header(
                    "Content-Disposition",
                    format!("attachment; filename=\"{name}\""),
                )
                .with_data(ResultData::Binary(bytes)),
        }
    }
}

impl From<Value> for JobOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Receives custom messages emitted by a job's execution context.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, job_id: JobId, payload: Value);
}

impl std::fmt::Debug for dyn MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageHandler")
    }
}

impl<F> MessageHandler for F
where
    F: Fn(JobId, Value) + Send + Sync,
{
    fn on_message(&self, job_id: JobId, payload: Value) {
        self(job_id, payload)
    }
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> JobFunction for FnJob<F>
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<JobOutput>> + Send + 'static,
{
    async fn call(&self, payload: Value, ctx: ExecutionContext) -> anyhow::Result<JobOutput> {
        (self.0)(payload, ctx).await
    }
}

/// Wrap an async closure as a [`JobFunction`].
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobFunction>
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JobOutput>> + Send + 'static,
{
    Arc::new(FnJob(f))
}
