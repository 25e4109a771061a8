//! Messages that cross the boundary between the registry and an execution
//! context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;
use crate::jobs::{JobId, JobResult, ResultData};
use crate::services::JobOutput;

/// Which protocol a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Progress and results, merged into the job's result by the registry.
    Default,
    /// Application traffic, passed through uninterpreted.
    Custom,
}

/// Body of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Default(JobResult),
    Custom(Value),
}

/// One message, addressed to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub job_id: JobId,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// In-progress report carrying `data`.
    pub fn progress(job_id: JobId, data: Value) -> Self {
        Self::default_kind(
            job_id,
            JobResult::new(202, "Job is in progress").with_data(ResultData::Json(data)),
        )
    }

    /// Final report for a function that returned `output`.
    pub fn completed(job_id: JobId, output: JobOutput) -> Self {
        Self::default_kind(job_id, output.into_result())
    }

    /// Final report for a function that failed.
    pub fn failed(job_id: JobId, error: &JobError) -> Self {
        Self::default_kind(job_id, JobResult::new(error.status(), error.message()))
    }

    pub fn custom(job_id: JobId, payload: Value) -> Self {
        Self {
            job_id,
            message: Message::Custom(payload),
        }
    }

    fn default_kind(job_id: JobId, result: JobResult) -> Self {
        Self {
            job_id,
            message: Message::Default(result),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.message {
            Message::Default(_) => MessageKind::Default,
            Message::Custom(_) => MessageKind::Custom,
        }
    }
}
