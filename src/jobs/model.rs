//! Job data model: identifiers, work descriptors, results and read snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::state::JobStatus;
use crate::schedule::CronSpec;
use crate::services::MessageHandler;

/// Unique, time-ordered job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of job. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Runs once in its own execution context.
    Thread,
    /// Spawns a thread job on every cron fire.
    Scheduler,
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "scheduler" => Ok(Self::Scheduler),
            _ => Err(JobError::invalid_job_type(s)),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Thread => "thread",
            Self::Scheduler => "scheduler",
        };
        write!(f, "{s}")
    }
}

/// What to execute: a function of a registered service plus its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    pub module: String,
    pub function: String,
    #[serde(default)]
    pub payload: Value,
}

impl WorkDescriptor {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Result body data: structured JSON, or raw bytes for file-like results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "snake_case")]
pub enum ResultData {
    Json(Value),
    Binary(Vec<u8>),
}

/// HTTP-style result of a job: status code, message, optional headers and data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultData>,
}

impl JobResult {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            headers: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: ResultData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Overlay `patch` onto this result. Fields absent from the patch keep
    /// their current value.
    pub fn merge(&mut self, patch: JobResult) {
        self.status = patch.status;
        if patch.message.is_some() {
            self.message = patch.message;
        }
        if patch.headers.is_some() {
            self.headers = patch.headers;
        }
        if patch.data.is_some() {
            self.data = patch.data;
        }
    }
}

/// Status-coded acknowledgement returned by mutating registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub status: u16,
    pub message: String,
}

impl Confirmation {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: 200,
            message: message.into(),
        }
    }
}

/// Read-only copy of a job record.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub parent_id: Option<JobId>,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub result: JobResult,
    pub work: WorkDescriptor,
    pub cron: Option<CronSpec>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One-line view of a job, as listed under its parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,
}

/// A job together with its direct children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: JobSummary,
    pub children: Vec<JobSummary>,
}

/// Worker pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub pending: usize,
    pub jobs: usize,
}

/// Request to create a job.
#[derive(Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub title: String,
    pub work: WorkDescriptor,
    pub description: Option<String>,
    pub parent_id: Option<JobId>,
    pub cron: Option<CronSpec>,
    pub handler: Option<Arc<dyn MessageHandler>>,
}

impl JobSpec {
    pub fn new(kind: JobKind, title: impl Into<String>, work: WorkDescriptor) -> Self {
        Self {
            kind,
            title: title.into(),
            work,
            description: None,
            parent_id: None,
            cron: None,
            handler: None,
        }
    }

    pub fn thread(title: impl Into<String>, work: WorkDescriptor) -> Self {
        Self::new(JobKind::Thread, title, work)
    }

    pub fn scheduler(title: impl Into<String>, work: WorkDescriptor, cron: CronSpec) -> Self {
        Self::new(JobKind::Scheduler, title, work).with_cron(cron)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent_id: JobId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_cron(mut self, cron: CronSpec) -> Self {
        self.cron = Some(cron);
        self
    }

    /// Route custom messages from the job's execution context to `handler`.
    /// A scheduler passes its handler on to every child it spawns.
    pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Check that every field the kind requires is present.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.title.trim().is_empty() {
            return Err(JobError::missing_field("title"));
        }
        if self.work.module.trim().is_empty() {
            return Err(JobError::missing_field("module"));
        }
        if self.work.function.trim().is_empty() {
            return Err(JobError::missing_field("function"));
        }
        if self.kind == JobKind::Scheduler && self.cron.is_none() {
            return Err(JobError::missing_field("cron"));
        }
        Ok(())
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("work", &self.work)
            .field("parent_id", &self.parent_id)
            .field("cron", &self.cron)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}
