//! Error types for the job orchestrator.

use std::fmt;

use crate::jobs::JobId;
use crate::schedule::CronField;

/// Top-level error type for the orchestrator binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Discriminant for [`JobError`].
///
/// Every kind maps to a stable status code so that callers (and the HTTP
/// layer) can translate failures without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    InvalidJobType,
    MissingRequiredField,
    InvalidCronField(CronField),
    InvalidCronExpression,
    InvalidJobId,
    ParentNotFound,
    JobNotFound,
    SchedulerAlreadyRunning,
    ServiceNotFound,
    FunctionNotFound,
    JobNotPurgeable,
    MessageChannelUnavailable,
    ExecutionFailed,
}

impl JobErrorKind {
    /// Status code reported for this kind.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidJobType
            | Self::MissingRequiredField
            | Self::InvalidCronField(_)
            | Self::InvalidCronExpression
            | Self::InvalidJobId
            | Self::JobNotPurgeable => 400,
            Self::ParentNotFound
            | Self::JobNotFound
            | Self::ServiceNotFound
            | Self::FunctionNotFound => 404,
            Self::SchedulerAlreadyRunning | Self::MessageChannelUnavailable => 409,
            Self::ExecutionFailed => 500,
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidJobType => "invalid_job_type",
            Self::MissingRequiredField => "missing_required_field",
            Self::InvalidCronField(_) => "invalid_cron_field",
            Self::InvalidCronExpression => "invalid_cron_expression",
            Self::InvalidJobId => "invalid_job_id",
            Self::ParentNotFound => "parent_not_found",
            Self::JobNotFound => "job_not_found",
            Self::SchedulerAlreadyRunning => "scheduler_already_running",
            Self::ServiceNotFound => "service_not_found",
            Self::FunctionNotFound => "function_not_found",
            Self::JobNotPurgeable => "job_not_purgeable",
            Self::MessageChannelUnavailable => "message_channel_unavailable",
            Self::ExecutionFailed => "execution_failed",
        };
        write!(f, "{s}")
    }
}

/// Job orchestration error: a kind tag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    kind: JobErrorKind,
    message: String,
}

impl JobError {
    fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        self.kind
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_job_type(value: &str) -> Self {
        Self::new(
            JobErrorKind::InvalidJobType,
            format!("Invalid or missing job type: '{value}'"),
        )
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            JobErrorKind::MissingRequiredField,
            format!("Missing required field: {field}"),
        )
    }

    pub fn invalid_cron_field(field: CronField, value: &str) -> Self {
        Self::new(
            JobErrorKind::InvalidCronField(field),
            format!("Wrong {field} provided: '{value}'"),
        )
    }

    pub fn invalid_cron_expression(expression: &str) -> Self {
        Self::new(
            JobErrorKind::InvalidCronExpression,
            format!("Invalid cron expression: '{expression}'"),
        )
    }

    pub fn invalid_job_id(raw: &str) -> Self {
        Self::new(JobErrorKind::InvalidJobId, format!("Invalid job ID: '{raw}'"))
    }

    /// Accepts raw caller text as well as parsed ids.
    pub fn parent_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            JobErrorKind::ParentNotFound,
            format!("Parent job with id {id} not found"),
        )
    }

    pub fn job_not_found(id: JobId) -> Self {
        Self::new(JobErrorKind::JobNotFound, format!("Job {id} not found"))
    }

    pub fn scheduler_already_running(title: &str) -> Self {
        Self::new(
            JobErrorKind::SchedulerAlreadyRunning,
            format!("Scheduler '{title}' is already running"),
        )
    }

    pub fn service_not_found(module: &str) -> Self {
        Self::new(
            JobErrorKind::ServiceNotFound,
            format!("Service '{module}' not found"),
        )
    }

    pub fn function_not_found(module: &str, function: &str) -> Self {
        Self::new(
            JobErrorKind::FunctionNotFound,
            format!("Function '{function}' not found in service '{module}'"),
        )
    }

    pub fn not_purgeable(id: JobId, reason: &str) -> Self {
        Self::new(
            JobErrorKind::JobNotPurgeable,
            format!("Cannot clear job data for job {id}: {reason}"),
        )
    }

    pub fn channel_unavailable(id: JobId) -> Self {
        Self::new(
            JobErrorKind::MessageChannelUnavailable,
            format!("Job {id} has no open message channel"),
        )
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::ExecutionFailed, message)
    }
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        let id = JobId::new();
        assert_eq!(JobError::job_not_found(id).status(), 404);
        assert_eq!(JobError::parent_not_found(id).status(), 404);
        assert_eq!(JobError::parent_not_found("42").status(), 404);
        assert_eq!(JobError::invalid_job_id("42").status(), 400);
        assert_eq!(JobError::scheduler_already_running("t").status(), 409);
        assert_eq!(JobError::invalid_job_type("x").status(), 400);
        assert_eq!(JobError::not_purgeable(id, "queued").status(), 400);
        assert_eq!(JobError::execution_failed("boom").status(), 500);
    }

    #[test]
    fn result_alias_absorbs_config_and_io_errors() {
        fn load(raw: std::result::Result<(), ConfigError>) -> Result<()> {
            raw?;
            Ok(())
        }
        fn bind(raw: std::io::Result<()>) -> Result<()> {
            raw?;
            Ok(())
        }

        let bad = ConfigError::InvalidValue {
            key: "JOB_ORCHESTRATOR_MAX_WORKERS".into(),
            message: "must be at least 1".into(),
        };
        assert!(matches!(load(Err(bad)), Err(Error::Config(_))));
        let taken = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        assert!(matches!(bind(Err(taken)), Err(Error::Io(_))));
    }

    #[test]
    fn cron_error_names_the_field() {
        let err = JobError::invalid_cron_field(CronField::Minute, "61");
        assert_eq!(err.kind(), JobErrorKind::InvalidCronField(CronField::Minute));
        assert_eq!(err.to_string(), "Wrong minute provided: '61'");
    }

    #[test]
    fn execution_failed_keeps_message_verbatim() {
        let err = JobError::execution_failed("disk full");
        assert_eq!(err.message(), "disk full");
        assert_eq!(err.kind().to_string(), "execution_failed");
    }
}
