//! Job status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a free worker slot.
    Queued,
    /// Executing, or (for schedulers) armed.
    Running,
    /// Finished with a success result.
    Completed,
    /// Finished with an error result, or exited without one.
    Failed,
    /// Stopped by a cancel request.
    Cancelled,
}

impl JobStatus {
    /// Status code reported alongside this status.
    pub fn code(&self) -> u16 {
        match self {
            Self::Queued | Self::Running => 202,
            Self::Completed => 200,
            Self::Failed => 500,
            Self::Cancelled => 499,
        }
    }

    /// Status implied by a result code, if it moves the job at all.
    ///
    /// 202 is a progress report and leaves the status alone; any other 2xx
    /// completes the job; 3xx and above fail it.
    pub fn from_result_code(code: u16) -> Option<Self> {
        match code {
            202 => None,
            200..=299 => Some(Self::Completed),
            c if c >= 300 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Running) | (Queued, Cancelled) | (Queued, Failed) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for target in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn queued_cannot_complete_without_running() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn result_codes_map_to_statuses() {
        assert_eq!(JobStatus::from_result_code(202), None);
        assert_eq!(JobStatus::from_result_code(200), Some(JobStatus::Completed));
        assert_eq!(JobStatus::from_result_code(204), Some(JobStatus::Completed));
        assert_eq!(JobStatus::from_result_code(302), Some(JobStatus::Failed));
        assert_eq!(JobStatus::from_result_code(500), Some(JobStatus::Failed));
        assert_eq!(JobStatus::from_result_code(100), None);
    }

    #[test]
    fn codes_and_names() {
        assert_eq!(JobStatus::Cancelled.code(), 499);
        assert_eq!(JobStatus::Queued.code(), 202);
        assert_eq!(JobStatus::Running.to_string(), "running");
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
