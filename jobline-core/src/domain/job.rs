//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Free-form job document attached to a job by whoever created it.
pub type JobDocument = HashMap<String, serde_json::Value>;

/// Key/value details reported alongside a status update.
pub type StatusDetails = HashMap<String, String>;

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
    Removed,
    Canceled,
}

impl JobStatus {
    /// Returns true once no further status updates are accepted.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }

    /// Returns true for statuses that still sit in the pending queue.
    pub fn is_pending(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Rejected => "REJECTED",
            JobStatus::Removed => "REMOVED",
            JobStatus::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// Entry of the pending-jobs scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i32>,
}

/// Full view of one job execution as held by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub job_id: String,
    pub thing_name: String,
    pub status: JobStatus,
    pub execution_number: i64,
    pub version_number: i32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub queued_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_document: Option<JobDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
}

impl JobExecution {
    /// Identity and version of this execution, as the device tracks it.
    pub fn context(&self) -> JobExecutionContext {
        JobExecutionContext {
            job_id: self.job_id.clone(),
            execution_number: self.execution_number,
            version_number: self.version_number,
        }
    }
}

/// The device's handle on the execution it currently owns.
///
/// `version_number` is the optimistic-concurrency token the next update must
/// carry as its expected version. The runner bumps it locally after each
/// accepted update, mirroring what the backend does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobExecutionContext {
    pub job_id: String,
    pub execution_number: i64,
    pub version_number: i32,
}

impl fmt::Display for JobExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (execution {}, version {})",
            self.job_id, self.execution_number, self.version_number
        )
    }
}
