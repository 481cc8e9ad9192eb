//! Job store
//!
//! Authoritative, in-memory state of a thing's job executions. Every
//! operation either succeeds or returns the [`RejectedError`] the backend
//! publishes on the matching `rejected` topic.

use chrono::{DateTime, Utc};
use jobline_core::domain::job::{JobDocument, JobExecution, JobStatus, JobSummary, StatusDetails};
use jobline_core::domain::rejection::{ExecutionState, RejectedError, RejectedErrorCode};
use jobline_core::dto::job::{
    DescribeJobExecutionRequest, GetPendingJobExecutionsResponse, StartNextJobExecutionResponse,
    StartNextPendingJobExecutionRequest, UpdateJobExecutionRequest, UpdateJobExecutionResponse,
};
use jobline_core::topics::is_valid_job_id;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct JobRecord {
    job_id: String,
    document: Option<JobDocument>,
    status: JobStatus,
    execution_number: i64,
    version_number: i32,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    last_updated_at: DateTime<Utc>,
    status_details: Option<StatusDetails>,
    step_timeout_in_minutes: Option<i64>,
}

impl JobRecord {
    fn execution(&self, thing_name: &str, include_document: bool) -> JobExecution {
        JobExecution {
            job_id: self.job_id.clone(),
            thing_name: thing_name.to_string(),
            status: self.status,
            execution_number: self.execution_number,
            version_number: self.version_number,
            queued_at: self.queued_at,
            started_at: self.started_at,
            last_updated_at: self.last_updated_at,
            job_document: if include_document {
                self.document.clone()
            } else {
                None
            },
            status_details: self.status_details.clone(),
        }
    }

    fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            last_updated_at: self.last_updated_at,
            queued_at: self.queued_at,
            execution_number: Some(self.execution_number),
            version_number: Some(self.version_number),
        }
    }

    fn state(&self) -> ExecutionState {
        ExecutionState {
            status: self.status,
            version_number: self.version_number,
            status_details: self.status_details.clone(),
        }
    }
}

struct StoreInner {
    jobs: Vec<JobRecord>,
    next_execution_number: i64,
}

/// In-memory job executions of one thing, in queue order
pub struct JobStore {
    thing_name: String,
    inner: Mutex<StoreInner>,
}

impl JobStore {
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            inner: Mutex::new(StoreInner {
                jobs: Vec::new(),
                next_execution_number: 1,
            }),
        }
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a new job execution (version 1)
    pub fn add_job(
        &self,
        job_id: impl Into<String>,
        document: Option<JobDocument>,
    ) -> Result<JobExecution, RejectedError> {
        let job_id = job_id.into();
        if !is_valid_job_id(&job_id) {
            return Err(RejectedError::new(
                RejectedErrorCode::InvalidRequest,
                format!("'{}' is not a valid job id", job_id),
            ));
        }

        let mut inner = self.lock();
        if inner.jobs.iter().any(|job| job.job_id == job_id) {
            return Err(RejectedError::new(
                RejectedErrorCode::InvalidRequest,
                format!("Job {} already exists", job_id),
            ));
        }

        let now = Utc::now();
        let record = JobRecord {
            job_id,
            document,
            status: JobStatus::Queued,
            execution_number: inner.next_execution_number,
            version_number: 1,
            queued_at: now,
            started_at: None,
            last_updated_at: now,
            status_details: None,
            step_timeout_in_minutes: None,
        };
        inner.next_execution_number += 1;

        tracing::info!(
            "Job queued: {} (execution {})",
            record.job_id,
            record.execution_number
        );

        let execution = record.execution(&self.thing_name, true);
        inner.jobs.push(record);
        Ok(execution)
    }

    /// Pending executions: in progress first, then queued, each in queue order
    pub fn pending(&self) -> GetPendingJobExecutionsResponse {
        let inner = self.lock();
        let by_status = |status: JobStatus| -> Vec<JobSummary> {
            inner
                .jobs
                .iter()
                .filter(|job| job.status == status)
                .map(JobRecord::summary)
                .collect()
        };

        GetPendingJobExecutionsResponse {
            in_progress_jobs: by_status(JobStatus::InProgress),
            queued_jobs: by_status(JobStatus::Queued),
            timestamp: Some(Utc::now()),
            client_token: None,
        }
    }

    /// Describes one execution
    pub fn describe(
        &self,
        job_id: &str,
        req: &DescribeJobExecutionRequest,
    ) -> Result<JobExecution, RejectedError> {
        let inner = self.lock();
        let record = find(&inner.jobs, job_id)?;

        if let Some(number) = req.execution_number {
            if number != record.execution_number {
                return Err(not_found(format!(
                    "Job {} has no execution {}",
                    job_id, number
                )));
            }
        }

        Ok(record.execution(&self.thing_name, req.include_job_document))
    }

    /// Starts the next pending execution
    ///
    /// An execution already in progress is handed out again; otherwise the
    /// oldest queued one moves to IN_PROGRESS. Starting does not change the
    /// version.
    pub fn start_next(&self, req: &StartNextPendingJobExecutionRequest) -> StartNextJobExecutionResponse {
        let mut inner = self.lock();
        let now = Utc::now();

        let next = inner
            .jobs
            .iter()
            .position(|job| job.status == JobStatus::InProgress)
            .or_else(|| {
                inner
                    .jobs
                    .iter()
                    .position(|job| job.status == JobStatus::Queued)
            });

        let execution = next.map(|idx| {
            let record = &mut inner.jobs[idx];
            if record.status == JobStatus::Queued {
                record.status = JobStatus::InProgress;
                record.started_at = Some(now);
                record.last_updated_at = now;
                tracing::info!("Job {} started", record.job_id);
            }
            if req.status_details.is_some() {
                record.status_details = req.status_details.clone();
            }
            record.step_timeout_in_minutes = req.step_timeout_in_minutes;
            record.execution(&self.thing_name, true)
        });

        StartNextJobExecutionResponse {
            execution,
            timestamp: Some(now),
            client_token: None,
        }
    }

    /// Applies a status update reported by the device
    pub fn update(
        &self,
        job_id: &str,
        req: &UpdateJobExecutionRequest,
    ) -> Result<UpdateJobExecutionResponse, RejectedError> {
        let mut inner = self.lock();
        let idx = inner
            .jobs
            .iter()
            .position(|job| job.job_id == job_id)
            .ok_or_else(|| not_found(format!("Job {} not found", job_id)))?;
        let record = &mut inner.jobs[idx];

        if record.status.is_terminal() {
            return Err(RejectedError::new(
                RejectedErrorCode::TerminalStateReached,
                format!("Job {} is already {}", job_id, record.status),
            )
            .with_execution_state(record.state()));
        }

        if let Some(number) = req.execution_number {
            if number != record.execution_number {
                return Err(not_found(format!(
                    "Job {} has no execution {}",
                    job_id, number
                )));
            }
        }

        if req.expected_version != record.version_number {
            return Err(RejectedError::new(
                RejectedErrorCode::VersionMismatch,
                format!(
                    "Expected version {} but job {} is at version {}",
                    req.expected_version, job_id, record.version_number
                ),
            )
            .with_execution_state(record.state()));
        }

        validate_reported_status(req.status)?;

        let now = Utc::now();
        if record.started_at.is_none() {
            record.started_at = Some(now);
        }
        record.status = req.status;
        record.version_number += 1;
        record.last_updated_at = now;
        if req.status_details.is_some() {
            record.status_details = req.status_details.clone();
        }
        if req.step_timeout_in_minutes.is_some() {
            record.step_timeout_in_minutes = req.step_timeout_in_minutes;
        }

        tracing::info!(
            "Job {} updated to {} (version {})",
            job_id,
            record.status,
            record.version_number
        );

        Ok(UpdateJobExecutionResponse {
            execution_state: req.include_job_execution_state.then(|| record.state()),
            job_document: if req.include_job_document {
                record.document.clone()
            } else {
                None
            },
            timestamp: Some(now),
            client_token: None,
        })
    }

    /// Cancels a pending execution from the backend side
    pub fn cancel_job(&self, job_id: &str) -> Result<(), RejectedError> {
        let mut inner = self.lock();
        let idx = inner
            .jobs
            .iter()
            .position(|job| job.job_id == job_id)
            .ok_or_else(|| not_found(format!("Job {} not found", job_id)))?;
        let record = &mut inner.jobs[idx];

        if !record.status.is_pending() {
            return Err(RejectedError::new(
                RejectedErrorCode::InvalidStateTransition,
                format!("Cannot cancel job {} in state {}", job_id, record.status),
            ));
        }

        record.status = JobStatus::Canceled;
        record.version_number += 1;
        record.last_updated_at = Utc::now();
        tracing::info!("Job {} cancelled", job_id);
        Ok(())
    }

    /// Snapshot of one execution
    pub fn job(&self, job_id: &str) -> Option<JobExecution> {
        let inner = self.lock();
        inner
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .map(|job| job.execution(&self.thing_name, true))
    }

    /// Step timeout last requested for an execution, in minutes
    pub fn step_timeout(&self, job_id: &str) -> Option<i64> {
        let inner = self.lock();
        inner
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .and_then(|job| job.step_timeout_in_minutes)
    }
}

fn find<'a>(jobs: &'a [JobRecord], job_id: &str) -> Result<&'a JobRecord, RejectedError> {
    jobs.iter()
        .find(|job| job.job_id == job_id)
        .ok_or_else(|| not_found(format!("Job {} not found", job_id)))
}

fn not_found(message: String) -> RejectedError {
    RejectedError::new(RejectedErrorCode::ResourceNotFound, message)
}

// =============================================================================
// Validation
// =============================================================================

/// Statuses a device may report for its own execution
fn validate_reported_status(status: JobStatus) -> Result<(), RejectedError> {
    match status {
        JobStatus::InProgress | JobStatus::Succeeded | JobStatus::Failed | JobStatus::Rejected => {
            Ok(())
        }
        _ => Err(RejectedError::new(
            RejectedErrorCode::InvalidStateTransition,
            format!("A device cannot report status {}", status),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(jobs: &[&str]) -> JobStore {
        let store = JobStore::new("dev-1");
        for job in jobs {
            store.add_job(*job, None).unwrap();
        }
        store
    }

    #[test]
    fn test_validate_reported_status() {
        assert!(validate_reported_status(JobStatus::InProgress).is_ok());
        assert!(validate_reported_status(JobStatus::Succeeded).is_ok());
        assert!(validate_reported_status(JobStatus::Failed).is_ok());
        assert!(validate_reported_status(JobStatus::Queued).is_err());
        assert!(validate_reported_status(JobStatus::Canceled).is_err());
    }

    #[test]
    fn test_pending_lists_in_progress_first() {
        let store = store_with(&["a", "b", "c"]);
        store.start_next(&Default::default());

        let pending = store.pending();
        let in_progress: Vec<_> = pending.in_progress_jobs.iter().map(|j| j.job_id.as_str()).collect();
        let queued: Vec<_> = pending.queued_jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(in_progress, vec!["a"]);
        assert_eq!(queued, vec!["b", "c"]);
    }

    #[test]
    fn test_start_next_prefers_in_progress_and_keeps_version() {
        let store = store_with(&["a", "b"]);

        let first = store.start_next(&Default::default()).execution.unwrap();
        assert_eq!(first.job_id, "a");
        assert_eq!(first.status, JobStatus::InProgress);
        assert_eq!(first.version_number, 1);

        let again = store.start_next(&Default::default()).execution.unwrap();
        assert_eq!(again.job_id, "a");
    }

    #[test]
    fn test_start_next_with_nothing_pending() {
        let store = JobStore::new("dev-1");
        assert!(store.start_next(&Default::default()).execution.is_none());
    }

    #[test]
    fn test_update_bumps_version() {
        let store = store_with(&["a"]);
        store.start_next(&Default::default());

        store
            .update("a", &UpdateJobExecutionRequest::new(JobStatus::InProgress, 1))
            .unwrap();
        store
            .update("a", &UpdateJobExecutionRequest::new(JobStatus::Succeeded, 2))
            .unwrap();

        let job = store.job("a").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.version_number, 3);
    }

    #[test]
    fn test_update_with_stale_version_is_rejected() {
        let store = store_with(&["a"]);

        let err = store
            .update("a", &UpdateJobExecutionRequest::new(JobStatus::InProgress, 4))
            .unwrap_err();
        assert_eq!(err.code, RejectedErrorCode::VersionMismatch);
        assert_eq!(err.execution_state.unwrap().version_number, 1);
    }

    #[test]
    fn test_update_after_terminal_state() {
        let store = store_with(&["a"]);
        store
            .update("a", &UpdateJobExecutionRequest::new(JobStatus::Succeeded, 1))
            .unwrap();

        let err = store
            .update("a", &UpdateJobExecutionRequest::new(JobStatus::Failed, 2))
            .unwrap_err();
        assert_eq!(err.code, RejectedErrorCode::TerminalStateReached);
    }

    #[test]
    fn test_update_unknown_job() {
        let store = JobStore::new("dev-1");
        let err = store
            .update("nope", &UpdateJobExecutionRequest::new(JobStatus::InProgress, 1))
            .unwrap_err();
        assert_eq!(err.code, RejectedErrorCode::ResourceNotFound);
    }

    #[test]
    fn test_describe_respects_document_flag() {
        let store = JobStore::new("dev-1");
        let mut document = JobDocument::new();
        document.insert("operation".to_string(), serde_json::json!("reboot"));
        store.add_job("a", Some(document)).unwrap();

        let with_doc = store
            .describe(
                "a",
                &DescribeJobExecutionRequest {
                    include_job_document: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            with_doc.job_document.unwrap()["operation"],
            serde_json::json!("reboot")
        );

        let without_doc = store.describe("a", &Default::default()).unwrap();
        assert!(without_doc.job_document.is_none());
    }

    #[test]
    fn test_cancel_removes_job_from_pending() {
        let store = store_with(&["a", "b"]);
        store.cancel_job("a").unwrap();

        let pending = store.pending();
        assert!(pending.in_progress_jobs.is_empty());
        assert_eq!(pending.queued_jobs.len(), 1);
        assert!(store.cancel_job("a").is_err());
    }

    #[test]
    fn test_duplicate_job_id_is_refused() {
        let store = store_with(&["a"]);
        assert!(store.add_job("a", None).is_err());
        assert!(store.add_job("bad/id", None).is_err());
    }
}
