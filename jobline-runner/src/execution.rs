//! Job execution state machine
//!
//! Tracks the one execution the runner owns, from the moment a claim is
//! accepted until it reaches a terminal status:
//!
//! ```text
//! CLAIMED --IN_PROGRESS--> IN_PROGRESS --SUCCEEDED--> SUCCEEDED
//!                                      \--FAILED----> FAILED
//! ```
//!
//! Each accepted update bumps the local version by one so the next update
//! carries the version the backend now holds.

use jobline_core::domain::job::{
    JobDocument, JobExecution, JobExecutionContext, JobStatus, StatusDetails,
};
use jobline_core::dto::job::UpdateJobExecutionRequest;
use std::fmt;
use thiserror::Error;

/// Local phase of a claimed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Claimed,
    InProgress,
    Succeeded,
    Failed,
}

impl Phase {
    fn after(self, status: JobStatus) -> Option<Phase> {
        match (self, status) {
            (Phase::Claimed, JobStatus::InProgress) => Some(Phase::InProgress),
            (Phase::InProgress, JobStatus::Succeeded) => Some(Phase::Succeeded),
            (Phase::InProgress, JobStatus::Failed) => Some(Phase::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Claimed => "CLAIMED",
            Phase::InProgress => "IN_PROGRESS",
            Phase::Succeeded => "SUCCEEDED",
            Phase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Local invariant violations of the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot move job {job_id} from {from} to {to}")]
    Illegal {
        job_id: String,
        from: Phase,
        to: JobStatus,
    },

    #[error("version of job {0} overflowed")]
    VersionOverflow(String),
}

/// The execution currently owned by the runner
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    context: JobExecutionContext,
    phase: Phase,
    document: Option<JobDocument>,
}

impl ClaimedJob {
    /// Seeds the state machine from an accepted claim
    pub fn from_execution(execution: JobExecution) -> Self {
        Self {
            context: execution.context(),
            phase: Phase::Claimed,
            document: execution.job_document,
        }
    }

    pub fn context(&self) -> &JobExecutionContext {
        &self.context
    }

    pub fn job_id(&self) -> &str {
        &self.context.job_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn document(&self) -> Option<&JobDocument> {
        self.document.as_ref()
    }

    /// Builds the update request moving the execution to `status`
    pub fn update_request(
        &self,
        status: JobStatus,
        details: Option<StatusDetails>,
    ) -> Result<UpdateJobExecutionRequest, TransitionError> {
        self.next_phase(status)?;

        let mut request = UpdateJobExecutionRequest::new(status, self.context.version_number);
        request.execution_number = Some(self.context.execution_number);
        request.status_details = details.filter(|d| !d.is_empty());
        Ok(request)
    }

    /// Records that the backend accepted the move to `status`
    pub fn record_accepted(&mut self, status: JobStatus) -> Result<(), TransitionError> {
        let next = self.next_phase(status)?;
        self.context.version_number = self
            .context
            .version_number
            .checked_add(1)
            .ok_or_else(|| TransitionError::VersionOverflow(self.context.job_id.clone()))?;
        self.phase = next;
        Ok(())
    }

    fn next_phase(&self, status: JobStatus) -> Result<Phase, TransitionError> {
        self.phase.after(status).ok_or_else(|| TransitionError::Illegal {
            job_id: self.context.job_id.clone(),
            from: self.phase,
            to: status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claimed(version: i32) -> ClaimedJob {
        ClaimedJob::from_execution(JobExecution {
            job_id: "job-1".to_string(),
            thing_name: "dev-1".to_string(),
            status: JobStatus::InProgress,
            execution_number: 7,
            version_number: version,
            queued_at: Utc::now(),
            started_at: None,
            last_updated_at: Utc::now(),
            job_document: None,
            status_details: None,
        })
    }

    #[test]
    fn test_versions_follow_accepted_updates() {
        let mut job = claimed(1);
        assert_eq!(job.phase(), Phase::Claimed);

        let first = job.update_request(JobStatus::InProgress, None).unwrap();
        assert_eq!(first.expected_version, 1);
        assert_eq!(first.execution_number, Some(7));
        job.record_accepted(JobStatus::InProgress).unwrap();

        let second = job.update_request(JobStatus::Succeeded, None).unwrap();
        assert_eq!(second.expected_version, 2);
        job.record_accepted(JobStatus::Succeeded).unwrap();

        assert_eq!(job.phase(), Phase::Succeeded);
        assert!(job.phase().is_terminal());
        assert_eq!(job.context().version_number, 3);
    }

    #[test]
    fn test_cannot_skip_in_progress() {
        let job = claimed(1);
        let err = job.update_request(JobStatus::Succeeded, None).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                job_id: "job-1".to_string(),
                from: Phase::Claimed,
                to: JobStatus::Succeeded,
            }
        );
    }

    #[test]
    fn test_no_updates_after_terminal_phase() {
        let mut job = claimed(1);
        job.record_accepted(JobStatus::InProgress).unwrap();
        job.record_accepted(JobStatus::Failed).unwrap();

        assert!(job.update_request(JobStatus::Succeeded, None).is_err());
        assert!(job.record_accepted(JobStatus::InProgress).is_err());
        assert_eq!(job.context().version_number, 3);
    }

    #[test]
    fn test_version_overflow_is_detected() {
        let mut job = claimed(i32::MAX);
        let err = job.record_accepted(JobStatus::InProgress).unwrap_err();
        assert_eq!(err, TransitionError::VersionOverflow("job-1".to_string()));
        assert_eq!(job.phase(), Phase::Claimed);
    }

    #[test]
    fn test_empty_details_are_omitted() {
        let mut job = claimed(1);
        job.record_accepted(JobStatus::InProgress).unwrap();

        let request = job
            .update_request(JobStatus::Failed, Some(StatusDetails::new()))
            .unwrap();
        assert!(request.status_details.is_none());
    }
}
