//! Job driver
//!
//! Sequences the whole run for one thing:
//!
//! 1. discover pending jobs into the catalog
//! 2. describe every catalogued job, in catalog order
//! 3. for each catalogued job: claim the next execution, mark it
//!    IN_PROGRESS, perform the work, report SUCCEEDED (or FAILED)
//!
//! Every request goes through the client's correlation gate, so exchanges
//! are strictly ordered and never overlap. Any rejection or transport
//! failure ends the run; the transport is disconnected either way.

use jobline_client::{ClientError, JobsClient};
use jobline_core::domain::job::{JobStatus, StatusDetails};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::JobCatalog;
use crate::config::{ClaimMode, Config};
use crate::execution::{ClaimedJob, TransitionError};
use crate::service::WorkService;

/// Phase of the run a failure happened in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Discover,
    Describe { job_id: String },
    Claim { attempt: usize },
    Work { job_id: String },
    Update { job_id: String, status: JobStatus },
    Disconnect,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Discover => f.write_str("discovering pending jobs"),
            Step::Describe { job_id } => write!(f, "describing job {}", job_id),
            Step::Claim { attempt } => write!(f, "claiming job #{}", attempt),
            Step::Work { job_id } => write!(f, "working on job {}", job_id),
            Step::Update { job_id, status } => write!(f, "marking job {} {}", job_id, status),
            Step::Disconnect => f.write_str("disconnecting"),
        }
    }
}

/// Underlying cause of an aborted run
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("run cancelled")]
    Cancelled,
}

/// An aborted run: which step failed and why
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct RunError {
    pub step: Step,
    #[source]
    pub source: RunFailure,
}

impl RunError {
    fn new(step: Step, source: impl Into<RunFailure>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }

    /// The client error behind this failure, if any
    pub fn client_error(&self) -> Option<&ClientError> {
        match &self.source {
            RunFailure::Client(err) => Some(err),
            RunFailure::Transition(_) | RunFailure::Cancelled => None,
        }
    }
}

/// A job that reached a terminal status during the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub job_id: String,
    pub execution_number: i64,
    pub status: JobStatus,
    pub version_number: i32,
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub catalog: JobCatalog,
    pub described: usize,
    pub completed: Vec<CompletedJob>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.count(JobStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    fn count(&self, status: JobStatus) -> usize {
        self.completed.iter().filter(|job| job.status == status).count()
    }
}

/// Drives the job workflow for one thing
pub struct JobDriver {
    config: Config,
    client: JobsClient,
    work: Arc<dyn WorkService>,
}

impl JobDriver {
    pub fn new(config: Config, client: JobsClient, work: Arc<dyn WorkService>) -> Self {
        Self {
            config,
            client,
            work,
        }
    }

    /// Runs the workflow to completion and disconnects
    pub async fn run(&self) -> Result<RunReport, RunError> {
        info!(
            "Processing jobs for thing '{}' (claim mode: {})",
            self.client.thing_name(),
            self.config.claim_mode
        );

        match self.process().await {
            Ok(report) => {
                self.client
                    .disconnect()
                    .await
                    .map_err(|e| RunError::new(Step::Disconnect, e))?;
                info!(
                    "Run complete: {} succeeded, {} failed",
                    report.succeeded(),
                    report.failed()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Run aborted: {}", e);
                if let Err(disconnect_err) = self.client.disconnect().await {
                    warn!("Failed to disconnect after abort: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    async fn process(&self) -> Result<RunReport, RunError> {
        let catalog = self.discover().await?;
        let mut report = RunReport {
            catalog: catalog.clone(),
            ..Default::default()
        };

        if catalog.is_empty() {
            info!("No jobs queued, no further work to do");
            return Ok(report);
        }

        for job_id in catalog.iter() {
            self.describe(job_id).await?;
            report.described += 1;
        }

        let limit = match self.config.claim_mode {
            ClaimMode::Catalog => Some(catalog.len()),
            ClaimMode::UntilExhausted => None,
        };

        let mut attempt = 0;
        while limit.is_none_or(|limit| attempt < limit) {
            attempt += 1;

            let Some(job) = self.claim(attempt).await? else {
                info!("Nothing left to start after {} claim(s)", attempt - 1);
                break;
            };

            let completed = self.execute(job).await?;
            report.completed.push(completed);
        }

        Ok(report)
    }

    /// Scans the thing's pending jobs
    async fn discover(&self) -> Result<JobCatalog, RunError> {
        let pending = self
            .client
            .get_pending_jobs()
            .await
            .map_err(|e| RunError::new(Step::Discover, e))?;

        if pending.in_progress_jobs.is_empty() && pending.queued_jobs.is_empty() {
            info!("Pending jobs: none");
        } else {
            info!("Pending jobs:");
        }
        for job in &pending.in_progress_jobs {
            info!("  In progress: {} @ {}", job.job_id, job.last_updated_at);
        }
        for job in &pending.queued_jobs {
            info!("  Queued: {} @ {}", job.job_id, job.last_updated_at);
        }

        Ok(JobCatalog::from_pending(&pending))
    }

    /// Fetches and logs one job's detail; read-only
    async fn describe(&self, job_id: &str) -> Result<(), RunError> {
        let execution = self
            .client
            .describe_job(job_id)
            .await
            .map_err(|e| {
                RunError::new(
                    Step::Describe {
                        job_id: job_id.to_string(),
                    },
                    e,
                )
            })?;

        info!(
            "Describe job: {} version: {}",
            execution.job_id, execution.version_number
        );
        if let Some(document) = &execution.job_document {
            for (key, value) in document {
                info!("  {}: {}", key, value);
            }
        }

        Ok(())
    }

    /// Claims whatever the backend starts next
    async fn claim(&self, attempt: usize) -> Result<Option<ClaimedJob>, RunError> {
        let response = self
            .client
            .start_next_pending_job(Some(self.config.step_timeout_minutes))
            .await
            .map_err(|e| RunError::new(Step::Claim { attempt }, e))?;

        Ok(response.execution.map(|execution| {
            let job = ClaimedJob::from_execution(execution);
            info!("Start job: {}", job.context());
            job
        }))
    }

    /// Moves a claimed job through IN_PROGRESS to its terminal status
    async fn execute(&self, mut job: ClaimedJob) -> Result<CompletedJob, RunError> {
        self.transition(&mut job, JobStatus::InProgress, None)
            .await?;

        // Cancellation leaves the job IN_PROGRESS; no further update goes out
        let work = tokio::select! {
            biased;
            _ = self.client.cancellation().cancelled() => {
                warn!("Cancelled while working on job {}", job.job_id());
                return Err(RunError::new(
                    Step::Work {
                        job_id: job.job_id().to_string(),
                    },
                    RunFailure::Cancelled,
                ));
            }
            work = tokio::time::timeout(
                self.config.job_timeout,
                self.work.perform(job.context(), job.document()),
            ) => work,
        };

        let (status, details) = match work {
            Ok(Ok(report)) => (JobStatus::Succeeded, report.details),
            Ok(Err(e)) => {
                warn!("Work for job {} failed: {:#}", job.job_id(), e);
                (JobStatus::Failed, failure_details(format!("{:#}", e)))
            }
            Err(_) => {
                warn!(
                    "Work for job {} exceeded {:?}",
                    job.job_id(),
                    self.config.job_timeout
                );
                (
                    JobStatus::Failed,
                    failure_details(format!("timed out after {:?}", self.config.job_timeout)),
                )
            }
        };

        self.transition(&mut job, status, Some(details)).await?;

        let context = job.context();
        Ok(CompletedJob {
            job_id: context.job_id.clone(),
            execution_number: context.execution_number,
            status,
            version_number: context.version_number,
        })
    }

    /// One update exchange; bumps the local version once accepted
    async fn transition(
        &self,
        job: &mut ClaimedJob,
        status: JobStatus,
        details: Option<StatusDetails>,
    ) -> Result<(), RunError> {
        let step = Step::Update {
            job_id: job.job_id().to_string(),
            status,
        };

        let request = job
            .update_request(status, details)
            .map_err(|e| RunError::new(step.clone(), e))?;

        debug!(
            "Updating job {} to {} (expected version {})",
            job.job_id(),
            status,
            request.expected_version
        );

        self.client
            .update_job_execution(job.job_id(), request)
            .await
            .map_err(|e| RunError::new(step.clone(), e))?;

        job.record_accepted(status)
            .map_err(|e| RunError::new(step, e))?;

        info!("Marked job {} {}", job.job_id(), status);
        Ok(())
    }
}

fn failure_details(reason: String) -> StatusDetails {
    let mut details = StatusDetails::new();
    details.insert("reason".to_string(), reason);
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobline_client::TransportError;
    use jobline_core::domain::rejection::{RejectedError, RejectedErrorCode};

    #[test]
    fn test_run_error_names_the_step() {
        let err = RunError::new(
            Step::Update {
                job_id: "job-1".to_string(),
                status: JobStatus::Succeeded,
            },
            ClientError::Rejected(RejectedError::new(
                RejectedErrorCode::VersionMismatch,
                "expected version 3",
            )),
        );

        assert_eq!(
            err.to_string(),
            "marking job job-1 SUCCEEDED failed: Request rejected: VersionMismatch: expected version 3"
        );
        assert!(err.client_error().unwrap().is_retryable());
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::Claim { attempt: 2 }.to_string(), "claiming job #2");
        let cancelled = RunError::new(
            Step::Work {
                job_id: "job-1".to_string(),
            },
            RunFailure::Cancelled,
        );
        assert_eq!(cancelled.to_string(), "working on job job-1 failed: run cancelled");
        assert!(cancelled.client_error().is_none());
        let err = RunError::new(Step::Discover, ClientError::from(TransportError::Disconnected));
        assert_eq!(
            err.to_string(),
            "discovering pending jobs failed: Transport failure: Transport is disconnected"
        );
    }

    #[test]
    fn test_report_counts() {
        let job = |id: &str, status| CompletedJob {
            job_id: id.to_string(),
            execution_number: 1,
            status,
            version_number: 3,
        };
        let report = RunReport {
            completed: vec![
                job("a", JobStatus::Succeeded),
                job("b", JobStatus::Failed),
                job("c", JobStatus::Succeeded),
            ],
            ..Default::default()
        };

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
    }
}
