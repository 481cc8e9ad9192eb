//! Work service
//!
//! The unit of work performed between marking a job IN_PROGRESS and
//! reporting its final status. What a job actually does is opaque to the
//! runner; it only learns whether the work succeeded and which details to
//! report.

use anyhow::Result;
use async_trait::async_trait;
use jobline_core::domain::job::{JobDocument, JobExecutionContext, StatusDetails};
use std::time::Duration;
use tracing::{debug, info};

/// Document key that makes [`SimulatedWork`] fail the job
pub const FAIL_KEY: &str = "simulateFailure";

/// Result of a successful unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkReport {
    /// Status details sent with the SUCCEEDED update
    pub details: StatusDetails,
}

/// Service trait for performing a job's work
#[async_trait]
pub trait WorkService: Send + Sync {
    /// Performs the work for one claimed execution
    ///
    /// # Arguments
    /// * `context` - The claimed execution
    /// * `document` - The job document delivered with the claim
    ///
    /// # Returns
    /// A report on success; an error marks the job FAILED
    async fn perform(
        &self,
        context: &JobExecutionContext,
        document: Option<&JobDocument>,
    ) -> Result<WorkReport>;
}

/// Stand-in work: waits for a fixed duration
pub struct SimulatedWork {
    duration: Duration,
}

impl SimulatedWork {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl WorkService for SimulatedWork {
    async fn perform(
        &self,
        context: &JobExecutionContext,
        document: Option<&JobDocument>,
    ) -> Result<WorkReport> {
        info!("Working on job {} for {:?}", context.job_id, self.duration);

        let fail = document
            .and_then(|doc| doc.get(FAIL_KEY))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        tokio::time::sleep(self.duration).await;

        if fail {
            anyhow::bail!("job document requested a simulated failure");
        }

        debug!("Work for job {} finished", context.job_id);

        let mut details = StatusDetails::new();
        details.insert(
            "durationMs".to_string(),
            self.duration.as_millis().to_string(),
        );
        Ok(WorkReport { details })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> JobExecutionContext {
        JobExecutionContext {
            job_id: "job-1".to_string(),
            execution_number: 1,
            version_number: 2,
        }
    }

    #[tokio::test]
    async fn test_simulated_work_reports_duration() {
        let work = SimulatedWork::new(Duration::from_millis(5));
        let report = work.perform(&context(), None).await.unwrap();
        assert_eq!(report.details.get("durationMs").map(String::as_str), Some("5"));
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let work = SimulatedWork::new(Duration::ZERO);
        let mut document = JobDocument::new();
        document.insert(FAIL_KEY.to_string(), serde_json::json!(true));

        let err = work.perform(&context(), Some(&document)).await.unwrap_err();
        assert!(err.to_string().contains("simulated failure"));
    }
}
