//! Job catalog
//!
//! Ordered job ids found by the pending-jobs scan. Built once at startup;
//! in-progress jobs come before queued ones and each group keeps the order
//! the backend listed it in.

use jobline_core::dto::job::GetPendingJobExecutionsResponse;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCatalog {
    job_ids: Vec<String>,
}

impl JobCatalog {
    /// Builds the catalog from an accepted pending-jobs response
    pub fn from_pending(response: &GetPendingJobExecutionsResponse) -> Self {
        let job_ids = response
            .in_progress_jobs
            .iter()
            .chain(response.queued_jobs.iter())
            .map(|summary| summary.job_id.clone())
            .collect();

        Self { job_ids }
    }

    pub fn len(&self) -> usize {
        self.job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.job_ids.iter().map(String::as_str)
    }

    pub fn job_ids(&self) -> &[String] {
        &self.job_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobline_core::domain::job::JobSummary;

    fn summary(job_id: &str) -> JobSummary {
        JobSummary {
            job_id: job_id.to_string(),
            last_updated_at: Utc::now(),
            queued_at: Utc::now(),
            execution_number: None,
            version_number: None,
        }
    }

    #[test]
    fn test_in_progress_jobs_come_first() {
        let response = GetPendingJobExecutionsResponse {
            in_progress_jobs: vec![summary("B"), summary("C")],
            queued_jobs: vec![summary("A")],
            ..Default::default()
        };

        let catalog = JobCatalog::from_pending(&response);
        assert_eq!(catalog.job_ids(), ["B", "C", "A"]);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_empty_response_gives_empty_catalog() {
        let catalog = JobCatalog::from_pending(&GetPendingJobExecutionsResponse::default());
        assert!(catalog.is_empty());
        assert_eq!(catalog.iter().count(), 0);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let response = GetPendingJobExecutionsResponse {
            in_progress_jobs: vec![summary("A")],
            queued_jobs: vec![summary("A")],
            ..Default::default()
        };

        let catalog = JobCatalog::from_pending(&response);
        assert_eq!(catalog.iter().collect::<Vec<_>>(), vec!["A", "A"]);
    }
}
