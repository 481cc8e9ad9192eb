//! Jobline simulated jobs backend
//!
//! An in-memory stand-in for the remote jobs service. It answers the same
//! topic protocol the device speaks, enforcing execution versions and
//! status transitions, so the runner can be exercised without a network.
//!
//! - [`store`]: authoritative job state and its rules
//! - [`service`]: wiring of the store onto the request topics

pub mod service;
pub mod store;

pub use service::JobsService;
pub use store::JobStore;

use jobline_core::domain::job::JobDocument;
use jobline_core::domain::rejection::RejectedError;

/// Queues `count` demo jobs named `job-1`, `job-2`, ...
///
/// Each carries a small document so describe output has something to show.
pub fn seed_demo_jobs(store: &JobStore, count: usize) -> Result<Vec<String>, RejectedError> {
    (1..=count)
        .map(|n| {
            let job_id = format!("job-{}", n);
            let mut document = JobDocument::new();
            document.insert("operation".to_string(), serde_json::json!("demo"));
            document.insert("sequence".to_string(), serde_json::json!(n));
            store.add_job(job_id.clone(), Some(document))?;
            Ok(job_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_demo_jobs() {
        let store = JobStore::new("dev-1");
        let ids = seed_demo_jobs(&store, 3).unwrap();
        assert_eq!(ids, vec!["job-1", "job-2", "job-3"]);

        let job = store.job("job-2").unwrap();
        assert_eq!(job.job_document.unwrap()["sequence"], serde_json::json!(2));
        assert_eq!(store.pending().queued_jobs.len(), 3);
    }
}
