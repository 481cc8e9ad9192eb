//! Topic layout for a thing's job channels
//!
//! Every operation has a request topic and a pair of response topics:
//! `<request>/accepted` and `<request>/rejected`.

/// Response channel of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    fn suffix(self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Topics for one job operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTopics {
    pub request: String,
    pub accepted: String,
    pub rejected: String,
}

impl OperationTopics {
    fn new(request: String) -> Self {
        Self {
            accepted: format!("{}/{}", request, Outcome::Accepted.suffix()),
            rejected: format!("{}/{}", request, Outcome::Rejected.suffix()),
            request,
        }
    }

    pub fn response(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Accepted => &self.accepted,
            Outcome::Rejected => &self.rejected,
        }
    }
}

/// Topic builder scoped to one thing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTopics {
    base: String,
}

impl JobTopics {
    pub fn new(thing_name: &str) -> Self {
        Self {
            base: format!("things/{}/jobs", thing_name),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn get_pending(&self) -> OperationTopics {
        OperationTopics::new(format!("{}/get-pending", self.base))
    }

    pub fn describe(&self, job_id: &str) -> OperationTopics {
        OperationTopics::new(format!("{}/{}/get", self.base, job_id))
    }

    pub fn start_next(&self) -> OperationTopics {
        OperationTopics::new(format!("{}/start-next", self.base))
    }

    pub fn update(&self, job_id: &str) -> OperationTopics {
        OperationTopics::new(format!("{}/{}/update", self.base, job_id))
    }

    /// Filter matching every describe request of the thing
    pub fn describe_requests(&self) -> String {
        format!("{}/+/get", self.base)
    }

    /// Filter matching every update request of the thing
    pub fn update_requests(&self) -> String {
        format!("{}/+/update", self.base)
    }

    /// Extracts the job id from a per-job request topic
    /// (`{base}/{jobId}/get` or `{base}/{jobId}/update`).
    pub fn job_id_of<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let (job_id, _) = rest.split_once('/')?;
        if job_id.is_empty() {
            None
        } else {
            Some(job_id)
        }
    }
}

/// Checks a job id for use as a topic level
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 64
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = JobTopics::new("device-1");

        assert_eq!(
            topics.get_pending().accepted,
            "things/device-1/jobs/get-pending/accepted"
        );
        assert_eq!(
            topics.describe("job-1").rejected,
            "things/device-1/jobs/job-1/get/rejected"
        );
        assert_eq!(topics.start_next().request, "things/device-1/jobs/start-next");
        assert_eq!(
            topics.update("job-1").response(Outcome::Accepted),
            "things/device-1/jobs/job-1/update/accepted"
        );
    }

    #[test]
    fn test_job_id_of() {
        let topics = JobTopics::new("device-1");
        assert_eq!(
            topics.job_id_of("things/device-1/jobs/job-7/update"),
            Some("job-7")
        );
        assert_eq!(topics.job_id_of("things/device-1/jobs/start-next"), None);
        assert_eq!(topics.job_id_of("things/other/jobs/job-7/get"), None);
    }

    #[test]
    fn test_job_id_validation() {
        assert!(is_valid_job_id("job-1_a"));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("a/b"));
        assert!(!is_valid_job_id("+"));
    }
}
