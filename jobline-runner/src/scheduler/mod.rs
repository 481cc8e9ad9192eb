mod driver;

pub use driver::{CompletedJob, JobDriver, RunError, RunFailure, RunReport, Step};
