//! Jobline Runner
//!
//! Drives the job workflow of one thing over a pub/sub transport:
//!
//! - Configuration: thing identity, exchange and work bounds, claim policy
//! - Catalog: ordered job ids found by the pending-jobs scan
//! - Execution: local state machine of the claimed execution
//! - Services: the unit of work performed for each job
//! - Scheduler: sequences discover, describe, claim, execute and report

pub mod catalog;
pub mod config;
pub mod execution;
pub mod scheduler;
pub mod service;
pub mod shutdown;

pub use config::{ClaimMode, Config};
pub use scheduler::{CompletedJob, JobDriver, RunError, RunFailure, RunReport, Step};
