//! Service layer
//!
//! Services hold the runner's business logic that is independent of the
//! job protocol. Currently this is the unit of work performed for a job.
//!
//! All services are trait-based to enable testing and dependency injection.

mod work;

// Re-export traits
pub use work::WorkService;

// Re-export implementations
pub use work::{SimulatedWork, WorkReport};
