//! Core domain types
//!
//! These types describe jobs as the backend tracks them and as the device
//! sees them. They are shared between the runner (which drives executions)
//! and the backend (which owns the authoritative state).

pub mod job;
pub mod rejection;
