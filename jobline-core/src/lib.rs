//! Jobline Core
//!
//! Core types shared by the device runner, the jobs client and the
//! simulated jobs backend.
//!
//! This crate contains:
//! - Domain types: jobs, executions, statuses and rejections
//! - DTOs: request/response payloads exchanged over the job topics
//! - Topics: the topic layout for a thing's job channels

pub mod domain;
pub mod dto;
pub mod topics;
