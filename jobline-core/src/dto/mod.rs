//! Data Transfer Objects for the job topics
//!
//! Request payloads published by the device and the accepted-response
//! payloads published back by the backend. Rejections use
//! [`crate::domain::rejection::RejectedError`].

pub mod job;
