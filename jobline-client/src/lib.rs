//! Jobline jobs client
//!
//! Turns a fire-and-forget publish/subscribe channel into sequential,
//! correlated request/response exchanges for the job operations.
//!
//! - [`transport`]: the publish/subscribe port the client talks through
//! - [`memory`]: an in-process broker implementing that port
//! - [`gate`]: the single-slot correlation gate
//! - [`jobs`]: typed job operations built on top
//!
//! # Example
//!
//! ```no_run
//! use jobline_client::{InMemoryBroker, JobsClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> jobline_client::Result<()> {
//! let broker = InMemoryBroker::new();
//! let client = JobsClient::new(Arc::new(broker.connect("device-1")), "device-1")
//!     .with_exchange_timeout(Duration::from_secs(30));
//!
//! let pending = client.get_pending_jobs().await?;
//! println!("{} queued job(s)", pending.queued_jobs.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod gate;
pub mod jobs;
pub mod memory;
pub mod transport;

// Re-export commonly used types
pub use error::{ClientError, Result, TransportError};
pub use gate::{Completion, CorrelationGate, GateError};
pub use jobs::{JobsClient, Response};
pub use memory::{InMemoryBroker, InMemoryTransport};
pub use transport::{Message, MessageHandler, Transport};
