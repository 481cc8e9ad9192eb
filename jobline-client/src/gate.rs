//! Correlation gate
//!
//! Bridges a response that arrives on a subscribed topic back to the task
//! that sent the request. The gate holds a single slot: it is armed for one
//! exchange with [`CorrelationGate::reset`], filled by a handler through
//! [`CorrelationGate::complete`], and drained by the requester in
//! [`CorrelationGate::wait`].
//!
//! Only one exchange may be outstanding at a time. Arming again before the
//! previous exchange was waited on (or abandoned) fails with
//! [`GateError::InFlight`].
//!
//! Each arming carries a correlation token and the topics its response may
//! arrive on. A delivery on another topic, or tagged with a different token,
//! belongs to an earlier exchange and is discarded.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Gate misuse or a wait that could not be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    /// An earlier exchange has not been waited on yet
    #[error("an exchange is already in flight")]
    InFlight,

    /// Nothing was armed
    #[error("gate is not armed")]
    NotArmed,

    /// The current arming was already completed
    #[error("exchange already completed")]
    AlreadyCompleted,

    /// No response before the deadline
    #[error("timed out waiting for response")]
    TimedOut,

    /// The wait was cancelled
    #[error("wait cancelled")]
    Cancelled,

    /// The exchange was closed before a response could be handed over
    #[error("exchange closed")]
    Closed,
}

/// What a call to [`CorrelationGate::complete`] did with the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Handed to the waiting party
    Delivered,
    /// Tagged for another exchange; dropped
    Stale,
}

struct GateState<T> {
    correlation: Option<String>,
    topics: Vec<String>,
    sender: Option<oneshot::Sender<T>>,
    receiver: Option<oneshot::Receiver<T>>,
    outstanding: bool,
    completed: bool,
    armings: u64,
}

/// Single-slot rendezvous between a requester and a response handler
pub struct CorrelationGate<T> {
    state: Mutex<GateState<T>>,
}

impl<T> Default for CorrelationGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CorrelationGate<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                correlation: None,
                topics: Vec::new(),
                sender: None,
                receiver: None,
                outstanding: false,
                completed: false,
                armings: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arms the gate for the next exchange
    ///
    /// Only deliveries on one of `topics` can complete this arming.
    pub fn reset(&self, correlation: impl Into<String>, topics: &[&str]) -> Result<(), GateError> {
        let mut state = self.lock();
        if state.outstanding {
            return Err(GateError::InFlight);
        }

        let (sender, receiver) = oneshot::channel();
        state.correlation = Some(correlation.into());
        state.topics = topics.iter().map(|topic| topic.to_string()).collect();
        state.sender = Some(sender);
        state.receiver = Some(receiver);
        state.outstanding = true;
        state.completed = false;
        state.armings += 1;
        Ok(())
    }

    /// Delivers the response of the current exchange
    ///
    /// `topic` is where the delivery arrived. A `correlation` of `None`
    /// matches any token of the armed topics. Completing the same arming
    /// twice returns [`GateError::AlreadyCompleted`].
    pub fn complete(
        &self,
        topic: &str,
        correlation: Option<&str>,
        value: T,
    ) -> Result<Completion, GateError> {
        let mut state = self.lock();
        if state.armings == 0 {
            return Err(GateError::NotArmed);
        }

        if !state.topics.iter().any(|armed| armed == topic) {
            return Ok(Completion::Stale);
        }

        if let (Some(got), Some(expected)) = (correlation, state.correlation.as_deref()) {
            if got != expected {
                return Ok(Completion::Stale);
            }
        }

        let Some(sender) = state.sender.take() else {
            return Err(if state.completed {
                GateError::AlreadyCompleted
            } else {
                GateError::Closed
            });
        };

        state.completed = true;
        sender.send(value).map_err(|_| GateError::Closed)?;
        Ok(Completion::Delivered)
    }

    /// Waits for the response of the current exchange
    ///
    /// Whatever the outcome, the exchange is closed afterwards and the gate
    /// can be armed again.
    pub async fn wait(
        &self,
        deadline: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, GateError> {
        let receiver = self.lock().receiver.take().ok_or(GateError::NotArmed)?;

        let response = async {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, receiver).await {
                    Ok(result) => result.map_err(|_| GateError::Closed),
                    Err(_) => Err(GateError::TimedOut),
                },
                None => receiver.await.map_err(|_| GateError::Closed),
            }
        };

        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(GateError::Cancelled),
                result = response => result,
            },
            None => response.await,
        };

        self.close();
        outcome
    }

    /// Closes an arming whose request never went out
    pub fn abandon(&self) {
        let mut state = self.lock();
        state.receiver = None;
        state.sender = None;
        state.outstanding = false;
    }

    /// Whether an armed exchange has not been waited on yet
    pub fn is_outstanding(&self) -> bool {
        self.lock().outstanding
    }

    /// Number of times the gate has been armed
    pub fn armings(&self) -> u64 {
        self.lock().armings
    }

    fn close(&self) {
        let mut state = self.lock();
        state.sender = None;
        state.outstanding = false;
    }
}
