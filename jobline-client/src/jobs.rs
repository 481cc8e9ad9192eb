//! Job operations over the topic protocol
//!
//! Every operation is one correlated exchange:
//!
//! 1. arm the gate with a fresh client token
//! 2. subscribe the accepted and rejected topics
//! 3. publish the request
//! 4. wait for whichever response lands first
//! 5. unsubscribe the response topics again
//!
//! Subscribing before publishing matters: a response that arrives before its
//! subscription is active is lost for good.

use jobline_core::domain::job::JobExecution;
use jobline_core::domain::rejection::{RejectedError, RejectedErrorCode};
use jobline_core::dto::job::{
    DescribeJobExecutionRequest, DescribeJobExecutionResponse, GetPendingJobExecutionsRequest,
    GetPendingJobExecutionsResponse, StartNextJobExecutionResponse,
    StartNextPendingJobExecutionRequest, UpdateJobExecutionRequest, UpdateJobExecutionResponse,
};
use jobline_core::topics::{JobTopics, OperationTopics, is_valid_job_id};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::gate::{Completion, CorrelationGate, GateError};
use crate::transport::{Message, MessageHandler, Transport};

/// Raw outcome of an exchange, as written into the gate by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Accepted(Vec<u8>),
    Rejected(RejectedError),
}

#[derive(Deserialize)]
struct TokenField {
    #[serde(rename = "clientToken")]
    client_token: Option<String>,
}

fn client_token_of(payload: &[u8]) -> Option<String> {
    serde_json::from_slice::<TokenField>(payload)
        .ok()
        .and_then(|field| field.client_token)
}

/// Jobs client for one thing
///
/// Owns the correlation gate, so all operations issued through one client
/// (and its clones) are strictly sequential.
#[derive(Clone)]
pub struct JobsClient {
    transport: Arc<dyn Transport>,
    thing_name: String,
    topics: JobTopics,
    gate: Arc<CorrelationGate<Response>>,
    exchange_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl JobsClient {
    /// Creates a client speaking for `thing_name`
    pub fn new(transport: Arc<dyn Transport>, thing_name: impl Into<String>) -> Self {
        let thing_name = thing_name.into();
        Self {
            transport,
            topics: JobTopics::new(&thing_name),
            thing_name,
            gate: Arc::new(CorrelationGate::new()),
            exchange_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bounds every wait for a response
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = Some(timeout);
        self
    }

    /// Aborts the pending wait when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    pub fn topics(&self) -> &JobTopics {
        &self.topics
    }

    /// Token that aborts this client's exchanges
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn gate(&self) -> &CorrelationGate<Response> {
        &self.gate
    }

    // =============================================================================
    // Job Operations
    // =============================================================================

    /// Lists the thing's pending executions: in progress, then queued
    pub async fn get_pending_jobs(&self) -> Result<GetPendingJobExecutionsResponse> {
        let token = new_client_token();
        let request = GetPendingJobExecutionsRequest {
            client_token: Some(token.clone()),
        };

        self.exchange(&self.topics.get_pending(), &token, &request)
            .await
    }

    /// Describes one job execution including its job document
    pub async fn describe_job(&self, job_id: &str) -> Result<JobExecution> {
        ensure_job_id(job_id)?;

        let token = new_client_token();
        let request = DescribeJobExecutionRequest {
            execution_number: None,
            include_job_document: true,
            client_token: Some(token.clone()),
        };

        let response: DescribeJobExecutionResponse = self
            .exchange(&self.topics.describe(job_id), &token, &request)
            .await?;

        Ok(response.execution)
    }

    /// Asks the backend to start the next pending execution
    ///
    /// The backend chooses which job; the response carries no execution when
    /// nothing is pending.
    pub async fn start_next_pending_job(
        &self,
        step_timeout_in_minutes: Option<i64>,
    ) -> Result<StartNextJobExecutionResponse> {
        let token = new_client_token();
        let request = StartNextPendingJobExecutionRequest {
            step_timeout_in_minutes,
            status_details: None,
            client_token: Some(token.clone()),
        };

        self.exchange(&self.topics.start_next(), &token, &request)
            .await
    }

    /// Updates the status of an execution
    ///
    /// `request.expected_version` must match the backend's current version.
    pub async fn update_job_execution(
        &self,
        job_id: &str,
        mut request: UpdateJobExecutionRequest,
    ) -> Result<UpdateJobExecutionResponse> {
        ensure_job_id(job_id)?;

        let token = new_client_token();
        request.client_token = Some(token.clone());

        self.exchange(&self.topics.update(job_id), &token, &request)
            .await
    }

    /// Closes the underlying transport session
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await?;
        Ok(())
    }

    // =============================================================================
    // Exchange
    // =============================================================================

    async fn exchange<Req, Resp>(
        &self,
        topics: &OperationTopics,
        token: &str,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        // A cancelled run must not change backend state any further
        if self.cancel.is_cancelled() {
            return Err(GateError::Cancelled.into());
        }

        let payload = serde_json::to_vec(request)?;

        self.gate
            .reset(token, &[topics.accepted.as_str(), topics.rejected.as_str()])?;

        if let Err(e) = self.subscribe_responses(topics).await {
            self.gate.abandon();
            self.unsubscribe_responses(topics).await;
            return Err(e);
        }

        if let Err(e) = self.transport.publish(&topics.request, payload).await {
            self.gate.abandon();
            self.unsubscribe_responses(topics).await;
            return Err(e.into());
        }

        debug!("Published {} (client token {})", topics.request, token);

        let response = self
            .gate
            .wait(self.exchange_timeout, Some(&self.cancel))
            .await;
        self.unsubscribe_responses(topics).await;
        let response = response?;

        match response {
            Response::Accepted(payload) => serde_json::from_slice(&payload)
                .map_err(|e| ClientError::Decode(format!("{}: {}", topics.accepted, e))),
            Response::Rejected(rejection) => Err(ClientError::Rejected(rejection)),
        }
    }

    async fn subscribe_responses(&self, topics: &OperationTopics) -> Result<()> {
        let gate = Arc::clone(&self.gate);
        let on_accepted: MessageHandler = Arc::new(move |message: Message| {
            let token = client_token_of(&message.payload);
            settle(
                &gate,
                &message.topic,
                token.as_deref(),
                Response::Accepted(message.payload),
            );
        });

        let gate = Arc::clone(&self.gate);
        let on_rejected: MessageHandler = Arc::new(move |message: Message| {
            let rejection = serde_json::from_slice::<RejectedError>(&message.payload)
                .unwrap_or_else(|e| {
                    RejectedError::new(
                        RejectedErrorCode::InvalidJson,
                        format!("unreadable rejection on {}: {}", message.topic, e),
                    )
                    .with_client_token(client_token_of(&message.payload))
                });
            let token = rejection.client_token.clone();
            settle(
                &gate,
                &message.topic,
                token.as_deref(),
                Response::Rejected(rejection),
            );
        });

        self.transport
            .subscribe(&topics.accepted, on_accepted)
            .await?;
        self.transport
            .subscribe(&topics.rejected, on_rejected)
            .await?;

        Ok(())
    }

    /// Drops the exchange's response subscriptions; late duplicates then
    /// never reach the gate
    async fn unsubscribe_responses(&self, topics: &OperationTopics) {
        for topic in [&topics.accepted, &topics.rejected] {
            if let Err(e) = self.transport.unsubscribe(topic).await {
                debug!("Failed to unsubscribe {}: {}", topic, e);
            }
        }
    }
}

/// Hands a delivery to the gate; the only thing a handler is allowed to do
fn settle(gate: &CorrelationGate<Response>, topic: &str, token: Option<&str>, response: Response) {
    match gate.complete(topic, token, response) {
        Ok(Completion::Delivered) => debug!("Response received on {}", topic),
        Ok(Completion::Stale) => debug!("Ignoring stale response on {}", topic),
        Err(e) => warn!("Dropped response on {}: {}", topic, e),
    }
}

fn new_client_token() -> String {
    Uuid::new_v4().to_string()
}

fn ensure_job_id(job_id: &str) -> Result<()> {
    if is_valid_job_id(job_id) {
        Ok(())
    } else {
        Err(ClientError::InvalidRequest(format!(
            "'{}' is not a valid job id",
            job_id
        )))
    }
}
