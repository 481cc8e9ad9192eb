//! Jobs service
//!
//! Serves a [`JobStore`] over the job topics of one thing: subscribes to the
//! request topics and publishes every answer on the matching `accepted` or
//! `rejected` topic, echoing the request's client token.

use jobline_client::{Message, MessageHandler, Transport, TransportError};
use jobline_core::domain::rejection::{RejectedError, RejectedErrorCode};
use jobline_core::dto::job::{
    DescribeJobExecutionRequest, DescribeJobExecutionResponse, GetPendingJobExecutionsRequest,
    StartNextPendingJobExecutionRequest, UpdateJobExecutionRequest,
};
use jobline_core::topics::{JobTopics, Outcome};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::store::JobStore;

/// Request kinds served by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    GetPending,
    Describe,
    StartNext,
    Update,
}

/// Answers job requests for one thing
pub struct JobsService {
    store: Arc<JobStore>,
    transport: Arc<dyn Transport>,
    topics: JobTopics,
}

impl JobsService {
    /// Subscribes to the thing's request topics and starts answering
    pub async fn start(
        transport: Arc<dyn Transport>,
        store: Arc<JobStore>,
    ) -> Result<Arc<Self>, TransportError> {
        let topics = JobTopics::new(store.thing_name());
        let service = Arc::new(Self {
            store,
            transport,
            topics,
        });

        let routes = [
            (service.topics.get_pending().request, Operation::GetPending),
            (service.topics.describe_requests(), Operation::Describe),
            (service.topics.start_next().request, Operation::StartNext),
            (service.topics.update_requests(), Operation::Update),
        ];

        for (filter, operation) in routes {
            let handler_service = Arc::clone(&service);
            let handler: MessageHandler = Arc::new(move |message: Message| {
                handler_service.handle(operation, message);
            });
            service.transport.subscribe(&filter, handler).await?;
        }

        info!("Jobs service listening on {}/#", service.topics.base());
        Ok(service)
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Stops answering requests
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.transport.disconnect().await
    }

    fn handle(&self, operation: Operation, message: Message) {
        debug!("Request on {}", message.topic);

        let answer = match operation {
            Operation::GetPending => {
                self.serve(&message, |req: GetPendingJobExecutionsRequest| {
                    let mut response = self.store.pending();
                    response.client_token = req.client_token;
                    Ok(response)
                })
            }
            Operation::Describe => {
                let job_id = self.topics.job_id_of(&message.topic).unwrap_or_default();
                self.serve(&message, |req: DescribeJobExecutionRequest| {
                    let execution = self
                        .store
                        .describe(job_id, &req)
                        .map_err(|e| e.with_client_token(req.client_token.clone()))?;
                    Ok(DescribeJobExecutionResponse {
                        execution,
                        timestamp: Some(chrono::Utc::now()),
                        client_token: req.client_token,
                    })
                })
            }
            Operation::StartNext => {
                self.serve(&message, |req: StartNextPendingJobExecutionRequest| {
                    let mut response = self.store.start_next(&req);
                    response.client_token = req.client_token;
                    Ok(response)
                })
            }
            Operation::Update => {
                let job_id = self.topics.job_id_of(&message.topic).unwrap_or_default();
                self.serve(&message, |req: UpdateJobExecutionRequest| {
                    let mut response = self
                        .store
                        .update(job_id, &req)
                        .map_err(|e| e.with_client_token(req.client_token.clone()))?;
                    response.client_token = req.client_token;
                    Ok(response)
                })
            }
        };

        let (outcome, payload) = match answer {
            Ok(payload) => (Outcome::Accepted, payload),
            Err(rejection) => match serde_json::to_vec(&rejection) {
                Ok(payload) => (Outcome::Rejected, payload),
                Err(e) => {
                    error!("Failed to encode rejection for {}: {}", message.topic, e);
                    return;
                }
            },
        };

        let topic = match outcome {
            Outcome::Accepted => format!("{}/accepted", message.topic),
            Outcome::Rejected => format!("{}/rejected", message.topic),
        };

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.publish(&topic, payload).await {
                error!("Failed to publish response on {}: {}", topic, e);
            }
        });
    }

    /// Decodes a request, runs `op` and encodes its accepted response
    fn serve<Req, Resp, F>(&self, message: &Message, op: F) -> Result<Vec<u8>, RejectedError>
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: FnOnce(Req) -> Result<Resp, RejectedError>,
    {
        let request: Req = serde_json::from_slice(&message.payload).map_err(|e| {
            RejectedError::new(
                RejectedErrorCode::InvalidJson,
                format!("Malformed request on {}: {}", message.topic, e),
            )
            .with_client_token(client_token_of(&message.payload))
        })?;

        let response = op(request)?;

        serde_json::to_vec(&response).map_err(|e| {
            RejectedError::new(
                RejectedErrorCode::InternalError,
                format!("Failed to encode response: {}", e),
            )
        })
    }
}

/// Client token of a request that failed to decode, if it has one
fn client_token_of(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value.get("clientToken")?.as_str().map(str::to_string)
}
