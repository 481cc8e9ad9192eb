//! In-process broker
//!
//! [`InMemoryBroker`] routes messages between sessions living in the same
//! process. Every session obtained through [`InMemoryBroker::connect`] is a
//! [`Transport`]; the device runner and the simulated jobs backend each hold
//! one. Each delivered message runs its handler on a freshly spawned task,
//! so handlers never run on the publisher's stack.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::{
    Message, MessageHandler, Transport, topic_matches, validate_filter, validate_topic,
};

struct Session {
    client_id: String,
    subscriptions: Vec<(String, MessageHandler)>,
}

#[derive(Default)]
struct BrokerInner {
    sessions: Mutex<HashMap<u64, Session>>,
    next_session_id: AtomicU64,
    published: AtomicU64,
}

impl BrokerInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process publish/subscribe hub
///
/// Cheap to clone; clones share the same routing table.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session on the broker
    pub fn connect(&self, client_id: impl Into<String>) -> InMemoryTransport {
        let client_id = client_id.into();
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);

        self.inner.sessions().insert(
            session_id,
            Session {
                client_id: client_id.clone(),
                subscriptions: Vec::new(),
            },
        );

        debug!("Session {} connected as '{}'", session_id, client_id);

        InMemoryTransport {
            broker: Arc::clone(&self.inner),
            session_id,
            client_id,
        }
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions().len()
    }

    /// Number of subscriptions held across all sessions
    pub fn subscription_count(&self) -> usize {
        self.inner
            .sessions()
            .values()
            .map(|session| session.subscriptions.len())
            .sum()
    }

    /// Total number of messages published through the broker
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// One client session on an [`InMemoryBroker`]
pub struct InMemoryTransport {
    broker: Arc<BrokerInner>,
    session_id: u64,
    client_id: String,
}

impl InMemoryTransport {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.broker.sessions().contains_key(&self.session_id)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        validate_topic(topic)?;

        let handlers: Vec<MessageHandler> = {
            let sessions = self.broker.sessions();
            if !sessions.contains_key(&self.session_id) {
                return Err(TransportError::Disconnected);
            }
            sessions
                .values()
                .flat_map(|session| session.subscriptions.iter())
                .filter(|(filter, _)| topic_matches(filter, topic))
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::PublishFailed(format!("no async runtime: {}", e)))?;

        self.broker.published.fetch_add(1, Ordering::Relaxed);
        trace!(
            "'{}' published {} bytes on {} ({} receiver(s))",
            self.client_id,
            payload.len(),
            topic,
            handlers.len()
        );

        for handler in handlers {
            let message = Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            runtime.spawn(async move { handler(message) });
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        validate_filter(filter)?;

        let mut sessions = self.broker.sessions();
        let session = sessions
            .get_mut(&self.session_id)
            .ok_or(TransportError::Disconnected)?;

        match session
            .subscriptions
            .iter_mut()
            .find(|(existing, _)| existing == filter)
        {
            Some(entry) => entry.1 = handler,
            None => session.subscriptions.push((filter.to_string(), handler)),
        }

        trace!("'{}' subscribed to {}", session.client_id, filter);
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        let mut sessions = self.broker.sessions();
        let session = sessions
            .get_mut(&self.session_id)
            .ok_or(TransportError::Disconnected)?;

        session.subscriptions.retain(|(existing, _)| existing != filter);
        trace!("'{}' unsubscribed from {}", session.client_id, filter);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.broker.sessions().remove(&self.session_id).is_some() {
            debug!("Session {} ('{}') disconnected", self.session_id, self.client_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};

    fn forwarding_handler(tx: mpsc::UnboundedSender<Message>) -> MessageHandler {
        Arc::new(move |message| {
            let _ = tx.send(message);
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let broker = InMemoryBroker::new();
        let device = broker.connect("device");
        let service = broker.connect("service");

        let (tx, mut rx) = mpsc::unbounded_channel();
        service
            .subscribe("things/+/jobs/start-next", forwarding_handler(tx))
            .await
            .unwrap();

        device
            .publish("things/dev-1/jobs/start-next", b"{}".to_vec())
            .await
            .unwrap();
        device
            .publish("things/dev-1/jobs/get-pending", b"{}".to_vec())
            .await
            .unwrap();

        let message = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, "things/dev-1/jobs/start-next");
        assert_eq!(message.payload, b"{}");

        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "non-matching topic must not be delivered"
        );
        assert_eq!(broker.published_count(), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_handler() {
        let broker = InMemoryBroker::new();
        let session = broker.connect("device");

        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        session
            .subscribe("a/b", forwarding_handler(first_tx))
            .await
            .unwrap();
        session
            .subscribe("a/b", forwarding_handler(second_tx))
            .await
            .unwrap();

        session.publish("a/b", vec![1]).await.unwrap();

        let delivered = timeout(Duration::from_secs(1), second_rx.recv())
            .await
            .unwrap();
        assert!(delivered.is_some());
        assert!(timeout(Duration::from_millis(50), first_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let session = broker.connect("device");

        let (tx, mut rx) = mpsc::unbounded_channel();
        session
            .subscribe("a/b", forwarding_handler(tx))
            .await
            .unwrap();
        session.unsubscribe("a/b").await.unwrap();
        // Unknown filters are fine
        session.unsubscribe("x/y").await.unwrap();

        session.publish("a/b", vec![1]).await.unwrap();
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_drops_session() {
        let broker = InMemoryBroker::new();
        let session = broker.connect("device");
        assert_eq!(broker.session_count(), 1);

        session.disconnect().await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(broker.session_count(), 0);

        assert_eq!(
            session.publish("a/b", vec![]).await,
            Err(TransportError::Disconnected)
        );
        // Disconnecting twice is harmless
        assert!(session.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_wildcards_in_publish_topic() {
        let broker = InMemoryBroker::new();
        let session = broker.connect("device");

        let result = session.publish("a/+", vec![]).await;
        assert!(matches!(result, Err(TransportError::InvalidTopic(_))));
    }
}
