//! Transport port
//!
//! The publish/subscribe channel the jobs client talks through. Connection
//! management, security and reconnection belong to the implementation; the
//! client only needs publish, subscribe and a clean disconnect.
//!
//! Delivery is at-least-once with no ordering guarantee across topics.
//! Handlers run on the transport's delivery context and must not block.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TransportError;

/// Inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every message matching a subscription
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Publish/subscribe transport trait
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a payload on a topic
    ///
    /// Returns once the transport has accepted the message, not once anyone
    /// received it.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribes a handler to a topic filter
    ///
    /// Subscribing a filter this session already holds replaces its handler.
    /// The subscription is active when this returns.
    async fn subscribe(&self, filter: &str, handler: MessageHandler)
    -> Result<(), TransportError>;

    /// Drops the subscription for a filter
    ///
    /// Unsubscribing a filter the session does not hold is not an error.
    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Closes the session and drops its subscriptions
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Validates a concrete topic name (no wildcards)
pub fn validate_topic(topic: &str) -> Result<(), TransportError> {
    if topic.is_empty() || topic.contains(['+', '#']) || topic.split('/').any(str::is_empty) {
        return Err(TransportError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Validates a topic filter
///
/// `+` matches exactly one level and `#` matches any remaining levels; both
/// must occupy a whole level, and `#` must be last.
pub fn validate_filter(filter: &str) -> Result<(), TransportError> {
    let invalid = || TransportError::InvalidTopic(filter.to_string());

    if filter.is_empty() {
        return Err(invalid());
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (idx, level) in levels.iter().enumerate() {
        match *level {
            "" => return Err(invalid()),
            "+" => {}
            "#" if idx == levels.len() - 1 => {}
            other if other.contains(['+', '#']) => return Err(invalid()),
            _ => {}
        }
    }
    Ok(())
}

/// Checks whether a topic matches a filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard_matching() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));

        assert!(topic_matches("a/+/c", "a/x/c"));
        assert!(!topic_matches("a/+/c", "a/x/y/c"));

        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_filter("things/+/jobs/#").is_ok());
        assert!(validate_filter("things/a+/jobs").is_err());
        assert!(validate_filter("things/#/jobs").is_err());
        assert!(validate_filter("things//jobs").is_err());
        assert!(validate_filter("").is_err());
    }

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("things/dev/jobs/start-next").is_ok());
        assert!(validate_topic("things/+/jobs").is_err());
        assert!(validate_topic("things/dev/").is_err());
    }
}
