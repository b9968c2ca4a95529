use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    EmptyHit(KeyEvent),
    Loaded(LoadedEvent),
    EmptyMarked(KeyEvent),
    Invalidated(InvalidatedEvent),
    RetryFailed(RetryFailedEvent),
    RetryStopped(RetryStoppedEvent),
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::EmptyHit(e) | CacheEvent::EmptyMarked(e) => &e.key,
            CacheEvent::Loaded(e) => &e.key,
            CacheEvent::Invalidated(e) => &e.key,
            CacheEvent::RetryFailed(e) => &e.key,
            CacheEvent::RetryStopped(e) => &e.key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedEvent {
    pub key: String,
    pub ttl_ms: Option<u64>,
    pub timestamp: u64,
}

/// `attempt` 0 is the immediate delete, 1.. are the delayed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidatedEvent {
    pub key: String,
    pub attempt: u32,
    pub existed: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryFailedEvent {
    pub key: String,
    pub attempt: u32,
    pub error: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    TooManyFailures,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStoppedEvent {
    pub key: String,
    pub completed_attempts: u32,
    pub reason: StopReason,
    pub timestamp: u64,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: now_timestamp_ms(),
        }
    }
}

/// Milliseconds since UNIX epoch
pub fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Optional broadcast sink shared by the read and invalidation paths.
#[derive(Clone, Debug, Default)]
pub struct EventPublisher {
    sender: Option<broadcast::Sender<CacheEvent>>,
}

impl EventPublisher {
    pub fn new(sender: broadcast::Sender<CacheEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: CacheEvent) {
        let Some(ref sender) = self.sender else {
            return;
        };
        let key = event.key().to_string();
        match sender.send(event) {
            Ok(subscriber_count) => {
                tracing::trace!("Broadcasted event for key '{key}' to {subscriber_count} subscriber(s)");
            }
            Err(_) => {
                tracing::trace!("No subscribers for event on key '{key}'");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CacheEvent::Invalidated(InvalidatedEvent {
            key: "user:1".into(),
            attempt: 2,
            existed: false,
            timestamp: 42,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "invalidated");
        assert_eq!(json["key"], "user:1");
        assert_eq!(json["attempt"], 2);

        let back: CacheEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_stop_reason_is_snake_case() {
        let event = CacheEvent::RetryStopped(RetryStoppedEvent {
            key: "k".into(),
            completed_attempts: 1,
            reason: StopReason::TooManyFailures,
            timestamp: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "retry_stopped");
        assert_eq!(json["reason"], "too_many_failures");
    }

    #[tokio::test]
    async fn test_publisher_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(8);
        let publisher = EventPublisher::new(tx);
        publisher.publish(CacheEvent::EmptyHit(KeyEvent::new("missing")));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.key(), "missing");
        assert!(matches!(received, CacheEvent::EmptyHit(_)));
    }

    #[test]
    fn test_disabled_publisher_is_a_no_op() {
        EventPublisher::disabled().publish(CacheEvent::EmptyMarked(KeyEvent::new("k")));
    }
}
