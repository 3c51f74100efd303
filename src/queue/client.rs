//! Message broker interface: three logical topics with at-least-once
//! delivery and lock/lease semantics.
//!
//! A received message holds a lock token; completing it after the lease
//! expired fails with [`QueueError::LockLost`] and the message is
//! re-delivered. The in-memory broker mirrors this for tests and the demo
//! binary.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use super::message::QueueMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// First-chance processing lane.
    Main,
    /// Second-chance lane: one bounded extra attempt, never re-queued.
    Retry,
    /// Outbound pointer messages for the notification service.
    Notification,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Main => "main",
            Topic::Retry => "retry",
            Topic::Notification => "notification",
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message lock lost for token {0}")]
    LockLost(Uuid),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: QueueMessage,
    pub lock_token: Uuid,
    /// 1 on first delivery, incremented on each transport re-delivery.
    pub delivery_count: u32,
}

#[async_trait]
pub trait MessageQueueClient: Send + Sync {
    async fn send(&self, topic: Topic, message: QueueMessage) -> Result<(), QueueError>;

    /// Pop the next available message, taking a lock lease on it. Returns
    /// `None` when the topic is empty.
    async fn receive(&self, topic: Topic) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Settle a message. Fails with [`QueueError::LockLost`] if the lease
    /// expired (the message has gone back to the topic).
    async fn complete(&self, topic: Topic, lock_token: Uuid) -> Result<(), QueueError>;

    /// Give the message back to the topic for immediate re-delivery.
    async fn abandon(&self, topic: Topic, lock_token: Uuid) -> Result<(), QueueError>;
}

struct InFlight {
    message: QueueMessage,
    delivery_count: u32,
    locked_until: Instant,
}

#[derive(Default)]
struct TopicState {
    ready: Mutex<VecDeque<(QueueMessage, u32)>>,
    inflight: DashMap<Uuid, InFlight>,
}

/// In-memory broker with lock leases.
pub struct MemoryQueue {
    main: TopicState,
    retry: TopicState,
    notification: TopicState,
    lock_ttl: Duration,
}

impl MemoryQueue {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            main: TopicState::default(),
            retry: TopicState::default(),
            notification: TopicState::default(),
            lock_ttl,
        }
    }

    fn state(&self, topic: Topic) -> &TopicState {
        match topic {
            Topic::Main => &self.main,
            Topic::Retry => &self.retry,
            Topic::Notification => &self.notification,
        }
    }

    /// Move expired leases back to the ready queue.
    fn reclaim_expired(&self, topic: Topic) {
        let state = self.state(topic);
        let now = Instant::now();
        let expired: Vec<Uuid> = state
            .inflight
            .iter()
            .filter(|e| e.value().locked_until <= now)
            .map(|e| *e.key())
            .collect();
        for token in expired {
            if let Some((_, inflight)) = state.inflight.remove(&token) {
                tracing::debug!(topic = topic.as_str(), "lease expired, re-queueing message");
                state
                    .ready
                    .lock()
                    .expect("queue mutex poisoned")
                    .push_back((inflight.message, inflight.delivery_count));
            }
        }
    }

    /// Number of messages waiting on a topic (not counting in-flight).
    pub fn ready_len(&self, topic: Topic) -> usize {
        self.reclaim_expired(topic);
        self.state(topic).ready.lock().expect("queue mutex poisoned").len()
    }
}

#[async_trait]
impl MessageQueueClient for MemoryQueue {
    async fn send(&self, topic: Topic, message: QueueMessage) -> Result<(), QueueError> {
        self.state(topic)
            .ready
            .lock()
            .expect("queue mutex poisoned")
            .push_back((message, 0));
        Ok(())
    }

    async fn receive(&self, topic: Topic) -> Result<Option<ReceivedMessage>, QueueError> {
        self.reclaim_expired(topic);
        let state = self.state(topic);
        let next = state
            .ready
            .lock()
            .expect("queue mutex poisoned")
            .pop_front();

        let Some((message, prior_deliveries)) = next else {
            return Ok(None);
        };

        let lock_token = Uuid::new_v4();
        let delivery_count = prior_deliveries + 1;
        state.inflight.insert(
            lock_token,
            InFlight {
                message: message.clone(),
                delivery_count,
                locked_until: Instant::now() + self.lock_ttl,
            },
        );
        Ok(Some(ReceivedMessage {
            message,
            lock_token,
            delivery_count,
        }))
    }

    async fn complete(&self, topic: Topic, lock_token: Uuid) -> Result<(), QueueError> {
        self.reclaim_expired(topic);
        match self.state(topic).inflight.remove(&lock_token) {
            Some(_) => Ok(()),
            None => Err(QueueError::LockLost(lock_token)),
        }
    }

    async fn abandon(&self, topic: Topic, lock_token: Uuid) -> Result<(), QueueError> {
        match self.state(topic).inflight.remove(&lock_token) {
            Some((_, inflight)) => {
                self.state(topic)
                    .ready
                    .lock()
                    .expect("queue mutex poisoned")
                    .push_back((inflight.message, inflight.delivery_count));
                Ok(())
            }
            None => Err(QueueError::LockLost(lock_token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_complete() {
        let q = MemoryQueue::new(Duration::from_secs(30));
        q.send(Topic::Main, QueueMessage::new("a")).await.unwrap();

        let received = q.receive(Topic::Main).await.unwrap().unwrap();
        assert_eq!(received.message.body, "a");
        assert_eq!(received.delivery_count, 1);

        q.complete(Topic::Main, received.lock_token).await.unwrap();
        assert!(q.receive(Topic::Main).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_redelivers_and_loses_lock() {
        let q = MemoryQueue::new(Duration::from_millis(10));
        q.send(Topic::Main, QueueMessage::new("a")).await.unwrap();

        let first = q.receive(Topic::Main).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        // message came back to the topic with a bumped delivery count
        let second = q.receive(Topic::Main).await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);

        // completing with the stale token fails
        let err = q.complete(Topic::Main, first.lock_token).await.unwrap_err();
        assert!(matches!(err, QueueError::LockLost(_)));
    }

    #[tokio::test]
    async fn test_abandon_requeues_immediately() {
        let q = MemoryQueue::new(Duration::from_secs(30));
        q.send(Topic::Retry, QueueMessage::new("a")).await.unwrap();

        let received = q.receive(Topic::Retry).await.unwrap().unwrap();
        q.abandon(Topic::Retry, received.lock_token).await.unwrap();

        let again = q.receive(Topic::Retry).await.unwrap().unwrap();
        assert_eq!(again.message.body, "a");
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let q = MemoryQueue::new(Duration::from_secs(30));
        q.send(Topic::Notification, QueueMessage::new("n"))
            .await
            .unwrap();
        assert!(q.receive(Topic::Main).await.unwrap().is_none());
        assert!(q.receive(Topic::Notification).await.unwrap().is_some());
    }
}
