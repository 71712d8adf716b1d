//! Pub/sub and queue capability traits.
//!
//! - [`PubSub`]: topic publish/subscribe (`pubsub-basic`)
//! - [`Queue`]: durable queues with per-message ack/nack (`queue`)
//!
//! Messaging implementations are EXTENSIONS (e.g. memory, NATS, Kafka).

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Message headers: string key-values carried alongside the payload.
pub type Headers = BTreeMap<String, String>;

/// A message delivered by a pub/sub or queue backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Topic or queue the message was published to.
    pub topic: String,
    /// Opaque payload.
    pub payload: Bytes,
    /// Header key-values.
    pub headers: Headers,
    /// Backend-assigned message identifier.
    pub message_id: String,
    /// Publish timestamp (unix seconds).
    pub timestamp: i64,
    /// Position in the topic, when the backend tracks one.
    pub offset: Option<u64>,
}

/// Stream of pub/sub messages for one subscriber.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Topic publish/subscribe.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload to a topic. Returns the assigned message id.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<String, DriverError>;

    /// Subscribe to a topic. Messages published after the subscription is
    /// established are delivered in publish order.
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<MessageStream, DriverError>;

    /// Subscribe starting from a specific offset.
    ///
    /// Backends without offset tracking return `interface_not_supported`;
    /// callers then fall back to [`PubSub::subscribe`].
    async fn subscribe_from(
        &self,
        _topic: &str,
        _subscriber_id: &str,
        _offset: u64,
    ) -> Result<MessageStream, DriverError> {
        Err(DriverError::Unsupported("offset seek".to_string()))
    }

    /// Tear down a subscription.
    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), DriverError>;
}

// =============================================================================
// QUEUE
// =============================================================================

/// Per-delivery acknowledgement handle.
///
/// Exactly one of `ack`/`nack` should be called per delivery; a `nack`ed
/// message is redelivered with an incremented delivery count.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Acknowledge successful processing; the message is removed.
    async fn ack(&self) -> Result<(), DriverError>;

    /// Reject the message for redelivery.
    async fn nack(&self) -> Result<(), DriverError>;
}

/// A queue message paired with its acknowledgement handle.
pub struct Delivery {
    /// The delivered message.
    pub message: Message,
    /// How many times this message has been delivered (1 = first).
    pub delivery_count: u32,
    /// Acknowledgement handle.
    pub acker: Arc<dyn Acknowledge>,
}

impl Delivery {
    /// Acknowledge successful processing.
    pub async fn ack(&self) -> Result<(), DriverError> {
        self.acker.ack().await
    }

    /// Reject for redelivery.
    pub async fn nack(&self) -> Result<(), DriverError> {
        self.acker.nack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message.message_id)
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// Stream of queue deliveries for one receiver.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Durable queue with per-message acknowledgement.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append a payload to a queue. Returns the assigned message id.
    async fn enqueue(
        &self,
        queue: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<String, DriverError>;

    /// Receive deliveries from a queue. Unacknowledged messages are
    /// redelivered after `nack`.
    async fn receive(&self, queue: &str) -> Result<DeliveryStream, DriverError>;
}
