//! In-memory pub/sub and queue backends.
//!
//! Pub/sub fans out over `tokio::sync::broadcast` with a bounded retention
//! buffer per topic so subscribers can resume from an offset. Queues hold
//! pending items behind a mutex; `nack`ed deliveries are re-enqueued with an
//! incremented delivery count.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::Notify;

use prism_traits::error::DriverError;
use prism_traits::messaging::{
    Acknowledge, Delivery, DeliveryStream, Headers, Message, MessageStream, PubSub, Queue,
};

use crate::unix_now;

const CHANNEL_CAPACITY: usize = 1024;
const RETAINED_LIMIT: usize = 1024;

// =============================================================================
// PUB/SUB
// =============================================================================

struct Topic {
    sender: broadcast::Sender<Message>,
    sequence: AtomicU64,
    retained: RwLock<VecDeque<Message>>,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            retained: RwLock::new(VecDeque::new()),
        }
    }
}

/// In-memory topic pub/sub with offset-tracked retention.
pub struct MemoryPubSub {
    topics: DashMap<String, Arc<Topic>>,
    subscribers: DashMap<String, ()>,
    closed: AtomicBool,
}

impl MemoryPubSub {
    /// Create an empty pub/sub backend.
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            subscribers: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of topics seen so far.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Drop all topics, ending every live subscription stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.topics.clear();
        self.subscribers.clear();
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone()
    }

    fn live_stream(rx: broadcast::Receiver<Message>, from_offset: u64) -> MessageStream {
        let stream = futures_util::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.offset.map(|o| o >= from_offset).unwrap_or(true) {
                            return Some((message, rx));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Box::pin(stream)
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<String, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::ConnectionLost("pubsub closed".to_string()));
        }
        let state = self.topic(topic);
        let offset = state.sequence.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            topic: topic.to_string(),
            payload,
            headers,
            message_id: format!("{}-{}", topic, offset),
            timestamp: unix_now(),
            offset: Some(offset),
        };

        {
            let mut retained = state.retained.write();
            retained.push_back(message.clone());
            while retained.len() > RETAINED_LIMIT {
                retained.pop_front();
            }
        }

        // No receivers is fine; retention still records the message.
        let _ = state.sender.send(message.clone());
        Ok(message.message_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<MessageStream, DriverError> {
        let state = self.topic(topic);
        self.subscribers
            .insert(format!("{}/{}", topic, subscriber_id), ());
        Ok(Self::live_stream(state.sender.subscribe(), 0))
    }

    async fn subscribe_from(
        &self,
        topic: &str,
        subscriber_id: &str,
        offset: u64,
    ) -> Result<MessageStream, DriverError> {
        let state = self.topic(topic);
        self.subscribers
            .insert(format!("{}/{}", topic, subscriber_id), ());

        // Subscribe before snapshotting retention so nothing published in
        // between is missed; the live stream skips what the backlog covers.
        let rx = state.sender.subscribe();
        let backlog: Vec<Message> = state
            .retained
            .read()
            .iter()
            .filter(|m| m.offset.map(|o| o >= offset).unwrap_or(false))
            .cloned()
            .collect();
        let next_wanted = backlog
            .last()
            .and_then(|m| m.offset)
            .map(|o| o + 1)
            .unwrap_or(offset);

        let live = Self::live_stream(rx, next_wanted);
        Ok(Box::pin(futures_util::stream::iter(backlog).chain(live)))
    }

    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), DriverError> {
        self.subscribers
            .remove(&format!("{}/{}", topic, subscriber_id));
        Ok(())
    }
}

// =============================================================================
// QUEUE
// =============================================================================

struct QueueItem {
    message: Message,
    attempts: u32,
}

struct QueueState {
    pending: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

struct MemoryAcker {
    state: Arc<QueueState>,
    item: Mutex<Option<QueueItem>>,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), DriverError> {
        // Taking the item settles the delivery; double-ack is a no-op.
        self.item.lock().take();
        Ok(())
    }

    async fn nack(&self) -> Result<(), DriverError> {
        if let Some(mut item) = self.item.lock().take() {
            item.attempts += 1;
            self.state.pending.lock().push_back(item);
            self.state.notify.notify_one();
        }
        Ok(())
    }
}

/// In-memory queue with redelivery on nack.
pub struct MemoryQueue {
    queues: DashMap<String, Arc<QueueState>>,
}

impl MemoryQueue {
    /// Create an empty queue backend.
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Number of queues seen so far.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Number of pending (not in-flight) messages in a queue.
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map(|q| q.pending.lock().len())
            .unwrap_or(0)
    }

    /// End all receive streams.
    pub fn close(&self) {
        for entry in self.queues.iter() {
            entry.value().closed.store(true, Ordering::Release);
            entry.value().notify.notify_waiters();
        }
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<String, DriverError> {
        let state = self.queue(queue);
        if state.closed.load(Ordering::Acquire) {
            return Err(DriverError::ConnectionLost("queue closed".to_string()));
        }
        let offset = state.sequence.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            topic: queue.to_string(),
            payload,
            headers,
            message_id: format!("{}-{}", queue, offset),
            timestamp: unix_now(),
            offset: Some(offset),
        };
        state.pending.lock().push_back(QueueItem {
            message,
            attempts: 0,
        });
        state.notify.notify_one();
        Ok(format!("{}-{}", queue, offset))
    }

    async fn receive(&self, queue: &str) -> Result<DeliveryStream, DriverError> {
        let state = self.queue(queue);
        let stream = futures_util::stream::unfold(state, |state| async move {
            loop {
                if state.closed.load(Ordering::Acquire) {
                    return None;
                }
                let item = state.pending.lock().pop_front();
                match item {
                    Some(item) => {
                        let message = item.message.clone();
                        let delivery_count = item.attempts + 1;
                        let acker = Arc::new(MemoryAcker {
                            state: state.clone(),
                            item: Mutex::new(Some(item)),
                        });
                        return Some((
                            Delivery {
                                message,
                                delivery_count,
                                acker,
                            },
                            state,
                        ));
                    }
                    None => state.notify.notified().await,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let pubsub = MemoryPubSub::new();
        let mut stream = pubsub.subscribe("events", "s1").await.unwrap();

        let id = pubsub
            .publish("events", Bytes::from("hello"), Headers::new())
            .await
            .unwrap();

        let message = timeout(Duration::from_millis(500), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.message_id, id);
        assert_eq!(message.payload, Bytes::from("hello"));
        assert_eq!(message.offset, Some(0));
    }

    #[tokio::test]
    async fn test_subscribe_from_offset_replays_backlog() {
        let pubsub = MemoryPubSub::new();
        for i in 0..5 {
            pubsub
                .publish("log", Bytes::from(format!("m{}", i)), Headers::new())
                .await
                .unwrap();
        }

        let mut stream = pubsub.subscribe_from("log", "s1", 3).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.offset, Some(3));
        let second = stream.next().await.unwrap();
        assert_eq!(second.offset, Some(4));

        // Live messages continue after the backlog without duplication.
        pubsub
            .publish("log", Bytes::from("m5"), Headers::new())
            .await
            .unwrap();
        let third = timeout(Duration::from_millis(500), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.offset, Some(5));
    }

    #[tokio::test]
    async fn test_queue_ack_removes() {
        let queue = MemoryQueue::new();
        queue
            .enqueue("jobs", Bytes::from("j1"), Headers::new())
            .await
            .unwrap();

        let mut stream = queue.receive("jobs").await.unwrap();
        let delivery = stream.next().await.unwrap();
        assert_eq!(delivery.delivery_count, 1);
        delivery.ack().await.unwrap();
        assert_eq!(queue.pending("jobs"), 0);
    }

    #[tokio::test]
    async fn test_queue_nack_redelivers_with_count() {
        let queue = MemoryQueue::new();
        queue
            .enqueue("jobs", Bytes::from("j1"), Headers::new())
            .await
            .unwrap();

        let mut stream = queue.receive("jobs").await.unwrap();
        let delivery = stream.next().await.unwrap();
        assert_eq!(delivery.delivery_count, 1);
        delivery.nack().await.unwrap();

        let redelivered = timeout(Duration::from_millis(500), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.delivery_count, 2);
        assert_eq!(redelivered.message.payload, Bytes::from("j1"));
    }
}
