//! Message broker abstraction for process control.
//!
//! Two delivery styles are supported:
//!
//! - exchanges: a message is published under a routing key and copied to
//!   every subscription whose pattern matches. A message nobody is bound to
//!   is reported as undeliverable.
//! - work queues: a message is handed to exactly one consumer, and buffered
//!   until one takes it.
//!
//! # Implementations
//!
//! - [`InMemoryBroker`]: In-process channel-based broker for testing and
//!   single-node deployments.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use remora_runtime::RefObjectStore;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};

/// Capacity of each subscription channel.
const CHANNEL_CAPACITY: usize = 256;

/// Brokers shared by every panel talking to the same URL.
pub type BrokerStore = RefObjectStore<String, Arc<dyn MessageBroker>>;

/// A message routed through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier, used to correlate replies.
    pub id: Uuid,
    /// Routing key on an exchange; informational on a queue.
    pub subject: String,
    /// Serialized payload (JSON).
    pub payload: Vec<u8>,
    /// Routing key on the same exchange that replies should be sent to.
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            payload: payload.into(),
            reply_to: None,
        }
    }

    /// Set the reply-to subject.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

/// Message broker trait.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a message on an exchange.
    ///
    /// Fails with [`ControlError::DeliveryFailed`] when no subscription
    /// matches the routing key or the broker is closed.
    async fn publish(&self, exchange: &str, message: Message) -> ControlResult<()>;

    /// Subscribe to the routing keys of `exchange` matching `pattern`.
    async fn subscribe(
        &self,
        exchange: &str,
        pattern: &str,
    ) -> ControlResult<Box<dyn MessageSubscription>>;

    /// Put a task on a durable work queue.
    async fn enqueue(&self, queue: &str, message: Message) -> ControlResult<()>;

    /// Start consuming a work queue.
    async fn consume(&self, queue: &str) -> ControlResult<Box<dyn MessageSubscription>>;

    /// Check if the broker is connected.
    async fn is_connected(&self) -> bool;

    /// Disconnect. Open subscriptions end and later publishes fail.
    async fn close(&self);
}

/// A stream of messages from a subscription or a queue consumer.
#[async_trait]
pub trait MessageSubscription: Send + Sync {
    /// Receive the next message. `None` once the broker has closed.
    async fn next(&mut self) -> ControlResult<Option<Message>>;

    /// Stop receiving.
    async fn unsubscribe(self: Box<Self>) -> ControlResult<()>;
}

struct Binding {
    exchange: String,
    pattern: String,
    sender: mpsc::Sender<Message>,
}

/// Tasks waiting on a queue. Consumers pull from the shared deque, so a
/// task is taken by exactly one of them and tasks leave in arrival order.
#[derive(Default)]
struct WorkQueue {
    tasks: Mutex<VecDeque<Message>>,
    available: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct BrokerState {
    bindings: Vec<Binding>,
    queues: FxHashMap<String, Arc<WorkQueue>>,
    closed: bool,
}

impl BrokerState {
    fn queue(&mut self, name: &str) -> Arc<WorkQueue> {
        Arc::clone(self.queues.entry(name.to_string()).or_default())
    }
}

/// In-memory message broker using tokio channels.
///
/// Suitable for testing and single-node deployments where all
/// components run in the same process.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create a new in-memory broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    /// Number of tasks on `queue` that no consumer has taken yet.
    pub async fn pending(&self, queue: &str) -> usize {
        let queue = self.state.lock().await.queues.get(queue).cloned();
        match queue {
            Some(queue) => queue.tasks.lock().await.len(),
            None => 0,
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn closed_error() -> ControlError {
    ControlError::DeliveryFailed("broker connection is closed".to_string())
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, exchange: &str, message: Message) -> ControlResult<()> {
        // Sending may wait for a slow subscriber; the broker lock is not held
        // meanwhile.
        let targets: Vec<mpsc::Sender<Message>> = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(closed_error());
            }
            state.bindings.retain(|binding| !binding.sender.is_closed());
            state
                .bindings
                .iter()
                .filter(|b| b.exchange == exchange && subject_matches(&b.pattern, &message.subject))
                .map(|b| b.sender.clone())
                .collect()
        };

        let mut delivered = 0;
        for sender in targets {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            return Err(ControlError::DeliveryFailed(format!(
                "no route for '{}' on exchange '{exchange}'",
                message.subject
            )));
        }
        debug!(exchange, subject = %message.subject, delivered, "Message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        pattern: &str,
    ) -> ControlResult<Box<dyn MessageSubscription>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(closed_error());
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        state.bindings.push(Binding {
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
            sender: tx,
        });
        Ok(Box::new(InMemorySubscription { receiver: rx }))
    }

    async fn enqueue(&self, queue: &str, message: Message) -> ControlResult<()> {
        let work_queue = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(closed_error());
            }
            state.queue(queue)
        };
        let waiting = {
            let mut tasks = work_queue.tasks.lock().await;
            tasks.push_back(message);
            tasks.len()
        };
        work_queue.available.notify_one();
        debug!(queue, waiting, "Task enqueued");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> ControlResult<Box<dyn MessageSubscription>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(closed_error());
        }
        Ok(Box::new(QueueConsumer {
            queue: state.queue(queue),
        }))
    }

    async fn is_connected(&self) -> bool {
        !self.state.lock().await.closed
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.bindings.clear();
        for queue in state.queues.values() {
            queue.closed.store(true, Ordering::Release);
            queue.available.notify_waiters();
        }
        debug!("In-memory broker closed");
    }
}

/// In-memory subscription backed by a tokio mpsc channel.
struct InMemorySubscription {
    receiver: mpsc::Receiver<Message>,
}

#[async_trait]
impl MessageSubscription for InMemorySubscription {
    async fn next(&mut self) -> ControlResult<Option<Message>> {
        Ok(self.receiver.recv().await)
    }

    async fn unsubscribe(self: Box<Self>) -> ControlResult<()> {
        // Dropping the receiver is sufficient
        Ok(())
    }
}

/// Consumer of a work queue.
struct QueueConsumer {
    queue: Arc<WorkQueue>,
}

#[async_trait]
impl MessageSubscription for QueueConsumer {
    async fn next(&mut self) -> ControlResult<Option<Message>> {
        loop {
            let notified = self.queue.available.notified();
            tokio::pin!(notified);
            // Register before checking so a task enqueued in between wakes us.
            notified.as_mut().enable();

            if self.queue.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            let mut tasks = self.queue.tasks.lock().await;
            if let Some(task) = tasks.pop_front() {
                if !tasks.is_empty() {
                    self.queue.available.notify_one();
                }
                return Ok(Some(task));
            }
            drop(tasks);
            notified.await;
        }
    }

    async fn unsubscribe(self: Box<Self>) -> ControlResult<()> {
        Ok(())
    }
}

/// Simple subject matching with wildcard support.
///
/// Supports `*` for single-token wildcards and `>` for multi-token wildcards.
pub(crate) fn subject_matches(pattern: &str, subject: &str) -> bool {
    if pattern == ">" || pattern == subject {
        return true;
    }

    let mut pattern_parts = pattern.split('.');
    let mut subject_parts = subject.split('.');

    loop {
        match (pattern_parts.next(), subject_parts.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(token), Some(part)) if token == part => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
