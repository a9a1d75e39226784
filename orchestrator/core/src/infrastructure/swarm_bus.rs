// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Swarm Bus - Topic Pub/Sub for Swarm Messages
//
// Synchronous, in-process delivery to topic subscribers plus a tokio broadcast
// mirror for observers (CLI monitor, tests).
//
// Delivery is at-most-once and fire-and-forget: nothing is persisted, and a
// subscriber that errors or panics never affects the publisher or the other
// subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::domain::message::{MessageId, SwarmMessage};

const SLOW_HANDLER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("bus closed")]
    Closed,

    #[error("receiver lagged by {0} messages")]
    Lagged(u64),

    #[error("no message available")]
    Empty,
}

pub type MessageHandler = Arc<dyn Fn(&SwarmMessage) -> Result<(), BusError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: MessageHandler,
}

impl Subscription {
    /// Exact topic, or a prefix when the pattern ends in `*`.
    fn matches(&self, topic: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => topic.starts_with(prefix),
            None => self.pattern == topic,
        }
    }
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub delivered: usize,
    pub failed: usize,
}

/// Topic-based message bus for one process.
#[derive(Clone)]
pub struct SwarmBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
    observers: Arc<broadcast::Sender<SwarmMessage>>,
}

impl SwarmBus {
    /// `capacity` bounds the observer channel; slow observers lose the oldest
    /// messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            observers: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    pub fn subscribe<F>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&SwarmMessage) -> Result<(), BusError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pattern = pattern.into();
        debug!(subscription = id.0, pattern = %pattern, "Subscribed");
        self.subscriptions.write().push(Subscription {
            id,
            pattern,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Delivers `message` to every matching subscriber, in subscription order.
    ///
    /// Handlers run outside the subscription lock, so they may publish or
    /// (un)subscribe themselves.
    pub fn publish(&self, message: SwarmMessage) -> DeliveryReport {
        let handlers: Vec<(SubscriptionId, MessageHandler)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.matches(&message.topic))
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        counter!("hive_mind_messages_published_total", "type" => message.message_type.as_str()).increment(1);

        let mut report = DeliveryReport {
            message_id: message.id,
            delivered: 0,
            failed: 0,
        };

        for (id, handler) in handlers {
            let started = Instant::now();
            match catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(subscription = id.0, topic = %message.topic, error = %e, "Message handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    error!(subscription = id.0, topic = %message.topic, "Message handler panicked");
                }
            }
            let elapsed = started.elapsed();
            if elapsed > SLOW_HANDLER {
                warn!(subscription = id.0, topic = %message.topic, ?elapsed, "Slow message handler");
            }
        }

        if report.failed > 0 {
            counter!("hive_mind_message_handler_failures_total").increment(report.failed as u64);
        }

        // Observers are best effort; no receivers is not an error.
        let _ = self.observers.send(message);
        report
    }

    /// Stream of every message published from now on.
    pub fn observe(&self) -> MessageReceiver {
        MessageReceiver {
            receiver: self.observers.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for SwarmBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct MessageReceiver {
    receiver: broadcast::Receiver<SwarmMessage>,
}

impl MessageReceiver {
    pub async fn recv(&mut self) -> Result<SwarmMessage, BusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Message observer lagged by {} messages", n);
                BusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<SwarmMessage, BusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => BusError::Empty,
            broadcast::error::TryRecvError::Closed => BusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => BusError::Lagged(n),
        })
    }
}
