//! Per-topic subscriber sets

use livefeed_core::{QueueItem, Topic, Transaction};
use livefeed_networking::websocket::call_guarded;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Subscriber callback: `(value, is_initial_load)`
pub type Callback<T> = Arc<dyn Fn(&T, bool) + Send + Sync>;
pub type QueueCallback = Callback<[QueueItem]>;
pub type TransactionCallback = Callback<[Transaction]>;
pub type MessageCallback = Callback<Value>;

/// Handle returned by `subscribe`; pass it back to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub topic: Topic,
    id: u64,
}

/// Callbacks for one topic
pub struct SubscriberSet<T: ?Sized> {
    topic: Topic,
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, Callback<T>>>,
}

fn same_callback<T: ?Sized>(a: &Callback<T>, b: &Callback<T>) -> bool {
    // Data pointers only; vtable addresses are not stable across codegen units
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl<T: ?Sized> SubscriberSet<T> {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Callback<T>>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Register `callback`; the same `Arc` twice yields the same subscription
    pub fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let mut callbacks = self.lock();
        if let Some((&id, _)) = callbacks
            .iter()
            .find(|(_, existing)| same_callback(existing, &callback))
        {
            return Subscription {
                topic: self.topic,
                id,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        callbacks.insert(id, callback);
        debug!("Subscriber {} added to {}", id, self.topic);
        Subscription {
            topic: self.topic,
            id,
        }
    }

    /// Returns false for unknown handles or handles of another topic
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        if subscription.topic != self.topic {
            return false;
        }
        self.lock().remove(&subscription.id).is_some()
    }

    /// Deliver `value` to every subscriber; returns how many returned normally
    pub fn publish(&self, value: &T, is_initial_load: bool) -> usize {
        let mut snapshot: Vec<(u64, Callback<T>)> = self
            .lock()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);

        let context = self.topic.to_string();
        snapshot
            .into_iter()
            .filter(|(_, cb)| call_guarded(&context, || cb(value, is_initial_load)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T: ?Sized> fmt::Debug for SubscriberSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("topic", &self.topic)
            .field("subscribers", &self.len())
            .finish()
    }
}

/// The three topics the feed publishes
#[derive(Debug)]
pub struct SubscriberRegistry {
    queue: SubscriberSet<[QueueItem]>,
    transactions: SubscriberSet<[Transaction]>,
    messages: SubscriberSet<Value>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            queue: SubscriberSet::new(Topic::QueueUpdates),
            transactions: SubscriberSet::new(Topic::TransactionUpdates),
            messages: SubscriberSet::new(Topic::RawMessages),
        }
    }

    pub fn subscribe_to_queue_updates(&self, callback: QueueCallback) -> Subscription {
        self.queue.subscribe(callback)
    }

    pub fn subscribe_to_transaction_updates(&self, callback: TransactionCallback) -> Subscription {
        self.transactions.subscribe(callback)
    }

    pub fn subscribe_to_messages(&self, callback: MessageCallback) -> Subscription {
        self.messages.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        match subscription.topic {
            Topic::QueueUpdates => self.queue.unsubscribe(subscription),
            Topic::TransactionUpdates => self.transactions.unsubscribe(subscription),
            Topic::RawMessages => self.messages.unsubscribe(subscription),
        }
    }

    pub fn publish_queue(&self, items: &[QueueItem], is_initial_load: bool) -> usize {
        self.queue.publish(items, is_initial_load)
    }

    pub fn publish_transactions(&self, transactions: &[Transaction], is_initial_load: bool) -> usize {
        self.transactions.publish(transactions, is_initial_load)
    }

    pub fn publish_message(&self, message: &Value, is_initial_load: bool) -> usize {
        self.messages.publish(message, is_initial_load)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        match topic {
            Topic::QueueUpdates => self.queue.len(),
            Topic::TransactionUpdates => self.transactions.len(),
            Topic::RawMessages => self.messages.len(),
        }
    }
}
