//! Bounded fan-out of messages to registered handlers.
//!
//! Each subscription gets its own bounded channel and delivery task, so one
//! slow handler cannot block the publisher. Publishing is non-blocking: a
//! full channel drops that subscriber's copy with a warning, which is the
//! backpressure contract everywhere in the server.

use crate::utils::{IdGenerator, SequentialIdGenerator};
use log::warn;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Capacity of each subscription's delivery channel.
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 100;

pub struct SubscriptionManager<T> {
    subscriptions: Mutex<HashMap<String, mpsc::Sender<T>>>,
    id_gen: SequentialIdGenerator,
}

impl<T: Send + 'static> SubscriptionManager<T> {
    /// `prefix` namespaces the subscription ids, e.g. `"room1-sub-"`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            id_gen: SequentialIdGenerator::new(prefix),
        }
    }

    /// Registers a handler and spawns its delivery task. The returned id is
    /// process-unique within this manager.
    pub fn subscribe<F>(&self, handler: F) -> String
    where
        F: Fn(T) + Send + 'static,
    {
        let id = self.id_gen.generate_id();
        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            // Exits when the sender is dropped and the channel drains.
            while let Some(msg) = rx.recv().await {
                handler(msg);
            }
        });

        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .insert(id.clone(), tx);
        id
    }

    /// Delivers a copy of `msg` to every live subscription, dropping for the
    /// ones whose channels are full and pruning the ones whose delivery
    /// tasks are gone.
    pub fn publish(&self, msg: T)
    where
        T: Clone,
    {
        let mut dead = Vec::new();
        {
            let subscriptions = self
                .subscriptions
                .lock()
                .expect("subscription lock poisoned");
            for (id, tx) in subscriptions.iter() {
                match tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("subscription {id} channel full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(id.clone());
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .expect("subscription lock poisoned");
            for id in dead {
                subscriptions.remove(&id);
            }
        }
    }

    /// Closes a subscription; its delivery task exits once it drains.
    pub fn unsubscribe(&self, id: &str) {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .remove(id);
    }

    pub fn clear(&self) {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn settle() {
        // Let delivery tasks run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let manager: SubscriptionManager<u32> = SubscriptionManager::new("test-sub-");
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a2 = Arc::clone(&a);
        manager.subscribe(move |v| {
            a2.fetch_add(v as usize, Ordering::SeqCst);
        });
        let b2 = Arc::clone(&b);
        manager.subscribe(move |v| {
            b2.fetch_add(v as usize, Ordering::SeqCst);
        });

        manager.publish(5);
        settle().await;

        assert_eq!(a.load(Ordering::SeqCst), 5);
        assert_eq!(b.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let manager: SubscriptionManager<u32> = SubscriptionManager::new("test-sub-");
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = Arc::clone(&count);
        let id = manager.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        manager.publish(1);
        settle().await;
        manager.unsubscribe(&id);
        manager.publish(2);
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn ids_are_unique_and_prefixed() {
        let manager: SubscriptionManager<u32> = SubscriptionManager::new("c7-sub-");
        let first = manager.subscribe(|_| {});
        let second = manager.subscribe(|_| {});
        assert_ne!(first, second);
        assert!(first.starts_with("c7-sub-"));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn clear_removes_all_subscriptions() {
        let manager: SubscriptionManager<u32> = SubscriptionManager::new("test-sub-");
        manager.subscribe(|_| {});
        manager.subscribe(|_| {});
        manager.clear();
        assert!(manager.is_empty());
        // Publishing after clear is a harmless no-op.
        manager.publish(1);
    }
}
