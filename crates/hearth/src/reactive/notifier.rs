//! Notifier<T>: synchronous fan-out of change events and state snapshots.
//!
//! Delivery walks a copy of the subscriber list taken when `notify` starts,
//! so a subscriber cancelled mid-delivery may still see that round and one
//! added mid-delivery starts with the next. No lock is held while a
//! subscriber runs; subscribers may subscribe, cancel or notify re-entrantly.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::Unsubscribe;

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_seq: u64,
    /// Keyed by subscription order.
    subscribers: BTreeMap<u64, Subscriber<T>>,
}

pub struct Notifier<T> {
    registry: Mutex<Registry<T>>,
}

impl<T: 'static> Notifier<T> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_seq: 0,
                subscribers: BTreeMap::new(),
            }),
        }
    }

    /// Register `callback`. The returned closure cancels it; cancelling after
    /// the notifier is gone is a no-op.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(&T) + Send + Sync + 'static) -> Unsubscribe {
        let seq = {
            let mut registry = self.registry.lock();
            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.subscribers.insert(seq, Arc::new(callback));
            seq
        };
        let notifier: Weak<Self> = Arc::downgrade(self);
        Box::new(move || {
            if let Some(notifier) = notifier.upgrade() {
                notifier.registry.lock().subscribers.remove(&seq);
            }
        })
    }

    /// Deliver `event` to every current subscriber, oldest first. Returns how
    /// many were called.
    pub fn notify(&self, event: &T) -> usize {
        let round: Vec<Subscriber<T>> = self.registry.lock().subscribers.values().cloned().collect();
        for subscriber in &round {
            subscriber(event);
        }
        round.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

impl<T: 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}
