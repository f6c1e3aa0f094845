//! The pulse: one shared periodic signal instead of a timer per waiter.
//!
//! Anything that has work pending on the next pulse subscribes with a
//! key and holds the returned [`PulseSubscription`]. Whoever drives the
//! pulse (a [`Scheduler`](crate::Scheduler) job) asks for the current
//! [`subscribers`](Pulse::subscribers) on every tick. Dropping the
//! subscription unsubscribes, so a waiter that goes away can't leave a
//! dangling entry.
//!
//! Idle waiters cost nothing: the set only holds keys with pending work.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared subscriber set. Cheap to clone; all clones see the same set.
pub struct Pulse<K: Ord + Clone> {
    waiting: Arc<Mutex<BTreeSet<K>>>,
}

impl<K: Ord + Clone> Pulse<K> {
    pub fn new() -> Self {
        Self {
            waiting: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Registers `key` for the next pulse.
    ///
    /// Callers hold at most one subscription per key: the set keeps a
    /// single entry per key, and the first drop removes it.
    pub fn subscribe(&self, key: K) -> PulseSubscription<K> {
        self.lock().insert(key.clone());
        PulseSubscription {
            key,
            waiting: Arc::clone(&self.waiting),
        }
    }

    /// Snapshot of the currently subscribed keys, in key order.
    pub fn subscribers(&self) -> Vec<K> {
        self.lock().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Critical sections never panic, so a poisoned lock still holds a
    // consistent set.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<K>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Ord + Clone> Clone for Pulse<K> {
    fn clone(&self) -> Self {
        Self {
            waiting: Arc::clone(&self.waiting),
        }
    }
}

impl<K: Ord + Clone> Default for Pulse<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> fmt::Debug for Pulse<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pulse").field("waiting", &self.len()).finish()
    }
}

/// Proof of a pending pulse subscription. Unsubscribes on drop.
pub struct PulseSubscription<K: Ord + Clone> {
    key: K,
    waiting: Arc<Mutex<BTreeSet<K>>>,
}

impl<K: Ord + Clone> PulseSubscription<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Ord + Clone> Drop for PulseSubscription<K> {
    fn drop(&mut self) {
        self.waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl<K: Ord + Clone + fmt::Debug> fmt::Debug for PulseSubscription<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseSubscription").field("key", &self.key).finish()
    }
}
