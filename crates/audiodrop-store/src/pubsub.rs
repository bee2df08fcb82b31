//! Channel subscription registry.
//!
//! Callbacks are synchronous. Delivery happens on the publishing thread in
//! registration order, after the registry lock has been released, so a
//! callback may itself use the store.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A message callback.
pub type Callback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    channel: String,
    callback: Callback,
}

/// Registered subscribers for all channels.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    entries: RwLock<Vec<Subscription>>,
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.entries.read().len())
            .finish()
    }
}

impl Subscribers {
    /// Register a callback for `channel`.
    pub fn add(&self, channel: &str, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Subscription {
            id,
            channel: channel.to_string(),
            callback,
        });
        id
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| s.id != id);
        entries.len() != before
    }

    /// Deliver `message` to every subscriber of `channel`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn deliver(&self, channel: &str, message: &str) -> usize {
        let targets: Vec<Callback> = self
            .entries
            .read()
            .iter()
            .filter(|s| s.channel == channel)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in &targets {
            callback(channel, message);
        }
        targets.len()
    }

    /// Number of subscriptions on `channel`.
    pub fn count(&self, channel: &str) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|s| s.channel == channel)
            .count()
    }
}
