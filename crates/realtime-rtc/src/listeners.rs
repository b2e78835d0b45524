//! Listener registration with explicit disposal.
//!
//! Connection objects fan events out to any number of subscribers. Each
//! subscription hands back a [`Subscription`] whose disposal (explicit or on
//! drop) removes the listener, so teardown never depends on closures being
//! collected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Registry<T> {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<T>>,
}

/// A set of listeners receiving clones of every emitted event.
pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }
}

impl<T: Clone + Send + 'static> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Events flow into the returned receiver until the
    /// subscription is disposed.
    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = lock(&self.inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.senders.insert(id, tx);
            id
        };
        let weak = Arc::downgrade(&self.inner);
        let subscription = Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).senders.remove(&id);
            }
        });
        (subscription, rx)
    }

    /// Delivers `event` to every live listener and returns how many received it.
    /// Listeners whose receiver was dropped are pruned.
    pub fn emit(&self, event: T) -> usize {
        let mut registry = lock(&self.inner);
        registry
            .senders
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        registry.senders.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(inner: &Mutex<Registry<T>>) -> std::sync::MutexGuard<'_, Registry<T>> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Disposer for a registered listener.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Removes the listener now. Dropping the subscription has the same effect.
    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let listeners = Listeners::new();
        let (_a, mut rx_a) = listeners.subscribe();
        let (_b, mut rx_b) = listeners.subscribe();

        assert_eq!(listeners.emit("open"), 2);
        assert_eq!(rx_a.recv().await, Some("open"));
        assert_eq!(rx_b.recv().await, Some("open"));
    }

    #[tokio::test]
    async fn test_dispose_unregisters_listener() {
        let listeners = Listeners::new();
        let (subscription, mut rx) = listeners.subscribe();
        subscription.dispose();

        assert!(listeners.is_empty());
        assert_eq!(listeners.emit(1u8), 0);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_drop_unregisters_listener() {
        let listeners: Listeners<u8> = Listeners::new();
        {
            let (_subscription, _rx) = listeners.subscribe();
            assert_eq!(listeners.len(), 1);
        }
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let listeners: Listeners<u8> = Listeners::new();
        let (_subscription, rx) = listeners.subscribe();
        drop(rx);
        assert_eq!(listeners.emit(7), 0);
    }
}
