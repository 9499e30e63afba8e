//! Listener hub: fan-out of state changes, events and errors.
//!
//! Each subscriber owns an unbounded channel. The manager actor pushes
//! every notification into every channel without waiting, so a slow
//! observer only grows its own queue. Order per subscriber is the order in
//! which the actor published.
//!
//! Two ways to observe:
//!
//! - [`ListenerHub::subscribe`] returns a [`Subscription`] to poll with
//!   `recv().await`. Dropping it unsubscribes.
//! - [`ListenerHub::add_listener`] takes a [`SocketListener`] and spawns a
//!   dispatch task that calls it for each notification.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::decoder::ApplicationEvent;
use crate::error::ChatError;
use crate::state::ConnectionState;

/// Callback-style observer.
///
/// Every method has an empty default so implementors pick what they need.
pub trait SocketListener: Send + Sync + 'static {
    /// The connection state changed.
    fn on_state_changed(&self, _state: &ConnectionState) {}

    /// An application event arrived.
    fn on_event(&self, _event: &ApplicationEvent) {}

    /// An error was observed (any classification).
    fn on_error(&self, _error: &ChatError) {}
}

/// One item delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// New connection state.
    StateChanged(ConnectionState),
    /// Decoded application event.
    Event(ApplicationEvent),
    /// Classified error.
    Error(ChatError),
}

/// Identifier of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<Notification>>>,
}

impl Registry {
    fn insert(&self, tx: mpsc::UnboundedSender<Notification>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("listener lock poisoned")
            .insert(id, tx);
        ListenerId(id)
    }

    fn remove(&self, id: ListenerId) -> bool {
        self.subscribers
            .lock()
            .expect("listener lock poisoned")
            .remove(&id.0)
            .is_some()
    }
}

/// Registry of subscribers. Cheap to clone; clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct ListenerHub {
    registry: Arc<Registry>,
}

impl ListenerHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.insert(tx);
        log::debug!("[Listeners] Subscriber {:?} added", id);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Register a callback listener served by its own dispatch task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_listener(&self, listener: Arc<dyn SocketListener>) -> ListenerId {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let id = self.registry.insert(tx);
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                match &notification {
                    Notification::StateChanged(state) => listener.on_state_changed(state),
                    Notification::Event(event) => listener.on_event(event),
                    Notification::Error(error) => listener.on_error(error),
                }
            }
            log::debug!("[Listeners] Dispatch task for {:?} finished", id);
        });
        id
    }

    /// Unregister a subscriber. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .expect("listener lock poisoned")
            .len()
    }

    /// Whether nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a state change.
    pub fn state_changed(&self, state: &ConnectionState) {
        self.publish(&Notification::StateChanged(state.clone()));
    }

    /// Publish an application event.
    pub fn event(&self, event: &ApplicationEvent) {
        self.publish(&Notification::Event(event.clone()));
    }

    /// Publish an error.
    pub fn error(&self, error: &ChatError) {
        self.publish(&Notification::Error(error.clone()));
    }

    fn publish(&self, notification: &Notification) {
        if self.is_empty() {
            return;
        }
        let mut subscribers = self
            .registry
            .subscribers
            .lock()
            .expect("listener lock poisoned");
        subscribers.retain(|id, tx| {
            let delivered = tx.send(notification.clone()).is_ok();
            if !delivered {
                log::debug!("[Listeners] Pruning closed subscriber {}", id);
            }
            delivered
        });
    }
}

/// Channel-backed subscription. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<Notification>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// This subscription's id.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next notification. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Next notification if one is queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
