//! In-process publish/subscribe registry
//!
//! Producers publish events by name instead of calling consumers directly, so
//! the tracker has no compile-time knowledge of the sinks that persist its
//! sessions. Dispatch is synchronous: `publish` returns once every handler
//! has run. A failing or panicking handler is logged and skipped; it never
//! reaches the publisher and never stops the remaining handlers.

use crate::analytics::AggregateAnalytics;
use crate::types::{Result, Track};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Event published when a track transitions to `Completed`
pub const SESSION_COMPLETED: &str = "session_completed";

/// Event published once the aggregate analytics of a run are available
pub const AGGREGATE_READY: &str = "aggregate_ready";

/// Error type a handler may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by every handler
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A registered event handler
///
/// Handler identity is the `Arc` allocation: keep a clone of the handle to
/// unsubscribe it later.
pub type Handler = Arc<dyn Fn(&str, &EventPayload) -> HandlerResult + Send + Sync>;

/// Data carried by a published event
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A finalized session
    SessionCompleted(Track),
    /// Summary over all completed sessions
    AggregateReady(AggregateAnalytics),
    /// Free-form payload for application-defined events
    Custom(serde_json::Value),
}

impl EventPayload {
    /// Serialize `value` into a `Custom` payload
    pub fn custom<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(EventPayload::Custom(serde_json::to_value(value)?))
    }

    /// The session carried by a `SessionCompleted` payload
    pub fn as_session(&self) -> Option<&Track> {
        match self {
            EventPayload::SessionCompleted(track) => Some(track),
            _ => None,
        }
    }

    /// The aggregate carried by an `AggregateReady` payload
    pub fn as_aggregate(&self) -> Option<&AggregateAnalytics> {
        match self {
            EventPayload::AggregateReady(aggregate) => Some(aggregate),
            _ => None,
        }
    }
}

/// Result of a single `publish` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Handlers that returned `Ok`
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked
    pub failed: usize,
}

/// Synchronous event bus keyed by event-type name
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`
    ///
    /// Registrations are cumulative: subscribing the same handle twice makes
    /// it run twice per publish.
    pub fn subscribe(&self, event_type: &str, handler: Handler) {
        log::debug!("Subscribing handler to '{}'", event_type);
        self.write()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Wrap a closure as a handler, register it, and return its handle
    pub fn subscribe_fn<F>(&self, event_type: &str, handler: F) -> Handler
    where
        F: Fn(&str, &EventPayload) -> HandlerResult + Send + Sync + 'static,
    {
        let handle: Handler = Arc::new(handler);
        self.subscribe(event_type, Arc::clone(&handle));
        handle
    }

    /// Remove the first registration of `handler` for `event_type`
    ///
    /// Removing a handler that is not registered is a no-op.
    pub fn unsubscribe(&self, event_type: &str, handler: &Handler) {
        let mut subscribers = self.write();
        let Some(handlers) = subscribers.get_mut(event_type) else {
            log::trace!("Unsubscribe from '{}' ignored: no subscribers", event_type);
            return;
        };

        match handlers.iter().position(|h| same_handler(h, handler)) {
            Some(index) => {
                handlers.remove(index);
                log::debug!("Unsubscribed handler from '{}'", event_type);
            }
            None => log::trace!("Unsubscribe from '{}' ignored: handler not registered", event_type),
        }

        if handlers.is_empty() {
            subscribers.remove(event_type);
        }
    }

    /// Deliver `payload` to every handler currently registered for `event_type`
    ///
    /// Handlers run in subscription order, outside the registry lock, so a
    /// handler may subscribe or unsubscribe; such changes apply from the next
    /// publish.
    pub fn publish(&self, event_type: &str, payload: &EventPayload) -> PublishOutcome {
        let handlers: Vec<Handler> = match self.read().get(event_type) {
            Some(handlers) => handlers.clone(),
            None => {
                log::trace!("No subscribers for '{}'", event_type);
                return PublishOutcome::default();
            }
        };

        let mut outcome = PublishOutcome::default();
        for handler in &handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(event_type, payload)));
            match result {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    log::error!("Error in event handler for '{}': {}", event_type, e);
                }
                Err(panic) => {
                    outcome.failed += 1;
                    log::error!(
                        "Event handler for '{}' panicked: {}",
                        event_type,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        outcome
    }

    /// Number of handlers registered for `event_type` (0 for unknown types)
    pub fn get_subscriber_count(&self, event_type: &str) -> usize {
        self.read().get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one subscriber, sorted by name
    pub fn list_event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        types.sort();
        types
    }

    // Handlers never run under the lock, so poisoning can only come from a
    // panic inside the bus itself; the map is still consistent in that case.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Handler>>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Handler>>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = self
            .read()
            .iter()
            .map(|(name, handlers)| (name.clone(), handlers.len()))
            .collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

/// Compare handler allocations, ignoring vtable pointers
fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
