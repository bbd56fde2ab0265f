//! Subscription registry and message dispatch.
//!
//! Many independent consumers share one connection. Each registers a handler
//! either for one entity id or globally; the registry routes every inbound
//! message to the matching handlers. Registrations outlive individual
//! connections, so consumers never resubscribe after a reconnect.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::types::EntityId;

/// Callback invoked for every message routed to a subscription.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Change in the set of entities the client is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterestChange {
    /// A handler was registered for the entity
    Subscribed(EntityId),
    /// The last handler for the entity was removed
    Unsubscribed(EntityId),
}

/// Outcome of one `dispatch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned normally
    pub delivered: usize,
    /// Handlers that panicked
    pub failed: usize,
}

struct HandlerEntry {
    token: u64,
    handler: Handler,
}

#[derive(Default)]
struct RegistryInner {
    next_token: u64,
    entities: BTreeMap<EntityId, Vec<HandlerEntry>>,
    global: Vec<HandlerEntry>,
    listener: Option<mpsc::UnboundedSender<InterestChange>>,
}

impl RegistryInner {
    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn notify(&mut self, change: InterestChange) {
        if let Some(listener) = &self.listener {
            if listener.send(change).is_err() {
                // receiver is gone; the connection that attached it has ended
                self.listener = None;
            }
        }
    }

    fn remove(&mut self, target: &Target, token: u64) {
        match target {
            Target::Global => self.global.retain(|entry| entry.token != token),
            Target::Entity(id) => {
                let Some(entries) = self.entities.get_mut(id) else {
                    return;
                };
                entries.retain(|entry| entry.token != token);
                if entries.is_empty() {
                    self.entities.remove(id);
                    tracing::debug!(entity_id = %id, "Last handler removed");
                    self.notify(InterestChange::Unsubscribed(id.clone()));
                }
            }
        }
    }
}

#[derive(Debug)]
enum Target {
    Entity(EntityId),
    Global,
}

/// Shared, cloneable registry of entity and global handlers.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages about `entity_id`.
    pub fn subscribe_entity<F>(&self, entity_id: impl Into<EntityId>, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let entity_id = entity_id.into();
        let mut inner = self.inner.lock();
        let token = inner.issue_token();
        inner
            .entities
            .entry(entity_id.clone())
            .or_default()
            .push(HandlerEntry {
                token,
                handler: Arc::new(handler),
            });
        inner.notify(InterestChange::Subscribed(entity_id.clone()));
        drop(inner);

        tracing::debug!(entity_id = %entity_id, token, "Entity handler registered");
        self.guard(Target::Entity(entity_id), token)
    }

    /// Register `handler` for every dispatched message.
    pub fn subscribe_global<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let token = inner.issue_token();
        inner.global.push(HandlerEntry {
            token,
            handler: Arc::new(handler),
        });
        drop(inner);

        tracing::debug!(token, "Global handler registered");
        self.guard(Target::Global, token)
    }

    fn guard(&self, target: Target, token: u64) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.inner),
            target,
            token,
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `message` to entity handlers, then global handlers.
    ///
    /// Handlers run in registration order, outside the registry lock, so they
    /// may subscribe or unsubscribe themselves. A panicking handler is logged
    /// and skipped; the rest still run. Liveness messages reach nobody.
    pub fn dispatch(&self, message: &Message) -> DispatchReport {
        self.dispatch_while(message, || true)
    }

    /// Like [`dispatch`](Self::dispatch), but `keep_going` is checked before
    /// every handler and delivery stops as soon as it returns false.
    ///
    /// The connection manager passes its session liveness flag here, so a
    /// handler that disconnects prevents the remaining handlers from running.
    pub fn dispatch_while<F>(&self, message: &Message, keep_going: F) -> DispatchReport
    where
        F: Fn() -> bool,
    {
        let mut report = DispatchReport::default();
        if message.is_control() {
            return report;
        }

        let handlers: Vec<Handler> = {
            let inner = self.inner.lock();
            let entity_handlers = message
                .entity_id()
                .and_then(|id| inner.entities.get(id))
                .into_iter()
                .flatten();
            entity_handlers
                .chain(inner.global.iter())
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        for handler in handlers {
            if !keep_going() {
                tracing::debug!(kind = message.kind(), "Dispatch cut short, session ended");
                break;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    tracing::warn!(
                        kind = message.kind(),
                        entity_id = ?message.entity_id(),
                        "Handler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        report
    }

    /// All entity ids with at least one handler, in sorted order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.inner.lock().entities.keys().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.inner.lock().entities.len()
    }

    /// Number of handlers registered for `entity_id`.
    pub fn handler_count(&self, entity_id: &EntityId) -> usize {
        self.inner
            .lock()
            .entities
            .get(entity_id)
            .map_or(0, Vec::len)
    }

    pub fn global_count(&self) -> usize {
        self.inner.lock().global.len()
    }

    /// True when no entity or global handler is registered.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.entities.is_empty() && inner.global.is_empty()
    }

    /// Route interest changes to `listener`, replacing any previous one.
    pub fn attach_listener(&self, listener: mpsc::UnboundedSender<InterestChange>) {
        self.inner.lock().listener = Some(listener);
    }

    pub fn detach_listener(&self) {
        self.inner.lock().listener = None;
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("entities", &inner.entities.len())
            .field("global_handlers", &inner.global.len())
            .field("listener_attached", &inner.listener.is_some())
            .finish()
    }
}

/// Disposer for a registered handler.
///
/// `unsubscribe` may be called any number of times; only the first call has an
/// effect. Dropping the guard unsubscribes as well.
#[must_use = "dropping a Subscription unsubscribes its handler"]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<RegistryInner>>,
    target: Target,
    token: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().remove(&self.target, self.token);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.registry.strong_count() > 0
    }

    /// The entity this subscription listens to; `None` for global handlers.
    pub fn entity_id(&self) -> Option<&EntityId> {
        match &self.target {
            Target::Entity(id) => Some(id),
            Target::Global => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
