//! Inbound event routing.
//!
//! Decodes text frames into typed events and hands each event to every
//! handler subscribed to its kind, in registration order. Malformed frames
//! are dropped before any handler runs. A handler that fails (or panics) is
//! logged and skipped; the remaining handlers still see the event.
//!
//! Handlers receive mutable access to a shared state value `S` and return
//! follow-up actions `A` for the caller to execute. Subscriptions are tagged
//! with a [`SubscriberOwner`] so a component can withdraw all of its handlers
//! at once when it is torn down.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use chatsync_proto::{EventKind, InboundEvent};
use chrono::NaiveDateTime;
use tracing::{debug, trace, warn};

use crate::error::HandlerError;

/// Result returned by a handler.
pub type HandlerResult<A> = Result<Vec<A>, HandlerError>;

type Handler<S, A> = Box<dyn FnMut(&mut S, &Delivery) -> HandlerResult<A> + Send>;

/// A decoded event together with its local receipt time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The event
    pub event: InboundEvent,
    /// When the frame was received (wall clock)
    pub received_at: NaiveDateTime,
}

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Component that owns a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriberOwner {
    /// Room list reconciliation
    Rooms,
    /// Message stream of the open room
    MessageStream,
    /// Friend presence tracking
    Presence,
    /// Application code outside the engine
    External(String),
}

impl fmt::Display for SubscriberOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rooms => f.write_str("rooms"),
            Self::MessageStream => f.write_str("message-stream"),
            Self::Presence => f.write_str("presence"),
            Self::External(name) => write!(f, "external:{name}"),
        }
    }
}

struct Subscription<S, A> {
    id: SubscriptionId,
    kind: EventKind,
    owner: SubscriberOwner,
    handler: Handler<S, A>,
}

/// Routes decoded events to subscribed handlers.
pub struct Dispatcher<S, A> {
    subscriptions: Vec<Subscription<S, A>>,
    next_id: u64,
}

impl<S, A> Default for Dispatcher<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> fmt::Debug for Dispatcher<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.subscriptions.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<S, A> Dispatcher<S, A> {
    /// Create a dispatcher with no subscriptions.
    pub fn new() -> Self {
        Self { subscriptions: Vec::new(), next_id: 0 }
    }

    /// Register `handler` for events of `kind`.
    ///
    /// Handlers for the same kind run in the order they were registered.
    pub fn subscribe<F>(&mut self, kind: EventKind, owner: SubscriberOwner, handler: F) -> SubscriptionId
    where
        F: FnMut(&mut S, &Delivery) -> HandlerResult<A> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        debug!(?kind, %owner, id = id.0, "subscribed");

        self.subscriptions.push(Subscription { id, kind, owner, handler: Box::new(handler) });
        id
    }

    /// Remove a single subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| sub.id != id);
        before != self.subscriptions.len()
    }

    /// Remove every subscription held by `owner`. Returns how many were removed.
    pub fn unsubscribe_owner(&mut self, owner: &SubscriberOwner) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| &sub.owner != owner);
        let removed = before - self.subscriptions.len();
        if removed > 0 {
            debug!(%owner, removed, "unsubscribed owner");
        }
        removed
    }

    /// Returns true if `owner` holds at least one subscription.
    pub fn is_subscribed(&self, owner: &SubscriberOwner) -> bool {
        self.subscriptions.iter().any(|sub| &sub.owner == owner)
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions.iter().filter(|sub| sub.kind == kind).count()
    }

    /// Decode a text frame. Malformed or unsupported frames yield `None`.
    pub fn decode(text: &str, received_at: NaiveDateTime) -> Option<Delivery> {
        match InboundEvent::decode(text) {
            Ok(event) => Some(Delivery { event, received_at }),
            Err(err) if err.is_semantic() => {
                debug!(error = %err, "dropping unusable frame");
                None
            },
            Err(err) => {
                debug!(error = %err, len = text.len(), "dropping malformed frame");
                None
            },
        }
    }

    /// Decode `text` and dispatch it. Malformed frames produce no actions.
    pub fn dispatch_text(&mut self, state: &mut S, text: &str, received_at: NaiveDateTime) -> Vec<A> {
        match Self::decode(text, received_at) {
            Some(delivery) => self.dispatch(state, &delivery),
            None => Vec::new(),
        }
    }

    /// Invoke every handler subscribed to the event's kind, in registration
    /// order, collecting their actions.
    pub fn dispatch(&mut self, state: &mut S, delivery: &Delivery) -> Vec<A> {
        let kind = delivery.event.kind();
        let mut actions = Vec::new();

        for sub in self.subscriptions.iter_mut().filter(|sub| sub.kind == kind) {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(state, delivery)));

            match outcome {
                Ok(Ok(produced)) => {
                    trace!(?kind, owner = %sub.owner, actions = produced.len(), "handled");
                    actions.extend(produced);
                },
                Ok(Err(err)) => {
                    warn!(?kind, owner = %sub.owner, error = %err, "event handler failed");
                },
                Err(payload) => {
                    warn!(
                        ?kind,
                        owner = %sub.owner,
                        panic = panic_message(payload.as_ref()),
                        "event handler panicked"
                    );
                },
            }
        }

        actions
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
