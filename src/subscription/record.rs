//! Subscription record and lifecycle.
//!
//! ```text
//!            subscribe sent          confirm_subscription
//! Pending ─────────────────► Subscribing ─────────────────► Confirmed
//!    ▲                          │   ▲                           │
//!    │                          │   │ reconnect                 │ connection lost
//!    │                reject    │   └─────── Disconnected ◄─────┘
//!    │                          ▼
//!    │                       Rejected
//!    │
//!    └── any state ── unsubscribe() ──► Unsubscribed
//! ```
//!
//! Only `Confirmed` subscriptions receive payloads or may `perform`/`send`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::connection::SendOutcome;
use crate::connection::controller::ConnectionController;
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::{CanonicalIdentifier, ChannelIdentifier, OutboundEnvelope};

use super::callbacks::{CallbackEvent, Callbacks, invoke_lifecycle, invoke_received};

// ============================================================================
// SubscriptionState
// ============================================================================

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Created, subscribe command not sent yet.
    Pending,
    /// Subscribe command sent, awaiting the server's answer.
    Subscribing,
    /// Accepted by the server.
    Confirmed,
    /// Refused by the server. Terminal.
    Rejected,
    /// Connection lost while subscribed; resubscribed on reconnect.
    Disconnected,
    /// Removed by the client. Terminal.
    Unsubscribed,
}

impl SubscriptionState {
    /// Returns `true` if payloads may be dispatched in this state.
    #[inline]
    #[must_use]
    pub const fn can_receive(self) -> bool {
        matches!(self, Self::Confirmed)
    }

    /// Returns `true` if no further transition is possible.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Unsubscribed)
    }

    /// Returns `true` if a subscribe command should be (re)sent once the
    /// connection is up.
    #[inline]
    #[must_use]
    pub const fn needs_subscribe(self) -> bool {
        matches!(self, Self::Pending | Self::Subscribing | Self::Disconnected)
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Subscribing => "subscribing",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Disconnected => "disconnected",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Types
// ============================================================================

/// Shared state of one subscription.
pub(crate) struct SubscriptionInner {
    /// Unique record ID.
    id: SubscriptionId,
    /// Identifier as given by the caller.
    identifier: ChannelIdentifier,
    /// Routing key.
    canonical: CanonicalIdentifier,
    /// Lifecycle state, observable by waiters.
    state: watch::Sender<SubscriptionState>,
    /// Registered callbacks.
    callbacks: Mutex<Callbacks>,
    /// Owning controller (non-owning back-reference).
    controller: Weak<ConnectionController>,
    /// Number of payloads delivered.
    received: AtomicU64,
}

// ============================================================================
// Subscription
// ============================================================================

/// A single listener registered against one channel identifier.
///
/// Cloning the handle shares the same record.
#[derive(Clone)]
pub struct Subscription {
    /// Shared inner state.
    pub(crate) inner: Arc<SubscriptionInner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("identifier", &self.inner.canonical.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Subscription {}

// ============================================================================
// Subscription - Constructor
// ============================================================================

impl Subscription {
    /// Creates a pending subscription.
    pub(crate) fn new(
        identifier: ChannelIdentifier,
        callbacks: Callbacks,
        controller: Weak<ConnectionController>,
    ) -> Self {
        let canonical = identifier.canonicalize();
        let (state, _) = watch::channel(SubscriptionState::Pending);

        Self {
            inner: Arc::new(SubscriptionInner {
                id: SubscriptionId::generate(),
                identifier,
                canonical,
                state,
                callbacks: Mutex::new(callbacks),
                controller,
                received: AtomicU64::new(0),
            }),
        }
    }
}

// ============================================================================
// Subscription - Accessors
// ============================================================================

impl Subscription {
    /// Returns the record ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Returns the identifier as given at creation.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &ChannelIdentifier {
        &self.inner.identifier
    }

    /// Returns the canonical routing key.
    #[inline]
    #[must_use]
    pub fn canonical(&self) -> &CanonicalIdentifier {
        &self.inner.canonical
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` if the subscription is confirmed.
    #[inline]
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state() == SubscriptionState::Confirmed
    }

    /// Returns how many payloads this record has received.
    #[inline]
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Subscription - Callback Registration
// ============================================================================

impl Subscription {
    /// Adds callbacks after creation. They run after existing ones.
    pub fn add_callbacks(&self, callbacks: Callbacks) {
        self.inner.callbacks.lock().extend(callbacks);
    }

    /// Adds a `received` callback.
    pub fn on_received<F>(&self, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_callbacks(Callbacks::new().on_received(callback));
    }

    /// Returns the number of callbacks registered for `event`.
    #[must_use]
    pub fn callback_count(&self, event: CallbackEvent) -> usize {
        self.inner.callbacks.lock().count(event)
    }
}

// ============================================================================
// Subscription - Operations
// ============================================================================

impl Subscription {
    /// Performs `action` on the channel, merging it into `payload`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the subscription is not confirmed
    /// - [`Error::InvalidArgument`] if `payload` is not an object or null
    /// - [`Error::ConnectionClosed`] if the consumer was dropped
    pub fn perform(&self, action: &str, payload: Value) -> Result<SendOutcome> {
        self.ensure_confirmed("perform")?;
        let envelope = OutboundEnvelope::perform(&self.inner.canonical, action, payload)?;
        self.controller()?.transmit(&envelope)
    }

    /// Sends `payload` as the message data.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the subscription is not confirmed
    /// - [`Error::ConnectionClosed`] if the consumer was dropped
    pub fn send(&self, payload: Value) -> Result<SendOutcome> {
        self.ensure_confirmed("send")?;
        let envelope = OutboundEnvelope::message(&self.inner.canonical, &payload)?;
        self.controller()?.transmit(&envelope)
    }

    /// Removes this subscription from its consumer.
    ///
    /// Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.inner.controller.upgrade() {
            Some(controller) => controller.remove_subscription(self),
            None => self.mark_unsubscribed().is_some(),
        }
    }

    /// Waits until the subscription reaches `target`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `target` is not reached in time
    /// - [`Error::InvalidOperation`] if a different terminal state is reached
    pub async fn wait_for_state(
        &self,
        target: SubscriptionState,
        wait: Duration,
    ) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let reached = timeout(
            wait,
            rx.wait_for(|state| *state == target || state.is_terminal()),
        )
        .await
        .map_err(|_| {
            Error::timeout(
                format!("wait for {} to be {target}", self.inner.canonical),
                wait.as_millis() as u64,
            )
        })?
        .map(|state| *state)
        .map_err(|_| Error::ConnectionClosed)?;

        if reached == target {
            Ok(())
        } else {
            Err(Error::invalid_operation(
                "wait for state",
                self.inner.canonical.as_str(),
                reached,
            ))
        }
    }

    /// Fails unless the subscription is confirmed.
    fn ensure_confirmed(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state == SubscriptionState::Confirmed {
            Ok(())
        } else {
            debug!(identifier = %self.inner.canonical, %state, operation, "Rejected operation on unconfirmed subscription");
            Err(Error::invalid_operation(
                operation,
                self.inner.canonical.as_str(),
                state,
            ))
        }
    }

    /// Upgrades the controller back-reference.
    fn controller(&self) -> Result<Arc<ConnectionController>> {
        self.inner
            .controller
            .upgrade()
            .ok_or(Error::ConnectionClosed)
    }
}

// ============================================================================
// Subscription - Lifecycle (crate)
// ============================================================================

impl Subscription {
    /// Moves to `to` if the current state satisfies `allowed`.
    ///
    /// Returns the previous state when the transition happened.
    pub(crate) fn transition(
        &self,
        allowed: impl Fn(SubscriptionState) -> bool,
        to: SubscriptionState,
    ) -> Option<SubscriptionState> {
        let mut previous = None;
        self.inner.state.send_if_modified(|state| {
            if *state == to || !allowed(*state) {
                return false;
            }
            previous = Some(*state);
            *state = to;
            true
        });

        if let Some(from) = previous {
            debug!(
                subscription_id = %self.inner.id,
                identifier = %self.inner.canonical,
                %from,
                to = %to,
                "Subscription state changed"
            );
        }
        previous
    }

    /// Moves to `Unsubscribed` from any non-terminal state.
    pub(crate) fn mark_unsubscribed(&self) -> Option<SubscriptionState> {
        self.transition(|state| !state.is_terminal(), SubscriptionState::Unsubscribed)
    }

    /// Runs the lifecycle callbacks for `event`.
    pub(crate) fn fire(&self, event: CallbackEvent) -> usize {
        let snapshot = self.inner.callbacks.lock().lifecycle(event);
        invoke_lifecycle(&snapshot, event, &self.inner.canonical)
    }

    /// Delivers a payload if the subscription is confirmed.
    ///
    /// Returns `true` if the `received` callbacks ran.
    pub(crate) fn deliver(&self, payload: &Value) -> bool {
        if !self.state().can_receive() {
            return false;
        }
        self.inner.received.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.inner.callbacks.lock().received();
        invoke_received(&snapshot, payload, &self.inner.canonical);
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    fn detached(channel: &str, callbacks: Callbacks) -> Subscription {
        Subscription::new(ChannelIdentifier::new(channel), callbacks, Weak::new())
    }

    #[test]
    fn test_new_is_pending() {
        let sub = detached("Chat", Callbacks::new());
        assert_eq!(sub.state(), SubscriptionState::Pending);
        assert_eq!(sub.canonical().as_str(), r#"{"channel":"Chat"}"#);
    }

    #[test]
    fn test_transition_respects_guard() {
        let sub = detached("Chat", Callbacks::new());

        let moved = sub.transition(
            |s| s == SubscriptionState::Subscribing,
            SubscriptionState::Confirmed,
        );
        assert_eq!(moved, None);
        assert_eq!(sub.state(), SubscriptionState::Pending);

        let moved = sub.transition(
            |s| s == SubscriptionState::Pending,
            SubscriptionState::Subscribing,
        );
        assert_eq!(moved, Some(SubscriptionState::Pending));
        assert_eq!(sub.state(), SubscriptionState::Subscribing);
    }

    #[test]
    fn test_perform_before_confirm_is_invalid() {
        let sub = detached("Chat", Callbacks::new());
        let err = sub.perform("speak", json!({})).unwrap_err();
        assert!(err.is_invalid_operation());
        assert!(sub.send(json!({})).unwrap_err().is_invalid_operation());
    }

    #[test]
    fn test_perform_without_controller_is_closed() {
        let sub = detached("Chat", Callbacks::new());
        sub.transition(|_| true, SubscriptionState::Confirmed);
        assert!(matches!(
            sub.perform("speak", json!({})),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_deliver_only_when_confirmed() {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        let sub = detached(
            "Chat",
            Callbacks::new().on_received(move |p| store.lock().push(p.clone())),
        );

        assert!(!sub.deliver(&json!(1)));
        sub.transition(|_| true, SubscriptionState::Confirmed);
        assert!(sub.deliver(&json!(2)));
        sub.transition(|_| true, SubscriptionState::Rejected);
        assert!(!sub.deliver(&json!(3)));

        assert_eq!(*seen.lock(), vec![json!(2)]);
        assert_eq!(sub.received_count(), 1);
    }

    #[test]
    fn test_unsubscribe_detached_is_idempotent() {
        let sub = detached("Chat", Callbacks::new());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let sub = detached("Chat", Callbacks::new());
        sub.mark_unsubscribed();
        assert_eq!(
            sub.transition(|s| !s.is_terminal(), SubscriptionState::Confirmed),
            None
        );
    }

    #[test]
    fn test_fire_lifecycle() {
        let hits = Arc::new(PlMutex::new(0));
        let counter = Arc::clone(&hits);
        let sub = detached("Chat", Callbacks::new().on_connected(move || *counter.lock() += 1));
        sub.fire(CallbackEvent::Connected);
        sub.fire(CallbackEvent::Disconnected);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_add_callbacks_after_creation() {
        let sub = detached("Chat", Callbacks::new().on_received(|_| {}));
        sub.on_received(|_| {});
        assert_eq!(sub.callback_count(CallbackEvent::Received), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_times_out() {
        let sub = detached("Chat", Callbacks::new());
        let err = sub
            .wait_for_state(SubscriptionState::Confirmed, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_stops_on_terminal() {
        let sub = detached("Chat", Callbacks::new());
        sub.transition(|_| true, SubscriptionState::Rejected);
        let err = sub
            .wait_for_state(SubscriptionState::Confirmed, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_invalid_operation());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SubscriptionState::Subscribing.to_string(), "subscribing");
        assert!(SubscriptionState::Disconnected.needs_subscribe());
        assert!(!SubscriptionState::Confirmed.needs_subscribe());
    }
}
