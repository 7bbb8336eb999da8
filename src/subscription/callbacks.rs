//! Subscription callbacks.
//!
//! Each subscription keeps one ordered list per event. Lists are snapshotted
//! before dispatch, and every callback runs under `catch_unwind` so that a
//! panicking listener is logged and skipped without affecting its siblings.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::protocol::CanonicalIdentifier;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with each received payload.
pub type ReceivedCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback invoked on a lifecycle transition.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

// ============================================================================
// CallbackEvent
// ============================================================================

/// Events a subscription dispatches to its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackEvent {
    /// Subscription confirmed.
    Connected,
    /// Confirmed subscription lost its connection or was removed.
    Disconnected,
    /// Subscription rejected by the server.
    Rejected,
    /// Payload received.
    Received,
}

impl fmt::Display for CallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Rejected => "rejected",
            Self::Received => "received",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Ordered callback lists keyed by event.
///
/// # Example
///
/// ```ignore
/// let callbacks = Callbacks::new()
///     .on_connected(|| println!("confirmed"))
///     .on_received(|payload| println!("got {payload}"));
/// ```
#[derive(Clone, Default)]
pub struct Callbacks {
    connected: Vec<LifecycleCallback>,
    disconnected: Vec<LifecycleCallback>,
    rejected: Vec<LifecycleCallback>,
    received: Vec<ReceivedCallback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("connected", &self.connected.len())
            .field("disconnected", &self.disconnected.len())
            .field("rejected", &self.rejected.len())
            .field("received", &self.received.len())
            .finish()
    }
}

impl Callbacks {
    /// Creates an empty set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `connected` callback.
    #[must_use]
    pub fn on_connected<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.connected.push(Arc::new(callback));
        self
    }

    /// Adds a `disconnected` callback.
    #[must_use]
    pub fn on_disconnected<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnected.push(Arc::new(callback));
        self
    }

    /// Adds a `rejected` callback.
    #[must_use]
    pub fn on_rejected<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.rejected.push(Arc::new(callback));
        self
    }

    /// Adds a `received` callback.
    #[must_use]
    pub fn on_received<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.received.push(Arc::new(callback));
        self
    }

    /// Appends every callback of `other` after the existing ones.
    pub fn extend(&mut self, other: Callbacks) {
        self.connected.extend(other.connected);
        self.disconnected.extend(other.disconnected);
        self.rejected.extend(other.rejected);
        self.received.extend(other.received);
    }

    /// Returns the number of callbacks registered for `event`.
    #[must_use]
    pub fn count(&self, event: CallbackEvent) -> usize {
        match event {
            CallbackEvent::Connected => self.connected.len(),
            CallbackEvent::Disconnected => self.disconnected.len(),
            CallbackEvent::Rejected => self.rejected.len(),
            CallbackEvent::Received => self.received.len(),
        }
    }

    /// Returns a snapshot of the lifecycle list for `event`.
    ///
    /// `Received` has its own list; asking for it here yields nothing.
    pub(crate) fn lifecycle(&self, event: CallbackEvent) -> Vec<LifecycleCallback> {
        match event {
            CallbackEvent::Connected => self.connected.clone(),
            CallbackEvent::Disconnected => self.disconnected.clone(),
            CallbackEvent::Rejected => self.rejected.clone(),
            CallbackEvent::Received => Vec::new(),
        }
    }

    /// Returns a snapshot of the `received` list.
    pub(crate) fn received(&self) -> Vec<ReceivedCallback> {
        self.received.clone()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Runs lifecycle callbacks in order. Returns how many panicked.
pub(crate) fn invoke_lifecycle(
    callbacks: &[LifecycleCallback],
    event: CallbackEvent,
    identifier: &CanonicalIdentifier,
) -> usize {
    callbacks
        .iter()
        .enumerate()
        .filter(|(index, callback)| {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback()));
            report(outcome, event, identifier, *index)
        })
        .count()
}

/// Runs `received` callbacks in order. Returns how many panicked.
pub(crate) fn invoke_received(
    callbacks: &[ReceivedCallback],
    payload: &Value,
    identifier: &CanonicalIdentifier,
) -> usize {
    callbacks
        .iter()
        .enumerate()
        .filter(|(index, callback)| {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(payload)));
            report(outcome, CallbackEvent::Received, identifier, *index)
        })
        .count()
}

/// Logs a panicked callback; returns `true` if it panicked.
fn report(
    outcome: std::thread::Result<()>,
    event: CallbackEvent,
    identifier: &CanonicalIdentifier,
    index: usize,
) -> bool {
    match outcome {
        Ok(()) => false,
        Err(panic) => {
            error!(
                %identifier,
                %event,
                index,
                panic = panic_message(panic.as_ref()),
                "Subscription callback panicked"
            );
            true
        }
    }
}

/// Extracts the message of a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================
