//! Subscription registry.
//!
//! Owns every live [`Subscription`] in creation order and resolves inbound
//! identifiers to the records that should receive them. Several records may
//! share one identifier; dispatch fans out to all of them, oldest first.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Weak;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::connection::controller::ConnectionController;
use crate::protocol::{CanonicalIdentifier, ChannelIdentifier};

use super::callbacks::Callbacks;
use super::record::Subscription;

// ============================================================================
// DispatchReport
// ============================================================================

/// Result of routing one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Records whose identifier matched.
    pub matched: usize,
    /// Records whose `received` callbacks ran.
    pub delivered: usize,
}

impl DispatchReport {
    /// Returns `true` if no record received the payload.
    #[inline]
    #[must_use]
    pub fn is_unhandled(&self) -> bool {
        self.delivered == 0
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Ordered collection of subscription records.
#[derive(Default)]
pub struct Registry {
    /// Records in creation order.
    records: RwLock<Vec<Subscription>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and appends a new record. Never deduplicates.
    pub(crate) fn create(
        &self,
        identifier: ChannelIdentifier,
        callbacks: Callbacks,
        controller: Weak<ConnectionController>,
    ) -> Subscription {
        let subscription = Subscription::new(identifier, callbacks, controller);
        self.records.write().push(subscription.clone());
        trace!(
            subscription_id = %subscription.id(),
            identifier = %subscription.canonical(),
            "Subscription registered"
        );
        subscription
    }

    /// Removes a record. Returns `false` if it was not registered.
    pub fn remove(&self, subscription: &Subscription) -> bool {
        let mut records = self.records.write();
        match records.iter().position(|record| record == subscription) {
            Some(index) => {
                records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the record is registered.
    #[must_use]
    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.records.read().iter().any(|record| record == subscription)
    }

    /// Returns every record matching `identifier`, oldest first.
    #[must_use]
    pub fn find_all(&self, identifier: &CanonicalIdentifier) -> Vec<Subscription> {
        self.records
            .read()
            .iter()
            .filter(|record| record.canonical() == identifier)
            .cloned()
            .collect()
    }

    /// Returns a snapshot of every record, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.records.read().clone()
    }

    /// Routes `payload` to every confirmed record matching `identifier`.
    ///
    /// Iterates over a snapshot, so callbacks may subscribe or unsubscribe
    /// freely. A record removed by an earlier callback is skipped.
    pub fn dispatch_incoming(
        &self,
        identifier: &CanonicalIdentifier,
        payload: &Value,
    ) -> DispatchReport {
        let matches = self.find_all(identifier);
        let delivered = matches
            .iter()
            .filter(|record| record.deliver(payload))
            .count();

        trace!(%identifier, matched = matches.len(), delivered, "Dispatched payload");

        DispatchReport {
            matched: matches.len(),
            delivered,
        }
    }

    /// Removes and returns every record.
    pub fn clear(&self) -> Vec<Subscription> {
        std::mem::take(&mut *self.records.write())
    }

    /// Returns the number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if there are no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::subscription::SubscriptionState;

    fn confirm(sub: &Subscription) {
        sub.transition(|_| true, SubscriptionState::Confirmed);
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Callbacks {
        let log = Arc::clone(log);
        Callbacks::new().on_received(move |payload| log.lock().push(format!("{label}:{payload}")))
    }

    #[test]
    fn test_create_never_deduplicates() {
        let registry = Registry::new();
        let a = registry.create("Notif".into(), Callbacks::new(), Weak::new());
        let b = registry.create("Notif".into(), Callbacks::new(), Weak::new());

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_all(a.canonical()).len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let a = registry.create("Notif".into(), Callbacks::new(), Weak::new());

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_all_empty_for_unknown() {
        let registry = Registry::new();
        registry.create("Notif".into(), Callbacks::new(), Weak::new());
        let other = ChannelIdentifier::new("Other").canonicalize();
        assert!(registry.find_all(&other).is_empty());
    }

    #[test]
    fn test_dispatch_fans_out_in_creation_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = registry.create("Notif".into(), recorder("a", &log), Weak::new());
        let b = registry.create("Notif".into(), recorder("b", &log), Weak::new());
        confirm(&a);
        confirm(&b);

        let report = registry.dispatch_incoming(a.canonical(), &json!(1));
        assert_eq!(report, DispatchReport { matched: 2, delivered: 2 });
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_dispatch_skips_unconfirmed() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let confirmed = registry.create("Notif".into(), recorder("ok", &log), Weak::new());
        let rejected = registry.create("Notif".into(), recorder("rej", &log), Weak::new());
        confirm(&confirmed);
        rejected.transition(|_| true, SubscriptionState::Rejected);

        let report = registry.dispatch_incoming(confirmed.canonical(), &json!("x"));
        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock(), vec![r#"ok:"x""#]);
    }

    #[test]
    fn test_dispatch_miss_is_unhandled() {
        let registry = Registry::new();
        let report =
            registry.dispatch_incoming(&ChannelIdentifier::new("Ghost").canonicalize(), &json!({}));
        assert!(report.is_unhandled());
        assert_eq!(report.matched, 0);
    }

    #[test]
    fn test_callback_removing_sibling_during_dispatch() {
        let registry = Arc::new(Registry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let second_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&second_slot);
        let reg = Arc::clone(&registry);
        let first = registry.create(
            "Notif".into(),
            Callbacks::new().on_received(move |_| {
                if let Some(second) = slot.lock().as_ref() {
                    reg.remove(second);
                    second.mark_unsubscribed();
                }
            }),
            Weak::new(),
        );
        let second = registry.create("Notif".into(), recorder("second", &log), Weak::new());
        *second_slot.lock() = Some(second.clone());
        confirm(&first);
        confirm(&second);

        let report = registry.dispatch_incoming(first.canonical(), &json!(0));
        assert_eq!(report.delivered, 1);
        assert!(log.lock().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear_returns_records() {
        let registry = Registry::new();
        registry.create("A".into(), Callbacks::new(), Weak::new());
        registry.create("B".into(), Callbacks::new(), Weak::new());
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }
}
