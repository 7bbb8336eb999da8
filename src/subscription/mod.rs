//! Subscriptions: records, callbacks and the registry.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `callbacks` | Ordered callback lists and panic-isolated dispatch |
//! | `record` | [`Subscription`] handle and lifecycle state machine |
//! | `registry` | [`Registry`] owning every record |

// ============================================================================
// Submodules
// ============================================================================

/// Callback lists and dispatch.
pub mod callbacks;

/// Subscription record and lifecycle.
pub mod record;

/// Subscription registry.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use callbacks::{CallbackEvent, Callbacks, LifecycleCallback, ReceivedCallback};
pub use record::{Subscription, SubscriptionState};
pub use registry::{DispatchReport, Registry};
