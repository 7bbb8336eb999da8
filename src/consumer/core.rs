//! Consumer facade.
//!
//! The [`Consumer`] is the object a test obtains. It composes the connection
//! controller, the subscription registry and the history recorder behind a
//! small API. Channel identifiers given as names or JSON values are resolved
//! here, once; everything below works with canonical identifiers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::connection::controller::ConnectionController;
use crate::connection::{
    ConnectionState, ConsumerStats, Delivery, InterruptionOptions, NetworkConditions,
    SendOutcome, UnhandledMessage,
};
use crate::error::Result;
use crate::history::{Direction, HistoryEntry};
use crate::protocol::{ChannelIdentifier, InboundEnvelope, OutboundEnvelope};
use crate::scheduler::Scheduler;
use crate::subscription::{Callbacks, Subscription};
use crate::transport::{SimulatedTransport, TransportFactory};

use super::builder::ConsumerBuilder;
use super::options::ConsumerOptions;

// ============================================================================
// Consumer
// ============================================================================

/// Simulated Action Cable consumer.
///
/// Cloning the handle shares the same connection and registry.
///
/// # Example
///
/// ```ignore
/// let consumer = Consumer::builder().build()?;
/// consumer.connect()?;
///
/// let room = ChannelIdentifier::new("ChatChannel").param("room", 1);
/// let subscription = consumer.subscribe(
///     room.clone(),
///     Callbacks::new().on_received(|payload| println!("{payload}")),
/// );
///
/// consumer.simulate_incoming_message(room, json!({"text": "hi"}));
/// ```
#[derive(Clone)]
pub struct Consumer {
    /// Validated options.
    options: Arc<ConsumerOptions>,
    /// Connection controller.
    controller: Arc<ConnectionController>,
    /// Timer runner shared with the controller.
    scheduler: Scheduler,
    /// Built-in transport, when no custom one was given.
    simulated: Option<Arc<SimulatedTransport>>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("url", &self.controller.url().as_str())
            .field("state", &self.connection_state())
            .field("subscriptions", &self.controller.registry().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Consumer - Constructors
// ============================================================================

impl Consumer {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConsumerBuilder {
        ConsumerBuilder::new()
    }

    /// Creates a consumer with `options` on the current runtime.
    ///
    /// # Errors
    ///
    /// See [`ConsumerBuilder::build`].
    pub fn new(options: ConsumerOptions) -> Result<Self> {
        ConsumerBuilder::new().options(options).build()
    }

    pub(crate) fn from_parts(
        options: ConsumerOptions,
        factory: Arc<dyn TransportFactory>,
        simulated: Option<Arc<SimulatedTransport>>,
        scheduler: Scheduler,
    ) -> Result<Self> {
        let controller = ConnectionController::new(&options, factory, scheduler.clone())?;
        debug!(url = %controller.url(), "Consumer created");
        Ok(Self {
            options: Arc::new(options),
            controller,
            scheduler,
            simulated,
        })
    }
}

// ============================================================================
// Consumer - Accessors
// ============================================================================

impl Consumer {
    /// Returns the options the consumer was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Returns the cable endpoint.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        self.controller.url()
    }

    /// Returns the built-in simulated transport, if in use.
    #[inline]
    #[must_use]
    pub fn simulated_transport(&self) -> Option<&Arc<SimulatedTransport>> {
        self.simulated.as_ref()
    }

    /// Returns the number of timers waiting to fire.
    #[inline]
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending_count()
    }
}

// ============================================================================
// Consumer - Connection
// ============================================================================

impl Consumer {
    /// Opens the connection. No-op if already connecting or connected.
    ///
    /// Returns once the transport is created; the connection becomes
    /// [`ConnectionState::Connected`] when it opens. Use
    /// [`wait_until_connected`](Self::wait_until_connected) to await that.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it cannot be created.
    pub fn connect(&self) -> Result<()> {
        self.controller.connect()
    }

    /// Closes the connection. Subscriptions stay registered as
    /// `Disconnected` and are resubscribed on the next connect.
    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Returns `true` if the connection is up.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    /// Waits until the connection is up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`](crate::Error::Timeout) if it is not up
    /// within `timeout`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        self.controller.wait_until_connected(timeout).await
    }

    /// Drops the connection for `options.duration`, then reconnects if
    /// `options.reconnect` is set.
    ///
    /// Starting a new interruption cancels the pending reconnect of the
    /// previous one.
    pub fn simulate_network_interruption(&self, options: InterruptionOptions) {
        self.controller.interrupt(options);
    }

    /// Returns `true` if an interruption reconnect is pending.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.controller.has_pending_reconnect()
    }

    /// Replaces the inbound network policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the conditions are
    /// invalid.
    pub fn set_network_conditions(&self, conditions: NetworkConditions) -> Result<()> {
        self.controller.set_network_conditions(conditions)
    }

    /// Returns the inbound network policy.
    #[must_use]
    pub fn network_conditions(&self) -> NetworkConditions {
        self.controller.network_conditions()
    }
}

// ============================================================================
// Consumer - Subscriptions
// ============================================================================

impl Consumer {
    /// Subscribes to a channel.
    ///
    /// Always creates a new record, even if one with the same identifier
    /// exists. Returns immediately; confirmation is reported through the
    /// `connected` callbacks.
    pub fn subscribe(
        &self,
        identifier: impl Into<ChannelIdentifier>,
        callbacks: Callbacks,
    ) -> Subscription {
        self.controller.subscribe(identifier.into(), callbacks)
    }

    /// Subscribes to a channel given as a JSON string or object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`](crate::Error::InvalidIdentifier)
    /// if `identifier` is neither a string nor an object with a `channel`.
    pub fn subscribe_value(&self, identifier: Value, callbacks: Callbacks) -> Result<Subscription> {
        let identifier = ChannelIdentifier::try_from(identifier)?;
        Ok(self.subscribe(identifier, callbacks))
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.controller.remove_subscription(subscription)
    }

    /// Returns every registered subscription, oldest first.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.controller.registry().snapshot()
    }

    /// Returns the subscriptions matching `identifier`, oldest first.
    #[must_use]
    pub fn find_subscriptions(&self, identifier: impl Into<ChannelIdentifier>) -> Vec<Subscription> {
        let canonical = identifier.into().canonicalize();
        self.controller.registry().find_all(&canonical)
    }

    /// Feeds a `confirm_subscription` for `identifier` through the inbound
    /// path.
    pub fn confirm_subscription(&self, identifier: impl Into<ChannelIdentifier>) {
        let identifier = identifier.into().canonicalize();
        self.controller
            .handle_envelope(InboundEnvelope::ConfirmSubscription { identifier });
    }

    /// Feeds a `reject_subscription` for `identifier` through the inbound
    /// path.
    pub fn reject_subscription(&self, identifier: impl Into<ChannelIdentifier>) {
        let identifier = identifier.into().canonicalize();
        self.controller
            .handle_envelope(InboundEnvelope::RejectSubscription { identifier });
    }
}

// ============================================================================
// Consumer - Messaging
// ============================================================================

impl Consumer {
    /// Sends `payload` as a `message` command on `identifier`.
    ///
    /// Does not require a subscription. While disconnected the envelope is
    /// dropped and [`SendOutcome::Dropped`] returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload cannot be
    /// encoded.
    pub fn send_to_channel(
        &self,
        identifier: impl Into<ChannelIdentifier>,
        payload: Value,
    ) -> Result<SendOutcome> {
        let canonical = identifier.into().canonicalize();
        let envelope = OutboundEnvelope::message(&canonical, &payload)?;
        self.controller.transmit(&envelope)
    }

    /// Injects a server broadcast for `identifier`.
    ///
    /// Bypasses the transport, but not the network policy: the message may
    /// be delayed or dropped.
    pub fn simulate_incoming_message(
        &self,
        identifier: impl Into<ChannelIdentifier>,
        payload: Value,
    ) -> Delivery {
        let canonical = identifier.into().canonicalize();
        self.controller.simulate_incoming(canonical, payload)
    }

    /// Feeds raw text through the inbound decode path.
    ///
    /// Malformed frames are counted in [`ConsumerStats::decode_errors`] and
    /// dropped.
    pub fn simulate_raw_frame(&self, text: &str) {
        self.controller.handle_frame(text);
    }
}

// ============================================================================
// Consumer - Diagnostics
// ============================================================================

impl Consumer {
    /// Returns every recorded envelope, oldest first.
    #[must_use]
    pub fn get_history(&self) -> Vec<HistoryEntry> {
        self.controller.history().get_all()
    }

    /// Returns the recorded outbound envelopes.
    #[must_use]
    pub fn outgoing_history(&self) -> Vec<HistoryEntry> {
        self.controller.history().filter(Direction::Outgoing)
    }

    /// Returns the recorded inbound envelopes.
    #[must_use]
    pub fn incoming_history(&self) -> Vec<HistoryEntry> {
        self.controller.history().filter(Direction::Incoming)
    }

    /// Clears the history.
    pub fn clear_history(&self) {
        self.controller.history().clear();
    }

    /// Turns history recording on or off.
    pub fn set_record_history(&self, enabled: bool) {
        self.controller.history().set_enabled(enabled);
    }

    /// Returns every inbound message that reached no callback.
    #[must_use]
    pub fn unhandled_messages(&self) -> Vec<UnhandledMessage> {
        self.controller.unhandled_messages()
    }

    /// Registers a listener for inbound messages that reach no callback.
    pub fn on_unhandled<F>(&self, listener: F)
    where
        F: Fn(&UnhandledMessage) + Send + Sync + 'static,
    {
        self.controller.on_unhandled(Arc::new(listener));
    }

    /// Returns the fault counters.
    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        self.controller.stats()
    }

    /// Disconnects, removes every subscription, cancels every timer and
    /// clears history, unhandled messages and counters.
    pub fn reset(&self) {
        self.controller.reset();
    }
}
