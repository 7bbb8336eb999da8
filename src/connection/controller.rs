//! Connection controller.
//!
//! Owns the transport of one consumer and translates its events into
//! registry actions. Every outbound envelope goes through
//! [`ConnectionController::transmit`]; every inbound frame goes through
//! [`ConnectionController::handle_frame`].
//!
//! # Generations
//!
//! Each call to `connect` starts a new *generation*. Transport events carry
//! the generation they were wired with, and events from an older generation
//! are ignored. Tearing a link down bumps the generation before the
//! transport is closed, so the close event it emits is already stale.
//!
//! # Locking
//!
//! No lock is held while calling into the transport or into user callbacks.
//! Both may re-enter the controller synchronously.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::consumer::ConsumerOptions;
use crate::error::{Error, Result};
use crate::history::{Direction, HistoryRecorder};
use crate::identifiers::SubscriptionId;
use crate::protocol::{
    CanonicalIdentifier, ChannelIdentifier, InboundEnvelope, OutboundEnvelope, PongFrame,
    decode_inbound, encode,
};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::subscription::{
    CallbackEvent, Callbacks, DispatchReport, Registry, Subscription, SubscriptionState,
};
use crate::transport::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, EventSink, ReadyState, Transport, TransportEvent,
    TransportFactory,
};

use super::network::{Admission, InterruptionOptions, NetworkConditions, NetworkSimulator};
use super::state::{
    ConnectionState, ConsumerStats, Counters, Delivery, SendOutcome, UnhandledCallback,
    UnhandledMessage, UnhandledReason,
};

// ============================================================================
// Constants
// ============================================================================

/// Internal channel subscribed on every new connection.
pub const CONNECTION_MONITOR_CHANNEL: &str = "ConnectionMonitorChannel";

// ============================================================================
// Types
// ============================================================================

/// The current transport and its generation.
#[derive(Default)]
struct Link {
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
}

/// Lifecycle timing and acknowledgement settings.
#[derive(Debug, Clone)]
struct Settings {
    subscription_delay: Duration,
    confirmation_delay: Duration,
    auto_confirm: bool,
    rejected_channels: Vec<String>,
    debug_logging: bool,
}

// ============================================================================
// ConnectionController
// ============================================================================

/// Drives one logical connection and the subscriptions riding on it.
pub(crate) struct ConnectionController {
    /// Cable endpoint.
    url: Url,
    /// Requested subprotocols.
    protocols: Vec<String>,
    /// Timing settings.
    settings: Settings,
    /// Opens transports.
    factory: Arc<dyn TransportFactory>,
    /// Delayed-task runner.
    scheduler: Scheduler,
    /// Connection state, observable by waiters.
    state: watch::Sender<ConnectionState>,
    /// Current transport.
    link: Mutex<Link>,
    /// Subscription records.
    registry: Registry,
    /// Envelope log.
    history: HistoryRecorder,
    /// Inbound network policy.
    network: Mutex<NetworkSimulator>,
    /// Pending reconnect of the last interruption.
    interruption: Mutex<Option<TaskHandle>>,
    /// Pending subscribe and acknowledgement timers per record.
    lifecycle_tasks: Mutex<FxHashMap<SubscriptionId, TaskHandle>>,
    /// Routing misses, oldest first.
    unhandled: Mutex<Vec<UnhandledMessage>>,
    /// Routing-miss listeners.
    unhandled_listeners: Mutex<Vec<UnhandledCallback>>,
    /// Fault counters.
    counters: Counters,
    /// Self reference handed to timers, sinks and records.
    this: Weak<ConnectionController>,
}

impl fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionController - Constructor
// ============================================================================

impl ConnectionController {
    /// Creates a disconnected controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the configured URL does not parse.
    pub(crate) fn new(
        options: &ConsumerOptions,
        factory: Arc<dyn TransportFactory>,
        scheduler: Scheduler,
    ) -> Result<Arc<Self>> {
        let url = Url::parse(&options.url)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let settings = Settings {
            subscription_delay: options.subscription_delay,
            confirmation_delay: options.confirmation_delay,
            auto_confirm: options.auto_confirm,
            rejected_channels: options.rejected_channels.clone(),
            debug_logging: options.debug_logging,
        };

        Ok(Arc::new_cyclic(|this| Self {
            url,
            protocols: options.protocols.clone(),
            settings,
            factory,
            scheduler,
            state,
            link: Mutex::new(Link::default()),
            registry: Registry::new(),
            history: HistoryRecorder::new(options.record_history),
            network: Mutex::new(NetworkSimulator::new(options.network.clone())),
            interruption: Mutex::new(None),
            lifecycle_tasks: Mutex::new(FxHashMap::default()),
            unhandled: Mutex::new(Vec::new()),
            unhandled_listeners: Mutex::new(Vec::new()),
            counters: Counters::default(),
            this: this.clone(),
        }))
    }
}

// ============================================================================
// ConnectionController - Accessors
// ============================================================================

impl ConnectionController {
    #[inline]
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[inline]
    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[inline]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub(crate) fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub(crate) fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    pub(crate) fn unhandled_messages(&self) -> Vec<UnhandledMessage> {
        self.unhandled.lock().clone()
    }

    pub(crate) fn on_unhandled(&self, listener: UnhandledCallback) {
        self.unhandled_listeners.lock().push(listener);
    }

    pub(crate) fn network_conditions(&self) -> NetworkConditions {
        self.network.lock().conditions().clone()
    }

    /// Replaces the inbound network policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the conditions are invalid.
    pub(crate) fn set_network_conditions(&self, conditions: NetworkConditions) -> Result<()> {
        conditions.validate().map_err(Error::config)?;
        info!(?conditions, "Network conditions updated");
        self.network.lock().set_conditions(conditions);
        Ok(())
    }

    /// Waits until the connection is up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if it is not up within `wait`.
    pub(crate) async fn wait_until_connected(&self, wait: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        timeout(wait, rx.wait_for(|state| *state == ConnectionState::Connected))
            .await
            .map_err(|_| Error::timeout("wait until connected", wait.as_millis() as u64))?
            .map(|_| ())
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// ConnectionController - Connection Lifecycle
// ============================================================================

impl ConnectionController {
    /// Opens a transport. No-op unless disconnected.
    ///
    /// A manual connect supersedes any reconnect still pending from an
    /// interruption.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the transport cannot be created.
    pub(crate) fn connect(&self) -> Result<()> {
        let current = self.state();
        if current != ConnectionState::Disconnected {
            debug!(state = %current, "Connect ignored");
            return Ok(());
        }
        self.cancel_interruption();

        let generation = {
            let mut link = self.link.lock();
            link.generation += 1;
            link.generation
        };
        self.state.send_replace(ConnectionState::Connecting);
        info!(url = %self.url, generation, "Connecting");

        let this = self.this.clone();
        let sink: EventSink = Arc::new(move |event| {
            if let Some(controller) = this.upgrade() {
                controller.on_transport_event(generation, event);
            }
        });

        let transport = match self.factory.open(&self.url, &self.protocols, sink) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Failed to open transport");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let opened = {
            let mut link = self.link.lock();
            if link.generation != generation {
                return Ok(());
            }
            link.transport = Some(Arc::clone(&transport));
            transport.ready_state() == ReadyState::Open
        };

        // Factories that open synchronously emitted `open` before the
        // transport was stored.
        if opened {
            self.on_opened(generation);
        }
        Ok(())
    }

    /// Closes the transport and cancels any pending interruption reconnect.
    pub(crate) fn disconnect(&self) {
        self.cancel_interruption();
        self.drop_link(CLOSE_NORMAL, "client disconnect");
    }

    /// Simulates an outage, optionally reconnecting after its duration.
    ///
    /// A consumer that is neither connected nor inside an earlier outage is
    /// left alone; nothing is scheduled.
    pub(crate) fn interrupt(&self, options: InterruptionOptions) {
        let extends_outage = self.cancel_interruption();
        info!(
            duration_ms = options.duration.as_millis() as u64,
            reconnect = options.reconnect,
            "Simulating network interruption"
        );
        let dropped = self.drop_link(CLOSE_ABNORMAL, "network interruption");

        if !dropped && !extends_outage {
            debug!("No connection to interrupt");
            return;
        }
        if !options.reconnect {
            return;
        }

        let this = self.this.clone();
        let handle = self.scheduler.schedule(options.duration, move || {
            let Some(controller) = this.upgrade() else {
                return;
            };
            controller.interruption.lock().take();
            info!("Interruption over, reconnecting");
            if let Err(e) = controller.connect() {
                warn!(error = %e, "Reconnect after interruption failed");
            }
        });
        *self.interruption.lock() = Some(handle);
    }

    /// Returns `true` if an interruption reconnect is pending.
    pub(crate) fn has_pending_reconnect(&self) -> bool {
        self.interruption
            .lock()
            .as_ref()
            .is_some_and(TaskHandle::is_pending)
    }

    /// Cancels the pending interruption reconnect. Returns `true` if one was
    /// still waiting.
    fn cancel_interruption(&self) -> bool {
        let handle = self.interruption.lock().take();
        match handle {
            Some(handle) if handle.cancel() => {
                debug!(task = %handle.id(), "Cancelled pending reconnect");
                true
            }
            _ => false,
        }
    }

    /// Tears down the current link. Returns `false` if there was none.
    fn drop_link(&self, code: u16, reason: &str) -> bool {
        let transport = {
            let mut link = self.link.lock();
            link.generation += 1;
            link.transport.take()
        };
        let previous = self.state.send_replace(ConnectionState::Disconnected);

        if let Some(transport) = &transport {
            transport.close(Some(code), Some(reason));
        }
        if previous == ConnectionState::Disconnected && transport.is_none() {
            return false;
        }

        info!(code, reason, "Disconnected");
        self.cascade_disconnect();
        true
    }

    /// Forces every live record to `Disconnected`.
    fn cascade_disconnect(&self) {
        for subscription in self.registry.snapshot() {
            self.cancel_lifecycle_task(subscription.id());
            let previous = subscription.transition(
                |state| {
                    matches!(
                        state,
                        SubscriptionState::Subscribing | SubscriptionState::Confirmed
                    )
                },
                SubscriptionState::Disconnected,
            );
            if previous == Some(SubscriptionState::Confirmed) {
                subscription.fire(CallbackEvent::Disconnected);
            }
        }
    }

    fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        if self.link.lock().generation != generation {
            trace!(generation, ?event, "Ignoring stale transport event");
            return;
        }

        match event {
            TransportEvent::Open => self.on_opened(generation),
            TransportEvent::Message(text) => self.handle_frame(&text),
            TransportEvent::Close { code, reason } => {
                warn!(code, %reason, "Transport closed");
                self.drop_link(code, &reason);
            }
            TransportEvent::Error(message) => {
                warn!(error = %message, "Transport error");
            }
        }
    }

    fn on_opened(&self, generation: u64) {
        let transport = {
            let link = self.link.lock();
            if link.generation != generation {
                return;
            }
            link.transport.clone()
        };
        let Some(transport) = transport else {
            return;
        };

        let changed = self.state.send_if_modified(|state| {
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = ConnectionState::Connected;
            true
        });
        if !changed {
            return;
        }
        info!(url = %self.url, generation, "Connected");

        let monitor = ChannelIdentifier::new(CONNECTION_MONITOR_CHANNEL).canonicalize();
        if let Err(e) = self.write(&transport, &OutboundEnvelope::subscribe(&monitor), false) {
            warn!(error = %e, "Failed to subscribe connection monitor");
        }

        for subscription in self.registry.snapshot() {
            if subscription.state().needs_subscribe() {
                self.schedule_subscribe(&subscription);
            }
        }
    }
}

// ============================================================================
// ConnectionController - Subscriptions
// ============================================================================

impl ConnectionController {
    /// Registers a new record and subscribes it once the connection allows.
    pub(crate) fn subscribe(
        &self,
        identifier: ChannelIdentifier,
        callbacks: Callbacks,
    ) -> Subscription {
        let subscription = self.registry.create(identifier, callbacks, self.this.clone());
        debug!(
            subscription_id = %subscription.id(),
            identifier = %subscription.canonical(),
            "Subscription created"
        );

        if self.is_connected() {
            self.schedule_subscribe(&subscription);
        }
        subscription
    }

    /// Subscribes a record after the configured subscription delay.
    fn schedule_subscribe(&self, subscription: &Subscription) {
        let delay = self.settings.subscription_delay;
        if delay.is_zero() {
            self.request_subscription(subscription);
            return;
        }

        self.cancel_lifecycle_task(subscription.id());
        let this = self.this.clone();
        let record = subscription.clone();
        let handle = self.scheduler.schedule(delay, move || {
            if let Some(controller) = this.upgrade() {
                controller.request_subscription(&record);
            }
        });
        self.lifecycle_tasks.lock().insert(subscription.id(), handle);
    }

    /// Removes a record, unsubscribing it on the wire if the server knows it.
    ///
    /// Returns `false` if the record was already removed.
    pub(crate) fn remove_subscription(&self, subscription: &Subscription) -> bool {
        self.cancel_lifecycle_task(subscription.id());
        if !self.registry.remove(subscription) {
            subscription.mark_unsubscribed();
            return false;
        }

        let previous = subscription.mark_unsubscribed();
        debug!(
            subscription_id = %subscription.id(),
            identifier = %subscription.canonical(),
            "Subscription removed"
        );

        let known_to_server = matches!(
            previous,
            Some(SubscriptionState::Subscribing | SubscriptionState::Confirmed)
        );
        if known_to_server && self.is_connected() {
            let envelope = OutboundEnvelope::unsubscribe(subscription.canonical());
            if let Err(e) = self.transmit(&envelope) {
                warn!(identifier = %subscription.canonical(), error = %e, "Failed to send unsubscribe");
            }
        }

        if previous == Some(SubscriptionState::Confirmed) {
            subscription.fire(CallbackEvent::Disconnected);
        }
        true
    }

    /// Sends the subscribe command for a record and arms its acknowledgement.
    fn request_subscription(&self, subscription: &Subscription) {
        self.cancel_lifecycle_task(subscription.id());
        if !self.is_connected() || !self.registry.contains(subscription) {
            return;
        }

        let moved = subscription.transition(
            SubscriptionState::needs_subscribe,
            SubscriptionState::Subscribing,
        );
        if moved.is_none() && subscription.state() != SubscriptionState::Subscribing {
            return;
        }

        if let Err(e) = self.transmit(&OutboundEnvelope::subscribe(subscription.canonical())) {
            warn!(identifier = %subscription.canonical(), error = %e, "Failed to send subscribe");
            return;
        }

        if !self.settings.auto_confirm {
            return;
        }

        let this = self.this.clone();
        let record = subscription.clone();
        let handle = self
            .scheduler
            .schedule(self.settings.confirmation_delay, move || {
                if let Some(controller) = this.upgrade() {
                    controller.acknowledge(&record);
                }
            });
        self.lifecycle_tasks.lock().insert(subscription.id(), handle);
    }

    /// Simplified server answer to a subscribe command.
    fn acknowledge(&self, subscription: &Subscription) {
        self.finish_lifecycle_task(subscription.id());
        if !self.registry.contains(subscription) {
            return;
        }

        let channel = subscription.identifier().channel();
        let rejected = self
            .settings
            .rejected_channels
            .iter()
            .any(|name| name == channel);

        let identifier = subscription.canonical().clone();
        if rejected {
            self.history.record(
                Direction::Incoming,
                InboundEnvelope::RejectSubscription { identifier }.to_value(),
            );
            self.apply_rejection(subscription);
        } else {
            self.history.record(
                Direction::Incoming,
                InboundEnvelope::ConfirmSubscription { identifier }.to_value(),
            );
            self.apply_confirmation(subscription);
        }
    }

    fn apply_confirmation(&self, subscription: &Subscription) {
        if !self.is_connected() {
            return;
        }
        let moved = subscription.transition(
            |state| state == SubscriptionState::Subscribing,
            SubscriptionState::Confirmed,
        );
        if moved.is_some() {
            subscription.fire(CallbackEvent::Connected);
        }
    }

    fn apply_rejection(&self, subscription: &Subscription) {
        let moved = subscription.transition(
            |state| state == SubscriptionState::Subscribing,
            SubscriptionState::Rejected,
        );
        if moved.is_some() {
            warn!(identifier = %subscription.canonical(), "Subscription rejected");
            subscription.fire(CallbackEvent::Rejected);
        }
    }

    fn cancel_lifecycle_task(&self, id: SubscriptionId) {
        let handle = self.lifecycle_tasks.lock().remove(&id);
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Forgets the timer of `id` once it has run.
    fn finish_lifecycle_task(&self, id: SubscriptionId) {
        let mut tasks = self.lifecycle_tasks.lock();
        if tasks.get(&id).is_some_and(|handle| !handle.is_pending()) {
            tasks.remove(&id);
        }
    }
}

// ============================================================================
// ConnectionController - Outbound
// ============================================================================

impl ConnectionController {
    /// Writes an envelope to the live transport and records it.
    ///
    /// Sending while disconnected is not an error: the envelope is dropped,
    /// logged and counted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the envelope cannot be encoded.
    pub(crate) fn transmit(&self, envelope: &OutboundEnvelope) -> Result<SendOutcome> {
        let transport = if self.is_connected() {
            self.link.lock().transport.clone()
        } else {
            None
        };

        match transport {
            Some(transport) => self.write(&transport, envelope, true),
            None => {
                Counters::bump(&self.counters.dropped_sends);
                warn!(
                    command = envelope.command(),
                    identifier = envelope.identifier(),
                    "Dropped send: not connected"
                );
                Ok(SendOutcome::Dropped)
            }
        }
    }

    fn write(
        &self,
        transport: &Arc<dyn Transport>,
        envelope: &OutboundEnvelope,
        record: bool,
    ) -> Result<SendOutcome> {
        let text = encode(envelope)?;
        if let Err(e) = transport.send(&text) {
            Counters::bump(&self.counters.dropped_sends);
            warn!(command = envelope.command(), error = %e, "Dropped send: transport refused");
            return Ok(SendOutcome::Dropped);
        }

        self.log_frame(Direction::Outgoing, &text);
        if record {
            self.history
                .record(Direction::Outgoing, serde_json::to_value(envelope)?);
        }
        Ok(SendOutcome::Sent)
    }

    fn send_pong(&self, message: Value) {
        let transport = self.link.lock().transport.clone();
        let Some(transport) = transport else {
            trace!("Ping without transport");
            return;
        };

        let sent = encode(&PongFrame::echo(message))
            .and_then(|text| transport.send(&text).map(|()| text));
        match sent {
            Ok(text) => {
                Counters::bump(&self.counters.pongs_sent);
                self.log_frame(Direction::Outgoing, &text);
            }
            Err(e) => debug!(error = %e, "Failed to answer ping"),
        }
    }

    fn log_frame(&self, direction: Direction, frame: &str) {
        if self.settings.debug_logging {
            debug!(%direction, frame, "Frame");
        } else {
            trace!(%direction, frame, "Frame");
        }
    }
}

// ============================================================================
// ConnectionController - Inbound
// ============================================================================

impl ConnectionController {
    /// Decodes and handles one inbound frame. Never fails.
    pub(crate) fn handle_frame(&self, text: &str) {
        self.log_frame(Direction::Incoming, text);
        match decode_inbound(text) {
            Ok(envelope) => self.handle_envelope(envelope),
            Err(e) => {
                Counters::bump(&self.counters.decode_errors);
                warn!(error = %e, frame = text, "Dropping undecodable frame");
            }
        }
    }

    /// Handles one decoded inbound envelope.
    pub(crate) fn handle_envelope(&self, envelope: InboundEnvelope) {
        if envelope.is_control() {
            self.history.record(Direction::Incoming, envelope.to_value());
        }

        match envelope {
            InboundEnvelope::Ping { message } => self.send_pong(message),
            InboundEnvelope::Pong { .. } => trace!("Pong received"),
            InboundEnvelope::Welcome => debug!("Welcome received"),
            InboundEnvelope::Disconnect { reason, reconnect } => {
                let reason = reason.unwrap_or_else(|| "server disconnect".to_string());
                info!(%reason, reconnect, "Server requested disconnect");
                self.drop_link(CLOSE_NORMAL, &reason);
                if reconnect && let Err(e) = self.connect() {
                    warn!(error = %e, "Reconnect after server disconnect failed");
                }
            }
            InboundEnvelope::ConfirmSubscription { identifier } => {
                for subscription in self.acknowledged(&identifier, "confirmation") {
                    self.apply_confirmation(&subscription);
                }
            }
            InboundEnvelope::RejectSubscription { identifier } => {
                for subscription in self.acknowledged(&identifier, "rejection") {
                    self.apply_rejection(&subscription);
                }
            }
            InboundEnvelope::Message {
                identifier,
                message,
            } => {
                self.simulate_incoming(identifier, message);
            }
            InboundEnvelope::Unknown { kind } => debug!(%kind, "Ignoring unknown frame type"),
        }
    }

    /// Resolves the records an explicit server answer applies to, cancelling
    /// their automatic acknowledgement.
    fn acknowledged(&self, identifier: &CanonicalIdentifier, answer: &str) -> Vec<Subscription> {
        let matches = self.registry.find_all(identifier);
        if matches.is_empty() {
            debug!(%identifier, answer, "Subscription answer for unknown identifier");
        }
        for subscription in &matches {
            self.cancel_lifecycle_task(subscription.id());
        }
        matches
    }

    /// Passes a data message through the network policy, then routes it.
    pub(crate) fn simulate_incoming(
        &self,
        identifier: CanonicalIdentifier,
        payload: Value,
    ) -> Delivery {
        let admission = self.network.lock().admit();
        match admission {
            Admission::Drop => {
                Counters::bump(&self.counters.dropped_packets);
                info!(%identifier, "Packet loss: inbound message dropped");
                Delivery::Dropped
            }
            Admission::Deliver(delay) if delay.is_zero() => {
                Delivery::Routed(self.route(&identifier, &payload))
            }
            Admission::Deliver(delay) => {
                debug!(%identifier, delay_ms = delay.as_millis() as u64, "Latency: delaying inbound message");
                let this = self.this.clone();
                self.scheduler.schedule(delay, move || {
                    if let Some(controller) = this.upgrade() {
                        controller.route(&identifier, &payload);
                    }
                });
                Delivery::Delayed(delay)
            }
        }
    }

    /// Records and dispatches a data message.
    fn route(&self, identifier: &CanonicalIdentifier, payload: &Value) -> DispatchReport {
        self.history.record(
            Direction::Incoming,
            InboundEnvelope::Message {
                identifier: identifier.clone(),
                message: payload.clone(),
            }
            .to_value(),
        );

        let report = self.registry.dispatch_incoming(identifier, payload);
        if report.is_unhandled() {
            let reason = if report.matched == 0 {
                UnhandledReason::NoSubscription
            } else {
                UnhandledReason::NotConfirmed
            };
            self.report_unhandled(UnhandledMessage {
                identifier: identifier.clone(),
                payload: payload.clone(),
                reason,
            });
        }
        report
    }

    fn report_unhandled(&self, message: UnhandledMessage) {
        Counters::bump(&self.counters.routing_misses);
        debug!(identifier = %message.identifier, reason = ?message.reason, "Unhandled message");

        self.unhandled.lock().push(message.clone());
        let listeners = self.unhandled_listeners.lock().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&message))).is_err() {
                error!(identifier = %message.identifier, "Unhandled-message listener panicked");
            }
        }
    }
}

// ============================================================================
// ConnectionController - Teardown
// ============================================================================

impl ConnectionController {
    /// Disconnects, removes every record and clears all logs.
    pub(crate) fn reset(&self) {
        self.disconnect();

        let tasks: Vec<_> = self.lifecycle_tasks.lock().drain().collect();
        for (_, handle) in tasks {
            handle.cancel();
        }
        let cancelled = self.scheduler.cancel_all();

        let removed = self.registry.clear();
        for subscription in &removed {
            subscription.mark_unsubscribed();
        }

        self.history.clear();
        self.unhandled.lock().clear();
        self.counters.reset();
        debug!(removed = removed.len(), cancelled, "Controller reset");
    }
}

// ============================================================================
// Tests
// ============================================================================
