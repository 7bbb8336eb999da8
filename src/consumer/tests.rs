use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use super::*;
use crate::connection::{
    ConnectionState, Delivery, InterruptionOptions, NetworkConditions, SendOutcome,
    UnhandledReason,
};
use crate::protocol::ChannelIdentifier;
use crate::subscription::{Callbacks, SubscriptionState};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connected(builder: ConsumerBuilder) -> Consumer {
    init_tracing();
    let consumer = builder.build().expect("consumer");
    consumer.connect().expect("connect");
    consumer
        .wait_until_connected(Duration::from_secs(1))
        .await
        .expect("connected");
    consumer
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn collector() -> (Callbacks, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&seen);
    let callbacks = Callbacks::new().on_received(move |payload| store.lock().push(payload.clone()));
    (callbacks, seen)
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let hits = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&hits);
    (hits, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_parameterized_channel_receives_once() {
    let consumer = connected(Consumer::builder()).await;
    let room = ChannelIdentifier::new("ChatChannel").param("room", 1);
    let (callbacks, seen) = collector();
    let subscription = consumer.subscribe(room.clone(), callbacks);
    settle().await;
    assert!(subscription.is_confirmed());

    let delivery = consumer.simulate_incoming_message(room, json!({"text": "hi"}));

    assert_eq!(delivery.delivered(), Some(1));
    assert_eq!(*seen.lock(), vec![json!({"text": "hi"})]);
}

#[tokio::test(start_paused = true)]
async fn test_identifier_key_order_does_not_matter() {
    let consumer = connected(Consumer::builder()).await;
    let (callbacks, seen) = collector();
    consumer
        .subscribe_value(json!({"room": 1, "channel": "ChatChannel"}), callbacks)
        .expect("identifier");
    settle().await;

    consumer.simulate_incoming_message(
        ChannelIdentifier::new("ChatChannel").param("room", 1),
        json!("a"),
    );
    consumer.simulate_raw_frame(
        r#"{"identifier":"{\"room\":1,\"channel\":\"ChatChannel\"}","message":"b"}"#,
    );

    assert_eq!(*seen.lock(), vec![json!("a"), json!("b")]);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_in_subscription_order() {
    let consumer = connected(Consumer::builder()).await;
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let log = Arc::clone(&order);
        consumer.subscribe(
            "Notif",
            Callbacks::new().on_received(move |_| log.lock().push(label)),
        );
    }
    settle().await;

    consumer.simulate_incoming_message("Notif", json!({}));

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_does_not_block_siblings() {
    let consumer = connected(Consumer::builder()).await;
    consumer.subscribe("Notif", Callbacks::new().on_received(|_| panic!("boom")));
    let (callbacks, seen) = collector();
    consumer.subscribe("Notif", callbacks);
    settle().await;

    let delivery = consumer.simulate_incoming_message("Notif", json!(1));

    assert_eq!(delivery.delivered(), Some(2));
    assert_eq!(seen.lock().len(), 1);
    assert!(consumer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_and_unsubscribed_records_do_not_receive() {
    let consumer = connected(Consumer::builder().auto_confirm(false)).await;
    let (live_callbacks, live) = collector();
    let (rejected_callbacks, rejected_seen) = collector();
    let (removed_callbacks, removed_seen) = collector();

    let rejected_sub = consumer.subscribe("Feed", rejected_callbacks);
    settle().await;
    consumer.reject_subscription("Feed");
    assert_eq!(rejected_sub.state(), SubscriptionState::Rejected);

    let live_sub = consumer.subscribe("Feed", live_callbacks);
    let removed_sub = consumer.subscribe("Feed", removed_callbacks);
    settle().await;
    consumer.confirm_subscription("Feed");
    assert!(live_sub.is_confirmed());
    assert_eq!(rejected_sub.state(), SubscriptionState::Rejected);

    consumer.unsubscribe(&removed_sub);

    consumer.simulate_incoming_message("Feed", json!("x"));

    assert_eq!(live.lock().len(), 1);
    assert!(rejected_seen.lock().is_empty());
    assert!(removed_seen.lock().is_empty());
    assert_eq!(removed_sub.state(), SubscriptionState::Unsubscribed);
}

#[tokio::test(start_paused = true)]
async fn test_reject_subscription_fires_rejected() {
    let consumer = connected(Consumer::builder().auto_confirm(false)).await;
    let (hits, on_rejected) = counter();
    let (callbacks, seen) = collector();
    let subscription = consumer.subscribe("Admin", callbacks.on_rejected(on_rejected));
    settle().await;

    consumer.reject_subscription("Admin");
    consumer.simulate_incoming_message("Admin", json!(1));

    assert_eq!(subscription.state(), SubscriptionState::Rejected);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unhandled_side_channel() {
    let consumer = connected(Consumer::builder()).await;
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&reasons);
    consumer.on_unhandled(move |message| store.lock().push(message.reason));

    let delivery = consumer.simulate_incoming_message("Nobody", json!({}));

    assert_eq!(delivery.delivered(), Some(0));
    assert_eq!(*reasons.lock(), vec![UnhandledReason::NoSubscription]);
    assert_eq!(consumer.unhandled_messages().len(), 1);
    assert_eq!(consumer.stats().routing_misses, 1);
}

// ============================================================================
// Outbound
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_to_channel_before_and_after_connect() {
    init_tracing();
    let consumer = Consumer::builder().build().expect("consumer");
    let payload = json!({"action": "speak", "message": "hi"});

    let outcome = consumer.send_to_channel("Chat", payload.clone()).expect("send");
    assert_eq!(outcome, SendOutcome::Dropped);
    assert_eq!(consumer.stats().dropped_sends, 1);
    assert!(consumer.outgoing_history().is_empty());

    consumer.connect().expect("connect");
    consumer
        .wait_until_connected(Duration::from_secs(1))
        .await
        .expect("connected");

    let outcome = consumer.send_to_channel("Chat", payload.clone()).expect("send");
    assert_eq!(outcome, SendOutcome::Sent);

    let outgoing = consumer.outgoing_history();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].command(), Some("message"));
    assert_eq!(outgoing[0].data(), Some(payload));
}

#[tokio::test(start_paused = true)]
async fn test_perform_requires_confirmation() {
    let consumer = connected(Consumer::builder().confirmation_delay(Duration::from_millis(50))).await;
    let subscription = consumer.subscribe("Chat", Callbacks::new());

    let err = subscription
        .perform("speak", json!({"text": "hi"}))
        .unwrap_err();
    assert!(err.is_invalid_operation());

    sleep(Duration::from_millis(60)).await;
    assert!(subscription.is_confirmed());

    let before = consumer.outgoing_history().len();
    let outcome = subscription
        .perform("speak", json!({"text": "hi"}))
        .expect("perform");

    assert!(outcome.is_sent());
    let outgoing = consumer.outgoing_history();
    assert_eq!(outgoing.len(), before + 1);
    assert_eq!(
        outgoing[before].data(),
        Some(json!({"action": "speak", "text": "hi"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_one_of_two() {
    let consumer = connected(Consumer::builder()).await;
    let (first_callbacks, first_seen) = collector();
    let (second_callbacks, second_seen) = collector();
    let first = consumer.subscribe("Notif", first_callbacks);
    let second = consumer.subscribe("Notif", second_callbacks);
    settle().await;

    assert!(consumer.unsubscribe(&first));
    assert!(!consumer.unsubscribe(&first));

    let unsubscribes = consumer
        .get_history()
        .iter()
        .filter(|entry| entry.command() == Some("unsubscribe"))
        .count();
    assert_eq!(unsubscribes, 1);

    consumer.simulate_incoming_message("Notif", json!({"n": 1}));
    assert!(first_seen.lock().is_empty());
    assert_eq!(second_seen.lock().len(), 1);
    assert!(second.is_confirmed());
    assert_eq!(consumer.subscriptions(), vec![second]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_subscribe_before_connect_waits() {
    init_tracing();
    let consumer = Consumer::builder().build().expect("consumer");
    let (hits, on_connected) = counter();
    let subscription = consumer.subscribe("Chat", Callbacks::new().on_connected(on_connected));
    settle().await;
    assert_eq!(subscription.state(), SubscriptionState::Pending);

    consumer.connect().expect("connect");
    subscription
        .wait_for_state(SubscriptionState::Confirmed, Duration::from_secs(1))
        .await
        .expect("confirmed");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_delay() {
    let consumer = connected(Consumer::builder().subscription_delay(Duration::from_millis(100))).await;
    let subscription = consumer.subscribe("Chat", Callbacks::new());

    sleep(Duration::from_millis(50)).await;
    assert_eq!(subscription.state(), SubscriptionState::Pending);
    assert!(consumer.outgoing_history().is_empty());

    sleep(Duration::from_millis(60)).await;
    assert!(subscription.is_confirmed());
    assert_eq!(consumer.outgoing_history()[0].command(), Some("subscribe"));
}

#[tokio::test(start_paused = true)]
async fn test_subscription_delay_applies_to_subscribe_before_connect() {
    init_tracing();
    let consumer = Consumer::builder()
        .subscription_delay(Duration::from_millis(500))
        .build()
        .expect("consumer");
    let subscription = consumer.subscribe("Chat", Callbacks::new());

    consumer.connect().expect("connect");
    consumer
        .wait_until_connected(Duration::from_secs(1))
        .await
        .expect("connected");
    settle().await;
    assert_eq!(subscription.state(), SubscriptionState::Pending);
    assert!(consumer.outgoing_history().is_empty());

    sleep(Duration::from_millis(500)).await;
    assert!(subscription.is_confirmed());
}

#[tokio::test(start_paused = true)]
async fn test_subscription_delay_applies_to_resubscribe() {
    let consumer = connected(Consumer::builder().subscription_delay(Duration::from_millis(200))).await;
    let subscription = consumer.subscribe("Chat", Callbacks::new());
    sleep(Duration::from_millis(210)).await;
    assert!(subscription.is_confirmed());

    consumer.disconnect();
    consumer.clear_history();
    consumer.connect().expect("connect");
    settle().await;
    assert!(consumer.is_connected());
    assert_eq!(subscription.state(), SubscriptionState::Disconnected);
    assert!(consumer.outgoing_history().is_empty());

    sleep(Duration::from_millis(210)).await;
    assert!(subscription.is_confirmed());
    assert_eq!(consumer.outgoing_history()[0].command(), Some("subscribe"));
}

#[tokio::test(start_paused = true)]
async fn test_removal_cancels_pending_confirmation() {
    let consumer = connected(Consumer::builder().confirmation_delay(Duration::from_millis(100))).await;
    let (hits, on_connected) = counter();
    let subscription = consumer.subscribe("Chat", Callbacks::new().on_connected(on_connected));

    sleep(Duration::from_millis(50)).await;
    consumer.unsubscribe(&subscription);
    sleep(Duration::from_millis(200)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(subscription.state(), SubscriptionState::Unsubscribed);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_and_reconnect_resubscribes() {
    let consumer = connected(Consumer::builder()).await;
    let (connects, on_connected) = counter();
    let (disconnects, on_disconnected) = counter();
    let subscription = consumer.subscribe(
        "Chat",
        Callbacks::new()
            .on_connected(on_connected)
            .on_disconnected(on_disconnected),
    );
    settle().await;

    consumer.disconnect();
    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
    assert_eq!(subscription.state(), SubscriptionState::Disconnected);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(subscription.perform("speak", json!({})).is_err());

    consumer.connect().expect("connect");
    subscription
        .wait_for_state(SubscriptionState::Confirmed, Duration::from_secs(1))
        .await
        .expect("confirmed");

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(consumer.subscriptions().len(), 1);
}

// ============================================================================
// Network simulation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_interruption_with_reconnect() {
    let consumer = connected(Consumer::builder()).await;
    let subscription = consumer.subscribe("Chat", Callbacks::new());
    settle().await;

    consumer.simulate_network_interruption(InterruptionOptions::new(Duration::from_millis(500)));
    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
    assert_eq!(subscription.state(), SubscriptionState::Disconnected);
    assert!(consumer.has_pending_reconnect());

    sleep(Duration::from_millis(250)).await;
    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);

    sleep(Duration::from_millis(260)).await;
    assert_eq!(consumer.connection_state(), ConnectionState::Connected);
    assert!(subscription.is_confirmed());
}

#[tokio::test(start_paused = true)]
async fn test_interruption_before_connect_is_ignored() {
    init_tracing();
    let consumer = Consumer::builder().build().expect("consumer");

    consumer.simulate_network_interruption(InterruptionOptions::new(Duration::from_millis(100)));
    assert!(!consumer.has_pending_reconnect());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        consumer.simulated_transport().map(|t| t.socket_count()),
        Some(0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_interruption_during_outage_replaces_reconnect() {
    let consumer = connected(Consumer::builder()).await;

    consumer.simulate_network_interruption(InterruptionOptions::new(Duration::from_millis(500)));
    consumer.simulate_network_interruption(InterruptionOptions::new(Duration::from_millis(300)));
    assert!(consumer.has_pending_reconnect());

    sleep(Duration::from_millis(310)).await;
    assert_eq!(consumer.connection_state(), ConnectionState::Connected);

    // Once the outage is over without a reconnect, there is nothing to extend.
    consumer.simulate_network_interruption(
        InterruptionOptions::new(Duration::from_millis(100)).reconnect(false),
    );
    consumer.simulate_network_interruption(InterruptionOptions::new(Duration::from_millis(100)));
    assert!(!consumer.has_pending_reconnect());
}

#[tokio::test(start_paused = true)]
async fn test_interruption_without_reconnect() {
    let consumer = connected(Consumer::builder()).await;

    consumer.simulate_network_interruption(
        InterruptionOptions::new(Duration::from_millis(100)).reconnect(false),
    );
    sleep(Duration::from_millis(300)).await;

    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_new_interruption_cancels_pending_reconnect() {
    let consumer = connected(Consumer::builder()).await;

    consumer.simulate_network_interruption(InterruptionOptions::new(Duration::from_millis(500)));
    sleep(Duration::from_millis(100)).await;
    consumer.simulate_network_interruption(
        InterruptionOptions::new(Duration::from_millis(1000)).reconnect(false),
    );
    assert!(!consumer.has_pending_reconnect());

    sleep(Duration::from_millis(600)).await;
    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_full_packet_loss_routes_nothing() {
    let consumer = connected(Consumer::builder()).await;
    let (callbacks, seen) = collector();
    consumer.subscribe("Ticker", callbacks);
    settle().await;

    consumer
        .set_network_conditions(NetworkConditions::new().with_packet_loss(1.0))
        .expect("conditions");
    for n in 0..50 {
        assert_eq!(
            consumer.simulate_incoming_message("Ticker", json!(n)),
            Delivery::Dropped
        );
    }
    assert!(seen.lock().is_empty());
    assert_eq!(consumer.stats().dropped_packets, 50);

    consumer
        .set_network_conditions(NetworkConditions::new().with_packet_loss(0.0))
        .expect("conditions");
    for n in 0..50 {
        consumer.simulate_incoming_message("Ticker", json!(n));
    }
    assert_eq!(seen.lock().len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_transport_frames_go_through_network_policy() {
    let consumer = connected(
        Consumer::builder().network(NetworkConditions::new().with_latency(Duration::from_millis(80))),
    )
    .await;
    let (callbacks, seen) = collector();
    consumer.subscribe("Ticker", callbacks);
    settle().await;

    let socket = consumer
        .simulated_transport()
        .and_then(|transport| transport.last_socket())
        .expect("socket");
    socket
        .deliver(r#"{"identifier":"{\"channel\":\"Ticker\"}","message":42}"#)
        .expect("deliver");

    assert!(seen.lock().is_empty());
    sleep(Duration::from_millis(100)).await;
    assert_eq!(*seen.lock(), vec![json!(42)]);
}

// ============================================================================
// Frames, history and teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_raw_frames() {
    let consumer = connected(Consumer::builder()).await;
    let before = consumer.get_history().len();

    consumer.simulate_raw_frame("{{broken");
    consumer.simulate_raw_frame(r#"{"type":"ping","message":1}"#);
    consumer.simulate_raw_frame(r#"{"type":"mystery"}"#);

    let stats = consumer.stats();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.pongs_sent, 1);
    assert_eq!(consumer.get_history().len(), before);
    assert!(consumer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_raw_frame_with_null_payload_is_delivered() {
    let consumer = connected(Consumer::builder()).await;
    let (callbacks, seen) = collector();
    let subscription = consumer.subscribe("Chat", callbacks);
    settle().await;
    assert!(subscription.is_confirmed());

    consumer.simulate_raw_frame(r#"{"identifier":"{\"channel\":\"Chat\"}","message":null}"#);

    assert_eq!(consumer.stats().decode_errors, 0);
    assert_eq!(*seen.lock(), vec![Value::Null]);
}

#[tokio::test(start_paused = true)]
async fn test_history_disabled() {
    let consumer = connected(Consumer::builder().record_history(false)).await;
    consumer.subscribe("Chat", Callbacks::new());
    settle().await;
    assert!(consumer.get_history().is_empty());

    consumer.set_record_history(true);
    consumer.send_to_channel("Chat", json!({})).expect("send");
    assert_eq!(consumer.get_history().len(), 1);

    consumer.clear_history();
    assert!(consumer.get_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incoming_history_has_welcome_and_confirmation() {
    let consumer = connected(Consumer::builder()).await;
    consumer.subscribe("Chat", Callbacks::new());
    settle().await;

    let kinds: Vec<_> = consumer
        .incoming_history()
        .iter()
        .filter_map(|entry| entry.kind().map(ToString::to_string))
        .collect();
    assert_eq!(kinds, vec!["welcome", "confirm_subscription"]);
}

#[tokio::test(start_paused = true)]
async fn test_reset() {
    let consumer = connected(Consumer::builder()).await;
    let subscription = consumer.subscribe("Chat", Callbacks::new());
    settle().await;
    consumer.simulate_incoming_message("Ghost", json!({}));

    consumer.reset();

    assert_eq!(consumer.connection_state(), ConnectionState::Disconnected);
    assert!(consumer.subscriptions().is_empty());
    assert!(consumer.get_history().is_empty());
    assert!(consumer.unhandled_messages().is_empty());
    assert_eq!(subscription.state(), SubscriptionState::Unsubscribed);
    assert_eq!(consumer.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_from_json_options() -> anyhow::Result<()> {
    init_tracing();
    let options = ConsumerOptions::from_json(
        r#"{"autoConnect": true, "connectionDelaySeconds": 0.2}"#,
    )?;
    let consumer = Consumer::new(options)?;

    sleep(Duration::from_millis(100)).await;
    assert_eq!(consumer.connection_state(), ConnectionState::Connecting);
    sleep(Duration::from_millis(150)).await;
    assert!(consumer.is_connected());
    Ok(())
}
