//! Session and subscription tests against in-memory collaborators
//!
//! The mock connector hands out transports whose lines are pushed by the
//! test; the mock executor records every control request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lstream_client::testing::{mock_session, wait_for, MockConnector, MockExecutor, MockTransport};
use lstream_client::{
    ClientError, ErrorKind, ItemData, MessageOptions, Session, StartOptions, Subscription,
    SubscriptionConfig, SubscriptionMode, TransportError,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use url::Url;

const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    session: Session,
    connector: Arc<MockConnector>,
    executor: Arc<MockExecutor>,
}

impl Fixture {
    fn new() -> Self {
        let (session, connector, executor) = mock_session("http://push.test:8080").unwrap();
        Self {
            session,
            connector,
            executor,
        }
    }

    async fn connected() -> Self {
        let fixture = Self::new();
        fixture.session.connect().await.unwrap();
        fixture
    }

    fn transport(&self) -> Arc<MockTransport> {
        self.connector.transport().unwrap()
    }

    fn subscribe(&self, mode: SubscriptionMode) -> Arc<Subscription> {
        self.session
            .build_subscription(SubscriptionConfig::new(["X"], ["bid", "ask"], mode))
            .unwrap()
    }
}

fn values(pairs: &[(&str, &str)]) -> ItemData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Some(v.to_string())))
        .collect()
}

/// Count data callbacks on a subscription
fn count_updates(subscription: &Subscription) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    subscription.on_data(move |_, _, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    count
}

// =============================================================================
// Merge / distinct
// =============================================================================

#[tokio::test]
async fn test_merge_mode_overlays_updates() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    let updates = count_updates(&sub);
    sub.start(StartOptions::default()).await.unwrap();

    let transport = fixture.transport();
    transport.push_line(format!("{},1|10|", sub.id()));
    transport.push_line(format!("{},1||20", sub.id()));

    assert!(wait_for(|| updates.load(Ordering::SeqCst) == 2, WAIT).await);
    assert_eq!(
        sub.item_data("X").unwrap(),
        values(&[("bid", "10"), ("ask", "20")])
    );
}

#[tokio::test]
async fn test_distinct_mode_replaces_updates() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Distinct);
    let updates = count_updates(&sub);
    sub.start(StartOptions::default()).await.unwrap();

    let transport = fixture.transport();
    transport.push_line(format!("{},1|10|", sub.id()));
    transport.push_line(format!("{},1||20", sub.id()));

    assert!(wait_for(|| updates.load(Ordering::SeqCst) == 2, WAIT).await);
    assert_eq!(sub.item_data("X").unwrap(), values(&[("ask", "20")]));
}

#[tokio::test]
async fn test_item_data_is_independent_copy() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    let updates = count_updates(&sub);

    fixture.transport().push_line(format!("{},1|10|20", sub.id()));
    assert!(wait_for(|| updates.load(Ordering::SeqCst) == 1, WAIT).await);

    let mut copy = sub.item_data("X").unwrap();
    copy.insert("bid".to_string(), Some("999".to_string()));
    copy.remove("ask");

    assert_eq!(
        sub.item_data("X").unwrap(),
        values(&[("bid", "10"), ("ask", "20")])
    );
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_line_goes_to_first_matching_subscription_only() {
    let fixture = Fixture::connected().await;
    let first = fixture.subscribe(SubscriptionMode::Merge);
    let second = fixture.subscribe(SubscriptionMode::Merge);
    let first_updates = count_updates(&first);
    let second_updates = count_updates(&second);

    let messages = Arc::new(AtomicUsize::new(0));
    let counter = messages.clone();
    fixture.session.on_message_result(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let transport = fixture.transport();
    transport.push_line(format!("{},1|1|2", first.id()));
    transport.push_line(format!("{},1|3|4", second.id()));

    assert!(wait_for(|| second_updates.load(Ordering::SeqCst) == 1, WAIT).await);
    assert_eq!(first_updates.load(Ordering::SeqCst), 1);
    assert_eq!(first.item_data("X").unwrap(), values(&[("bid", "1"), ("ask", "2")]));
    assert_eq!(second.item_data("X").unwrap(), values(&[("bid", "3"), ("ask", "4")]));
    assert_eq!(messages.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unrecognized_lines_do_not_stop_dispatch() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    let updates = count_updates(&sub);

    let transport = fixture.transport();
    transport.push_line("garbage");
    transport.push_line(format!("{},9|1|2", sub.id()));
    transport.push_line(format!("{},1|1|2", sub.id()));

    assert!(wait_for(|| updates.load(Ordering::SeqCst) == 1, WAIT).await);
    assert!(fixture.session.is_connected());
    assert!(fixture.session.error().is_none());
}

#[tokio::test]
async fn test_removed_subscription_gets_no_lines() {
    let fixture = Fixture::connected().await;
    let removed = fixture.subscribe(SubscriptionMode::Merge);
    let kept = fixture.subscribe(SubscriptionMode::Merge);
    removed.start(StartOptions::default()).await.unwrap();
    let removed_updates = count_updates(&removed);
    let kept_updates = count_updates(&kept);

    fixture.session.remove_subscription(&removed).await.unwrap();
    assert!(!removed.is_active());
    assert_eq!(fixture.session.subscriptions().len(), 1);
    assert_eq!(fixture.executor.operations(), vec!["add", "delete"]);

    let transport = fixture.transport();
    transport.push_line(format!("{},1|1|2", removed.id()));
    transport.push_line(format!("{},1|1|2", kept.id()));

    assert!(wait_for(|| kept_updates.load(Ordering::SeqCst) == 1, WAIT).await);
    assert_eq!(removed_updates.load(Ordering::SeqCst), 0);
    assert!(removed.item_data("X").unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_unregistered_subscription() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    fixture.session.remove_subscription(&sub).await.unwrap();

    let err = fixture.session.remove_subscription(&sub).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_remove_unregisters_even_when_stop_fails() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();
    fixture.executor.fail_operation("delete", 13, "Table not found");

    let err = fixture.session.remove_subscription(&sub).await.unwrap_err();
    assert_eq!(err, ClientError::control("delete", 13, "Table not found"));
    assert!(sub.is_active());
    assert!(fixture.session.subscriptions().is_empty());
}

#[tokio::test]
async fn test_panicking_callback_becomes_session_error() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.on_data(|_, _, _, _| panic!("bad callback"));

    let transport = fixture.transport();
    transport.push_line(format!("{},1|1|2", sub.id()));

    assert!(wait_for(|| !fixture.session.is_connected(), WAIT).await);
    assert_eq!(
        fixture.session.error(),
        Some(ClientError::Dispatch("bad callback".to_string()))
    );
    assert_eq!(fixture.session.error().unwrap().kind(), ErrorKind::Internal);
    assert!(transport.is_closed());
}

// =============================================================================
// Subscription activation
// =============================================================================

#[tokio::test]
async fn test_start_sends_add_once() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);

    sub.start(StartOptions::default()).await.unwrap();
    sub.start(StartOptions::default()).await.unwrap();
    assert!(sub.is_active());

    let requests = fixture.executor.requests();
    assert_eq!(requests.len(), 1);
    let add = &requests[0];
    assert_eq!(add.operation(), "add");
    assert_eq!(add.param("LS_session"), Some("S1"));
    assert_eq!(add.param("LS_table"), Some(sub.id().to_string().as_str()));
    assert_eq!(add.param("LS_mode"), Some("MERGE"));
    assert_eq!(add.param("LS_id"), Some("X"));
    assert_eq!(add.param("LS_schema"), Some("bid ask"));
}

#[tokio::test]
async fn test_silent_start_and_unsilence() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);

    // Not active yet
    sub.unsilence().await.unwrap();
    assert!(fixture.executor.requests().is_empty());

    sub.start(StartOptions::silent()).await.unwrap();
    sub.unsilence().await.unwrap();

    let requests = fixture.executor.requests();
    assert_eq!(fixture.executor.operations(), vec!["add_silent", "start"]);
    assert_eq!(
        requests[1].param("LS_table"),
        Some(sub.id().to_string().as_str())
    );
}

#[tokio::test]
async fn test_failed_start_leaves_subscription_inactive() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    fixture
        .executor
        .fail_operation("add", 17, "Data Adapter not found");

    let err = sub.start(StartOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Control);
    assert!(!sub.is_active());
}

#[tokio::test]
async fn test_failed_stop_keeps_subscription_active() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();
    fixture.executor.fail_operation("delete", 13, "Table not found");

    assert!(sub.stop().await.is_err());
    assert!(sub.is_active());
}

#[tokio::test]
async fn test_start_requires_connection() {
    let fixture = Fixture::new();
    let sub = fixture.subscribe(SubscriptionMode::Merge);

    let err = sub.start(StartOptions::default()).await.unwrap_err();
    assert_eq!(err, ClientError::NotConnected);
    assert!(!sub.is_active());
}

#[tokio::test]
async fn test_subscription_outlives_session() {
    let fixture = Fixture::new();
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    drop(fixture);

    assert_eq!(
        sub.start(StartOptions::default()).await.unwrap_err(),
        ClientError::SessionDropped
    );
    assert!(sub.item_data("X").unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_subscription_config_rejected() {
    let fixture = Fixture::new();
    let err = fixture
        .session
        .build_subscription(SubscriptionConfig::new(
            ["X", "X"],
            ["bid"],
            SubscriptionMode::Merge,
        ))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(fixture.session.subscriptions().is_empty());
}

// =============================================================================
// Bulk start
// =============================================================================

#[tokio::test]
async fn test_bulk_start_reports_each_result() {
    let fixture = Fixture::connected().await;
    let a = fixture.subscribe(SubscriptionMode::Merge);
    let b = fixture.subscribe(SubscriptionMode::Distinct);
    let c = fixture.subscribe(SubscriptionMode::Merge);

    let b_table = b.id().to_string();
    fixture.executor.fail_when(
        move |request| request.param("LS_table") == Some(b_table.as_str()),
        ClientError::control("add", 19, "Item not found"),
    );

    let results = fixture
        .session
        .bulk_start(&[a.clone(), b.clone(), c.clone()])
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].clone().unwrap_err(),
        ClientError::control("add", 19, "Item not found")
    );
    assert!(results[2].is_ok());

    assert!(a.is_active());
    assert!(!b.is_active());
    assert!(c.is_active());

    assert_eq!(fixture.executor.bulk_calls(), 1);
    let batch = &fixture.executor.batches()[0];
    let tables: Vec<_> = batch.iter().filter_map(|r| r.param("LS_table")).collect();
    assert_eq!(
        tables,
        vec![a.id().to_string(), b.id().to_string(), c.id().to_string()]
    );
}

#[tokio::test]
async fn test_bulk_start_failure_does_not_deactivate() {
    let fixture = Fixture::connected().await;
    let a = fixture.subscribe(SubscriptionMode::Merge);
    a.start(StartOptions::default()).await.unwrap();

    fixture.executor.fail_operation("add", 21, "Table already exists");
    let results = fixture.session.bulk_start(&[a.clone()]).await.unwrap();

    assert!(results[0].is_err());
    assert!(a.is_active());
}

#[tokio::test]
async fn test_bulk_start_edge_cases() {
    let fixture = Fixture::new();
    assert!(fixture.session.bulk_start(&[]).await.unwrap().is_empty());

    let sub = fixture.subscribe(SubscriptionMode::Merge);
    assert_eq!(
        fixture.session.bulk_start(&[sub.clone()]).await.unwrap_err(),
        ClientError::NotConnected
    );

    let other = Fixture::connected().await;
    let err = other.session.bulk_start(&[sub]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(other.executor.bulk_calls(), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_is_idempotent() {
    let fixture = Fixture::connected().await;
    fixture.session.connect().await.unwrap();

    assert_eq!(fixture.connector.connect_count(), 1);
    assert!(fixture.session.is_connected());
    assert_eq!(fixture.session.session_id().as_deref(), Some("S1"));
}

#[tokio::test]
async fn test_connect_failure_rolls_back() {
    let fixture = Fixture::new();
    fixture
        .connector
        .fail_next_connect(TransportError::ConnectionFailed("refused".into()));

    let err = fixture.session.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!fixture.session.is_connected());
    assert_eq!(fixture.session.session_id(), None);

    fixture.session.connect().await.unwrap();
    assert!(fixture.session.is_connected());
    assert_eq!(fixture.connector.connect_count(), 2);
}

#[tokio::test]
async fn test_disconnect_destroys_and_deactivates() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();
    let transport = fixture.transport();

    fixture.session.disconnect().await.unwrap();

    assert!(!fixture.session.is_connected());
    assert!(!sub.is_active());
    assert!(transport.is_closed());
    assert_eq!(fixture.executor.operations(), vec!["add", "destroy"]);
    // The stream ended because the session was destroyed
    assert_eq!(fixture.session.error(), Some(ClientError::SessionEnded(None)));
    assert_eq!(
        fixture.session.error().map(|e| e.kind()),
        Some(ErrorKind::SessionEnd)
    );
}

#[tokio::test]
async fn test_disconnect_abandons_pending_connect() {
    let fixture = Fixture::new();
    fixture.connector.stall_next_connect();

    let session = fixture.session.clone();
    let connecting = tokio::spawn(async move { session.connect().await });
    assert!(wait_for(|| fixture.connector.connect_count() == 1, WAIT).await);

    tokio::time::timeout(WAIT, fixture.session.disconnect())
        .await
        .expect("disconnect must not wait for a stalled connect")
        .unwrap();

    let err = tokio::time::timeout(WAIT, connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err, ClientError::Transport(TransportError::Cancelled));
    assert!(!fixture.session.is_connected());
    assert!(fixture.executor.requests().is_empty());

    // A later connect is not affected by the earlier cancellation
    fixture.session.connect().await.unwrap();
    assert!(fixture.session.is_connected());
}

#[tokio::test]
async fn test_disconnect_cleans_up_when_destroy_fails() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();
    fixture
        .executor
        .fail_operation("destroy", 20, "Session not found");
    let transport = fixture.transport();

    let err = fixture.session.disconnect().await.unwrap_err();

    assert_eq!(err, ClientError::control("destroy", 20, "Session not found"));
    assert!(!fixture.session.is_connected());
    assert!(!sub.is_active());
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_disconnect_when_stream_does_not_end() {
    let fixture = Fixture::connected().await;
    // Destroy succeeds but the stream stays open; the loop is aborted
    // after the join timeout.
    fixture
        .executor
        .link_connector(Arc::new(MockConnector::new()));

    fixture.session.disconnect().await.unwrap();
    assert!(!fixture.session.is_connected());
    assert!(fixture.transport().is_closed());
}

#[tokio::test]
async fn test_unexpected_stream_end_keeps_subscriptions_active() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();

    fixture
        .transport()
        .end(Some(TransportError::ConnectionClosed));

    assert!(wait_for(|| !fixture.session.is_connected(), WAIT).await);
    assert!(sub.is_active());
    assert_eq!(
        fixture.session.error(),
        Some(ClientError::Transport(TransportError::ConnectionClosed))
    );

    // Disconnecting afterwards reconciles the flags without a destroy
    fixture.session.disconnect().await.unwrap();
    assert!(!sub.is_active());
    assert_eq!(fixture.executor.operations(), vec!["add"]);
}

#[tokio::test]
async fn test_server_initiated_end_is_unexpected() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();

    // END without a preceding disconnect, e.g. the session was killed
    fixture
        .transport()
        .end(Some(TransportError::SessionEnded(Some(31))));
    assert!(wait_for(|| !fixture.session.is_connected(), WAIT).await);

    let error = fixture.session.error().unwrap();
    assert_eq!(
        error,
        ClientError::Transport(TransportError::SessionEnded(Some(31)))
    );
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(sub.is_active());
}

#[tokio::test]
async fn test_reconnect_clears_error() {
    let fixture = Fixture::connected().await;
    fixture.transport().end(Some(TransportError::SessionEnded(Some(31))));
    assert!(wait_for(|| fixture.session.error().is_some(), WAIT).await);

    fixture.session.connect().await.unwrap();
    assert!(fixture.session.error().is_none());
    assert_eq!(fixture.session.session_id().as_deref(), Some("S2"));
}

#[tokio::test]
async fn test_force_rebind() {
    let fixture = Fixture::new();
    fixture.session.force_rebind().await.unwrap();
    assert!(fixture.executor.requests().is_empty());

    fixture.session.connect().await.unwrap();
    fixture.session.force_rebind().await.unwrap();
    assert_eq!(fixture.executor.operations(), vec!["force_rebind"]);
    assert!(fixture.session.is_connected());
}

// =============================================================================
// Control requests
// =============================================================================

#[tokio::test]
async fn test_control_url_is_read_per_request() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    sub.start(StartOptions::default()).await.unwrap();

    let moved = Url::parse("http://push2.test:8080").unwrap();
    fixture.transport().set_control_url(moved.clone());
    sub.stop().await.unwrap();

    let endpoints = fixture.executor.endpoints();
    assert_eq!(endpoints[0].as_str(), "http://push.test:8080/");
    assert_eq!(endpoints[1], moved);
}

#[tokio::test]
async fn test_control_request_merges_params() {
    let fixture = Fixture::connected().await;
    fixture
        .session
        .control_request(
            "reconf",
            vec![
                ("LS_table".to_string(), "4".to_string()),
                ("LS_requested_max_frequency".to_string(), "2".to_string()),
            ],
        )
        .await
        .unwrap();

    let request = &fixture.executor.requests()[0];
    assert_eq!(request.param("LS_session"), Some("S1"));
    assert_eq!(request.param("LS_op"), Some("reconf"));
    assert_eq!(request.param("LS_table"), Some("4"));
}

#[tokio::test]
async fn test_requested_max_bandwidth() {
    let fixture = Fixture::new();

    fixture.session.set_requested_max_bandwidth(30.0).await.unwrap();
    assert!(fixture.executor.requests().is_empty());
    assert_eq!(fixture.session.requested_max_bandwidth(), 30.0);

    fixture.session.connect().await.unwrap();
    assert_eq!(fixture.connector.requests()[0].requested_max_bandwidth, 30.0);

    fixture.session.set_requested_max_bandwidth(0.0).await.unwrap();
    let constrain = &fixture.executor.requests()[0];
    assert_eq!(constrain.operation(), "constrain");
    assert_eq!(constrain.param("LS_requested_max_bandwidth"), Some("unlimited"));

    let err = fixture
        .session
        .set_requested_max_bandwidth(-1.0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(fixture.session.requested_max_bandwidth(), 0.0);
}

// =============================================================================
// Messages
// =============================================================================

#[tokio::test]
async fn test_sync_message_ignores_ordering_fields() {
    let fixture = Fixture::connected().await;
    let options = MessageOptions {
        asynchronous: false,
        sequence: Some("S1".to_string()),
        number: Some(3),
        max_wait: None,
    };
    fixture.session.send_message("hello", options).await.unwrap();

    let request = &fixture.executor.requests()[0];
    assert_eq!(request.operation(), "send_message");
    assert_eq!(request.param("LS_message"), Some("hello"));
    assert_eq!(request.param("LS_sequence"), None);
    assert_eq!(request.param("LS_msg_prog"), None);
}

#[tokio::test]
async fn test_async_message_requires_sequence_and_number() {
    let fixture = Fixture::connected().await;
    let options = MessageOptions {
        asynchronous: true,
        sequence: Some("S1".to_string()),
        number: None,
        max_wait: None,
    };

    let err = fixture.session.send_message("m", options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(fixture.executor.requests().is_empty());
}

#[tokio::test]
async fn test_async_message_outcome_delivered_once() {
    let fixture = Fixture::connected().await;
    let sub = fixture.subscribe(SubscriptionMode::Merge);
    let updates = count_updates(&sub);

    // No observer registered yet: the send must still succeed
    fixture
        .session
        .send_message(
            "m",
            MessageOptions::asynchronous("S1", 1).with_max_wait(Duration::from_millis(250)),
        )
        .await
        .unwrap();

    let request = &fixture.executor.requests()[0];
    assert_eq!(request.param("LS_sequence"), Some("S1"));
    assert_eq!(request.param("LS_msg_prog"), Some("1"));
    assert_eq!(request.param("LS_max_wait"), Some("250"));

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    fixture
        .session
        .on_message_result(move |sequence, numbers, error| {
            sink.lock()
                .push((sequence.to_string(), numbers.to_vec(), error.cloned()));
        });

    let transport = fixture.transport();
    transport.push_line("MSG,S1,1,DONE");
    transport.push_line("MSG,S1,2,ERR,38,Rejected");
    transport.push_line(format!("{},1|1|2", sub.id()));

    assert!(wait_for(|| updates.load(Ordering::SeqCst) == 1, WAIT).await);
    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], ("S1".to_string(), vec![1], None));
    assert_eq!(outcomes[1].1, vec![2]);
    assert_eq!(outcomes[1].2.as_ref().map(|e| e.code), Some(38));
}

#[tokio::test]
async fn test_send_message_requires_connection() {
    let fixture = Fixture::new();
    let err = fixture
        .session
        .send_message("m", MessageOptions::sync())
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::NotConnected);
}
