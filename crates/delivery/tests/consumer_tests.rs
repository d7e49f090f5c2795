//! Operation-level coverage of the consumer controller.

use ferroq_delivery::spi::{Collaborators, Transaction};
use ferroq_delivery::{DeliveryError, HandleStatus, QueueBinding, QueueConsumer, RoutingType};
use mockbroker::{
    CountingPlugin, Fixture, InMemoryStorage, PropertyFilter, RecordingCallback, RecordingManagement,
    SentPacket, TestMessage, TestQueue, TestSession, TestTransaction, ThreadExecutor, TxOutcome,
};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Dispatch decisions
// =============================================================================

#[test]
fn dispatch_is_busy_without_protocol_credits() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);
    fixture.callback.set_has_credits(false);

    let reference = fixture.reference(1, 10);
    assert_eq!(
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed"),
        HandleStatus::Busy
    );
}

#[test]
fn dispatch_is_busy_when_not_writable() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);
    fixture.callback.set_writable(false);

    let reference = fixture.reference(1, 10);
    assert_eq!(
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed"),
        HandleStatus::Busy
    );
}

#[test]
fn dispatch_is_busy_when_stopped_or_transferring() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);
    let reference = fixture.reference(1, 10);

    consumer.stop();
    assert_eq!(
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed"),
        HandleStatus::Busy
    );

    consumer.start();
    consumer.set_transferring(true);
    assert_eq!(
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed"),
        HandleStatus::Busy
    );

    consumer.set_transferring(false);
    assert_eq!(
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed"),
        HandleStatus::Handled
    );
}

#[test]
fn plugin_veto_is_no_match() {
    let fixture = Fixture::new();
    let plugin = CountingPlugin::new();
    let consumer = fixture.consumer_with(
        fixture.config(1),
        None,
        true,
        vec![Arc::clone(&plugin) as _],
    );
    consumer.receive_credits(-1);
    plugin.set_accepting(false);

    let reference = fixture.reference(1, 10);
    assert_eq!(
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed"),
        HandleStatus::NoMatch
    );
    assert_eq!(plugin.can_accept_calls(), 1);
    assert_eq!(plugin.before_deliver_calls(), 0);
}

#[test]
fn filter_mismatch_is_no_match() {
    let fixture = Fixture::new();
    let filter = PropertyFilter::new("region", "eu");
    let consumer = fixture.consumer_with(fixture.config(1), Some(filter as _), true, Vec::new());
    consumer.receive_credits(-1);

    let miss = fixture.reference_for(1, TestMessage::new(10).with_property("region", "us"));
    assert_eq!(
        consumer.handle(Arc::clone(&miss) as _).expect("dispatch failed"),
        HandleStatus::NoMatch
    );

    let hit = fixture.reference_for(2, TestMessage::new(10).with_property("region", "eu"));
    assert_eq!(
        consumer.handle(Arc::clone(&hit) as _).expect("dispatch failed"),
        HandleStatus::Handled
    );
}

#[test]
fn message_refusal_is_no_match() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let refused = fixture.reference_for(
        1,
        TestMessage::new(10).refusing_consumer(consumer.sequential_id()),
    );
    assert_eq!(
        consumer.handle(Arc::clone(&refused) as _).expect("dispatch failed"),
        HandleStatus::NoMatch
    );
}

#[test]
fn accept_records_the_dispatch_on_the_reference() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(4));
    consumer.receive_credits(-1);

    let reference = fixture.reference(1, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    assert!(reference.was_handled());
    assert_eq!(reference.recorded_consumer(), Some(4));
    assert_eq!(reference.current_delivery_count(), 1);
}

#[test]
fn strict_mode_persists_delivery_counts_for_durable_refs() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_strict_update_delivery_count(true));
    consumer.receive_credits(-1);

    let durable = fixture.reference_for(1, TestMessage::new(10).durable(true));
    consumer.handle(Arc::clone(&durable) as _).expect("dispatch failed");
    assert_eq!(fixture.storage.persisted_delivery_counts(), vec![1]);

    // Paged references skip persistence
    let paged = fixture.reference_for(2, TestMessage::new(10).durable(true));
    paged.set_paged(true);
    consumer.handle(Arc::clone(&paged) as _).expect("dispatch failed");
    assert_eq!(fixture.storage.persisted_delivery_counts(), vec![1]);

    // Non-durable messages skip persistence
    let transient = fixture.reference(3, 10);
    consumer.handle(Arc::clone(&transient) as _).expect("dispatch failed");
    assert_eq!(fixture.storage.persisted_delivery_counts(), vec![1]);
}

#[test]
fn pre_ack_skips_the_ledger() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_pre_acknowledge(true));
    consumer.receive_credits(-1);

    let reference = fixture.reference(6, 10);
    let status = consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    assert_eq!(status, HandleStatus::Handled);

    assert!(consumer.delivering_messages().is_empty());
    assert_eq!(consumer.acks(), 1);
    assert_eq!(fixture.queue.acknowledged_refs(), vec![(6, 1)]);

    // Delivery still goes out
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");
    assert_eq!(fixture.callback.sent_count(), 1);
}

// =============================================================================
// Acknowledge / cancel / reject
// =============================================================================

#[test]
fn acknowledge_up_to_acks_in_order() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    for id in 1..=3 {
        let reference = fixture.reference(id, 10);
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
        consumer
            .proceed_deliver(Arc::clone(&reference) as _)
            .expect("delivery failed");
    }

    let acked = consumer.acknowledge(None, 2).expect("acknowledge failed");
    assert_eq!(acked, vec![1, 2]);
    assert_eq!(consumer.delivering_messages(), vec![3]);
    assert_eq!(consumer.acks(), 2);
}

#[test]
fn acknowledge_past_the_ledger_marks_rollback_only() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let reference = fixture.reference(1, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    let mut tx = TestTransaction::new(Arc::clone(&fixture.session.tx_log));
    let error = consumer
        .acknowledge(Some(&mut tx), 99)
        .expect_err("acknowledge should fail past the ledger");
    assert!(matches!(error, DeliveryError::NoReference { message_id: 99, .. }));
    assert!(tx.is_rollback_only());
    // The ref polled before the failure is already enlisted
    assert_eq!(tx.enlisted_acks(), &[1]);
}

#[test]
fn self_opened_transaction_rolls_back_on_failure() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let error = consumer
        .acknowledge(None, 42)
        .expect_err("acknowledge of an empty ledger should fail");
    assert!(matches!(error, DeliveryError::NoReference { .. }));

    let records = fixture.session.tx_log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TxOutcome::RolledBack);
}

#[test]
fn individual_acknowledge_takes_exactly_one() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    for id in 1..=3 {
        let reference = fixture.reference(id, 10);
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
        consumer
            .proceed_deliver(Arc::clone(&reference) as _)
            .expect("delivery failed");
    }

    consumer
        .individual_acknowledge(None, 2)
        .expect("individual acknowledge failed");
    assert_eq!(consumer.delivering_messages(), vec![1, 3]);
    assert_eq!(consumer.acks(), 1);

    let mut tx = TestTransaction::new(Arc::clone(&fixture.session.tx_log));
    let error = consumer
        .individual_acknowledge(Some(&mut tx), 42)
        .expect_err("acknowledge of an absent ref should fail");
    assert!(matches!(error, DeliveryError::NoReference { message_id: 42, .. }));
    assert!(tx.is_rollback_only());
}

#[test]
fn individual_cancel_of_absent_ref_is_an_error() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    let error = consumer
        .individual_cancel(9, false)
        .expect_err("cancel of an absent ref should fail");
    assert!(matches!(error, DeliveryError::IllegalState(_)));
}

#[test]
fn failed_cancel_keeps_the_delivery_count() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let reference = fixture.reference(5, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");
    assert_eq!(reference.current_delivery_count(), 1);

    consumer.individual_cancel(5, true).expect("cancel failed");
    // Failed redelivery: the attempt stays counted
    assert_eq!(reference.current_delivery_count(), 1);
}

#[test]
fn callback_can_own_the_cancel_delivery_count() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);
    fixture.callback.own_delivery_count_updates(true);

    let reference = fixture.reference(5, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    consumer.individual_cancel(5, false).expect("cancel failed");
    // The callback claimed the adjustment, so the engine left the count alone
    assert_eq!(reference.current_delivery_count(), 1);
}

#[test]
fn reject_is_idempotent() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let reference = fixture.reference(8, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    consumer.reject(8).expect("reject failed");
    assert_eq!(fixture.queue.dead_lettered_refs(), vec![8]);

    // Double-reject and reject of a never-seen id both succeed silently
    consumer.reject(8).expect("double reject should succeed");
    consumer.reject(99).expect("reject of unknown ref should succeed");
    assert_eq!(fixture.queue.dead_lettered_refs(), vec![8]);
}

#[test]
fn browse_only_consumers_cannot_ack_cancel_or_reject() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_browse_only(true));

    assert!(matches!(
        consumer.acknowledge(None, 1),
        Err(DeliveryError::IllegalState(_))
    ));
    assert!(matches!(
        consumer.individual_acknowledge(None, 1),
        Err(DeliveryError::IllegalState(_))
    ));
    assert!(matches!(
        consumer.individual_cancel(1, false),
        Err(DeliveryError::IllegalState(_))
    ));
    assert!(matches!(consumer.reject(1), Err(DeliveryError::IllegalState(_))));
}

#[test]
fn scan_collects_and_optionally_excises() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    for id in 1..=5 {
        let reference = fixture.reference(id, 10);
        consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
        consumer
            .proceed_deliver(Arc::clone(&reference) as _)
            .expect("delivery failed");
    }

    let window =
        consumer.scan_delivering_references(|r| r.message_id() == 2, |r| r.message_id() == 4, false);
    assert_eq!(window.iter().map(|r| r.message_id()).collect::<Vec<_>>(), vec![2, 3, 4]);
    assert_eq!(consumer.delivering_messages(), vec![1, 2, 3, 4, 5]);

    let window =
        consumer.scan_delivering_references(|r| r.message_id() == 2, |r| r.message_id() == 4, true);
    assert_eq!(window.len(), 3);
    assert_eq!(consumer.delivering_messages(), vec![1, 5]);
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn transport_failure_still_runs_after_delivery() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let reference = fixture.reference(1, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    fixture.callback.fail_next_send();

    let error = consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect_err("send should fail");
    assert!(error.is_transport());
    assert_eq!(fixture.callback.after_delivery_count(), 1);

    // The latch was still decremented: stop returns without a flush timeout
    let before = std::time::Instant::now();
    consumer.stop();
    assert!(before.elapsed() < Duration::from_millis(100));
}

#[test]
fn header_send_failure_clears_the_streamer() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_min_large_message_size(64));
    consumer.receive_credits(-1);

    let reference = fixture.reference_for(3, TestMessage::new(0).large_with_body(vec![1; 256]));
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    assert_eq!(reference.message_double().usage_count(), 1);

    fixture.callback.fail_next_send();
    let error = consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect_err("header send should fail");
    assert!(error.is_transport());

    // Streamer resources released; the consumer accepts new work
    assert_eq!(reference.message_double().usage_count(), 0);
    let next = fixture.reference(4, 10);
    assert_eq!(
        consumer.handle(Arc::clone(&next) as _).expect("dispatch failed"),
        HandleStatus::Handled
    );
}

#[test]
fn chunk_failure_reports_to_the_queue() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_min_large_message_size(64));
    consumer.receive_credits(-1);

    let reference = fixture.reference_for(3, TestMessage::new(0).large_with_body(vec![1; 256]));
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("header should send");

    // First continuation fails on the executor
    fixture.callback.fail_next_send();
    assert!(fixture.executor.run_one());

    let errors = fixture.queue.reported_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 3);
    assert_eq!(reference.message_double().usage_count(), 0);
}

#[test]
fn body_open_failure_fails_the_delivery() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_min_large_message_size(64));
    consumer.receive_credits(-1);

    let message = TestMessage::new(0).large_with_body(vec![1; 128]);
    message.fail_body_open();
    let reference = fixture.reference_for(3, message);

    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    let error = consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect_err("body open should fail");
    assert!(matches!(error, DeliveryError::Streamer { .. }));
    assert_eq!(reference.message_double().usage_count(), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn stop_waits_for_pending_deliveries() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    // Accepted but never written: the flush deadline (100ms under test
    // config) must expire before stop returns
    let reference = fixture.reference(1, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");

    let before = std::time::Instant::now();
    consumer.stop();
    assert!(before.elapsed() >= Duration::from_millis(90));
    assert!(!consumer.is_started());
}

#[test]
fn browse_only_consumers_never_stop() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_browse_only(true));
    consumer.stop();
    assert!(consumer.is_started());
}

#[test]
fn failed_close_disconnects_the_remote_endpoint() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.close(true);
    assert_eq!(fixture.callback.disconnected_queues(), vec!["orders.q1".to_string()]);
}

#[test]
fn close_registers_a_lingerer_when_transactions_hold_refs() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(7));
    fixture.session.set_has_transacted_refs(true);
    consumer.close(false);
    assert_eq!(fixture.session.lingerers(), vec![7]);
}

#[test]
fn close_without_reference_callbacks_cancels_directly() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);
    fixture.queue.set_allows_reference_callback(false);

    let reference = fixture.reference(4, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    consumer.close(false);
    assert!(fixture.queue.tx_cancelled_refs().is_empty());
    let cancelled = fixture.queue.cancelled_refs();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].0, 4);
}

#[test]
fn close_finishes_an_active_streamer() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1).with_min_large_message_size(64));
    consumer.receive_credits(-1);

    let reference = fixture.reference_for(3, TestMessage::new(0).large_with_body(vec![1; 256]));
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("header should send");
    assert_eq!(reference.message_double().usage_count(), 1);

    consumer.close(false);
    assert_eq!(reference.message_double().usage_count(), 0);
}

#[test]
fn close_runs_plugin_hooks_in_order() {
    let fixture = Fixture::new();
    let plugin = CountingPlugin::new();
    let consumer = fixture.consumer_with(
        fixture.config(1),
        None,
        true,
        vec![Arc::clone(&plugin) as _],
    );
    consumer.close(false);
    consumer.close(false);
    assert_eq!(plugin.before_close_calls(), 1);
    assert_eq!(plugin.after_close_calls(), 1);
}

#[test]
fn close_notification_carries_the_binding_and_session() {
    let fixture = Fixture::new();
    let filter = PropertyFilter::new("region", "eu");
    let consumer = fixture.consumer_with(fixture.config(1), Some(filter as _), true, Vec::new());
    consumer.close(false);

    let notifications = fixture.management.notifications();
    assert_eq!(notifications.len(), 1);
    let notification = &notifications[0];
    assert_eq!(notification.address, "orders");
    assert_eq!(notification.routing_name, "orders.q1");
    assert_eq!(notification.cluster_name, "orders.q1");
    assert_eq!(notification.filter.as_deref(), Some("region = 'eu'"));
    assert_eq!(notification.distance, 0);
    assert_eq!(notification.user.as_deref(), Some("admin"));
    assert_eq!(notification.remote_address, "10.0.0.9:52114");
    assert_eq!(notification.session_name, "session-a1");
}

// =============================================================================
// Legacy-prefix rewriting
// =============================================================================

#[test]
fn old_jms_clients_get_prefixed_addresses() {
    let fixture = Fixture::new();
    fixture.session.set_channel_version(128);
    fixture.session.set_metadata("jms-session", "true");

    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let reference = fixture.reference(1, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    match &fixture.callback.sent()[0] {
        SentPacket::Message { address, .. } => assert_eq!(address, "jms.queue.orders"),
        other => panic!("expected a message packet, got {other:?}"),
    }
}

#[test]
fn multicast_bindings_use_the_topic_prefix() {
    let fixture = Fixture::new();
    fixture.session.set_channel_version(128);
    fixture.session.set_metadata("jms-session", "true");

    let consumer = QueueConsumer::new(
        fixture.config(1),
        QueueBinding::local("prices", "prices.sub1", RoutingType::Multicast),
        None,
        true,
        fixture.collaborators(),
    )
    .expect("consumer construction failed");
    consumer.receive_credits(-1);

    let reference = fixture.reference_for(1, TestMessage::new(10).at_address("prices"));
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    match &fixture.callback.sent()[0] {
        SentPacket::Message { address, .. } => assert_eq!(address, "jms.topic.prices"),
        other => panic!("expected a message packet, got {other:?}"),
    }
}

#[test]
fn current_clients_get_unprefixed_addresses() {
    let fixture = Fixture::new();
    // Current channel version, JMS metadata present: no rewrite
    fixture.session.set_metadata("jms-session", "true");

    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let reference = fixture.reference(1, 10);
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("delivery failed");

    match &fixture.callback.sent()[0] {
        SentPacket::Message { address, .. } => assert_eq!(address, "orders"),
        other => panic!("expected a message packet, got {other:?}"),
    }
}

// =============================================================================
// Concurrency smoke
// =============================================================================

#[test]
fn large_message_streams_on_a_real_executor() {
    let executor = Arc::new(ThreadExecutor::new());
    let queue = TestQueue::new("orders.q1", Arc::clone(&executor) as _);
    let session = TestSession::new("session-a1");
    let callback = RecordingCallback::new();

    let consumer = QueueConsumer::new(
        ferroq_delivery::ConsumerConfig::new(1).with_min_large_message_size(512),
        QueueBinding::local("orders", "orders.q1", RoutingType::Anycast),
        None,
        true,
        Collaborators {
            queue: Arc::clone(&queue) as _,
            session: Arc::clone(&session) as _,
            callback: Arc::clone(&callback) as _,
            storage: InMemoryStorage::new() as _,
            management: RecordingManagement::new() as _,
            plugins: Vec::new(),
        },
    )
    .expect("consumer construction failed");
    consumer.receive_credits(-1);

    let reference = mockbroker::TestReference::new(
        3,
        Arc::new(TestMessage::new(0).large_with_body(vec![7; 2000])),
        Arc::clone(&queue),
    );
    consumer.handle(Arc::clone(&reference) as _).expect("dispatch failed");
    consumer
        .proceed_deliver(Arc::clone(&reference) as _)
        .expect("header should send");

    // 2000 bytes in 512-byte chunks: header + 4 continuations, driven by the
    // executor thread
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while callback.sent_count() < 5 || reference.message_double().usage_count() != 0 {
        assert!(std::time::Instant::now() < deadline, "streaming never completed");
        std::thread::sleep(Duration::from_millis(2));
    }
    match callback.sent().last() {
        Some(SentPacket::Continuation { has_more, body_len, .. }) => {
            assert!(!has_more);
            assert_eq!(*body_len, 2000 % 512);
        }
        other => panic!("expected a final continuation, got {other:?}"),
    }
}

#[test]
fn concurrent_dispatch_and_ack_keep_the_ledger_consistent() {
    let fixture = Fixture::new();
    let consumer = fixture.consumer(fixture.config(1));
    consumer.receive_credits(-1);

    let threads = 4;
    let per_thread = 50;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let consumer = Arc::clone(&consumer);
            let fixture_queue = Arc::clone(&fixture.queue);
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    let id = (t * per_thread + i + 1) as u64;
                    let reference = mockbroker::TestReference::new(
                        id,
                        Arc::new(TestMessage::new(8)),
                        Arc::clone(&fixture_queue),
                    );
                    let status = consumer
                        .handle(Arc::clone(&reference) as _)
                        .expect("dispatch failed");
                    assert_eq!(status, HandleStatus::Handled);
                    consumer
                        .proceed_deliver(Arc::clone(&reference) as _)
                        .expect("delivery failed");
                    consumer
                        .individual_acknowledge(None, id)
                        .expect("acknowledge failed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert!(consumer.delivering_messages().is_empty());
    assert_eq!(consumer.acks(), (threads * per_thread) as u64);
    assert_eq!(fixture.queue.acknowledged_refs().len(), threads * per_thread);
}
