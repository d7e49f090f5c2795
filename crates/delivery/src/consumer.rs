//! The per-consumer delivery controller.
//!
//! `QueueConsumer` sits between a server-side queue and one remote endpoint.
//! The queue's delivery loop pushes references in through [`handle`]; the
//! wire callback reports writability and credit asynchronously; the owning
//! session issues acknowledge, cancel, stop/start, transfer, and close
//! concurrently. All three surfaces meet at the same in-flight state, which
//! a single consumer lock guards: the ledger, the started/transferring
//! flags, and the active large-message streamer. Credit mutations stay
//! lock-free so the hot dispatch path can bail without contending the lock.
//!
//! Wire packets leave in ledger-append order: every send goes through either
//! [`proceed_deliver`] (serialised per consumer by the queue's dispatcher)
//! or the queue's single-threaded executor, and forced-delivery probes are
//! enqueued on that same executor so they interleave correctly.
//!
//! [`handle`]: QueueConsumer::handle
//! [`proceed_deliver`]: QueueConsumer::proceed_deliver

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, trace, warn};

use crate::browser::BrowserDeliverer;
use crate::config::{ConsumerConfig, ConsumerId, MessageId, QueueBinding};
use crate::credit::CreditMeter;
use crate::error::DeliveryError;
use crate::forced;
use crate::invariants::debug_assert_streamer_absent;
use crate::latch::CountLatch;
use crate::ledger::InFlightLedger;
use crate::legacy;
use crate::metrics::ConsumerMetrics;
use crate::notification::ConsumerClosedNotification;
use crate::spi::{
    Collaborators, ConsumerPlugin, Executor, Filter, ManagementService, Message, MessageReference,
    Queue, Session, SessionCallback, StorageManager, Transaction,
};
use crate::streamer::{LargeMessageStreamer, StreamStep};

/// Outcome of offering a reference to the dispatch machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Accepted; the queue must follow up with `proceed_deliver`.
    Handled,
    /// Temporarily unable to take the reference; re-offer on the next prompt.
    Busy,
    /// The reference does not match this consumer; offer it elsewhere.
    NoMatch,
}

/// State guarded by the consumer lock.
struct DeliveryState {
    started: bool,
    transferring: bool,
    ledger: InFlightLedger,
    streamer: Option<LargeMessageStreamer>,
}

/// The per-consumer delivery engine.
pub struct QueueConsumer {
    /// Back-reference for the tasks the consumer schedules on the queue
    /// executor (large-message resumption, browse runs, forced probes).
    self_ref: Weak<QueueConsumer>,
    id: ConsumerId,
    sequential_id: u64,
    config: ConsumerConfig,
    /// Normalised: browse-only consumers have nothing to acknowledge.
    pre_acknowledge: bool,
    binding: QueueBinding,
    filter: Option<Arc<dyn Filter>>,
    queue: Arc<dyn Queue>,
    queue_name: String,
    session: Arc<dyn Session>,
    callback: Arc<dyn SessionCallback>,
    storage: Arc<dyn StorageManager>,
    management: Arc<dyn ManagementService>,
    plugins: Vec<Arc<dyn ConsumerPlugin>>,
    /// The queue's executor; resumption scheduler for streaming and probes.
    executor: Arc<dyn Executor>,
    credits: CreditMeter,
    state: Mutex<DeliveryState>,
    /// Counts dispatches accepted but not yet written to the wire.
    pending: CountLatch,
    closed: AtomicBool,
    metrics: ConsumerMetrics,
    legacy_prefix: Option<&'static str>,
    browser: Option<Mutex<BrowserDeliverer>>,
}

impl QueueConsumer {
    /// Creates a consumer and attaches it to its queue.
    ///
    /// Browse-only consumers open a cursor instead of attaching to the
    /// queue's dispatcher, and are always started.
    pub fn new(
        config: ConsumerConfig,
        binding: QueueBinding,
        filter: Option<Arc<dyn Filter>>,
        started: bool,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, DeliveryError> {
        let Collaborators {
            queue,
            session,
            callback,
            storage,
            management,
            plugins,
        } = collaborators;

        let sequential_id = storage.generate_id();
        let legacy_prefix = legacy::legacy_prefix_for(session.as_ref(), &binding);
        let browse_only = config.browse_only;
        let pre_acknowledge = config.pre_acknowledge && !browse_only;
        let browser = if browse_only {
            Some(Mutex::new(BrowserDeliverer::new(queue.browser_iterator())))
        } else {
            None
        };
        let queue_name = queue.name();
        let executor = queue.executor();

        let consumer = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            id: config.id,
            sequential_id,
            pre_acknowledge,
            binding,
            filter,
            queue,
            queue_name,
            session,
            callback,
            storage,
            management,
            plugins,
            executor,
            credits: CreditMeter::bounded(),
            state: Mutex::new(DeliveryState {
                started: browse_only || started,
                transferring: false,
                ledger: InFlightLedger::new(),
                streamer: None,
            }),
            pending: CountLatch::new(),
            closed: AtomicBool::new(false),
            metrics: ConsumerMetrics::new(),
            legacy_prefix,
            browser,
            config,
        });

        if !browse_only {
            consumer.queue.add_consumer(Arc::clone(&consumer))?;
        }
        debug!(
            consumer_id = consumer.id,
            sequential_id,
            queue = %consumer.queue_name,
            browse_only,
            "consumer created"
        );
        Ok(consumer)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Offers a reference to the consumer.
    ///
    /// Invoked by the queue's delivery loop, potentially from any queue
    /// worker. Credit and writability short-circuit before the lock; the
    /// lock makes the started/transferring read atomic with the ledger
    /// append and the one-streamer-at-a-time check.
    pub fn handle(&self, reference: Arc<dyn MessageReference>) -> Result<HandleStatus, DeliveryError> {
        if !self.credits.try_reserve() {
            trace!(consumer_id = self.id, "no byte credit, reporting busy");
            return Ok(HandleStatus::Busy);
        }
        if !self.callback.has_credits(self, &reference) {
            return Ok(HandleStatus::Busy);
        }
        for plugin in &self.plugins {
            if !plugin.can_accept(self, &reference) {
                return Ok(HandleStatus::NoMatch);
            }
        }

        let mut state = self.state();
        if !self.callback.is_writable(self) || !state.started || state.transferring {
            return Ok(HandleStatus::Busy);
        }
        if state.streamer.is_some() {
            // One large message streams at a time
            return Ok(HandleStatus::Busy);
        }

        let message = reference.message();
        if !message.accepts_consumer(self.sequential_id) {
            return Ok(HandleStatus::NoMatch);
        }
        if let Some(filter) = &self.filter {
            if !filter.matches(message.as_ref()) {
                return Ok(HandleStatus::NoMatch);
            }
        }

        if !self.config.browse_only {
            if self.pre_acknowledge {
                // The server is authoritative: acknowledge at dispatch time,
                // the ledger stays empty.
                reference.queue().acknowledge(Arc::clone(&reference), self.id)?;
                self.metrics.record_ack();
            } else {
                state.ledger.append(Arc::clone(&reference));
                reference.handled();
                reference.set_consumer_id(self.id);
                reference.increment_delivery_count();
                if self.config.strict_update_delivery_count
                    && message.is_durable()
                    && self.queue.is_durable()
                    && !self.queue.is_internal()
                    && !reference.is_paged()
                {
                    self.storage.update_delivery_count(&reference)?;
                }
            }
        }

        if message.is_large() && self.config.supports_large_message {
            debug_assert_streamer_absent!(state.streamer);
            let message = self.rewrite_for_legacy_client(message);
            state.streamer = Some(LargeMessageStreamer::new(Arc::clone(&reference), message));
        }

        self.pending.count_up();
        Ok(HandleStatus::Handled)
    }

    /// Writes an accepted reference to the wire, or starts streaming it.
    ///
    /// The pending-delivery latch is decremented and `after_delivery` runs
    /// whether or not the send succeeded; a transport error means the
    /// delivery did not complete, nothing more.
    pub fn proceed_deliver(&self, reference: Arc<dyn MessageReference>) -> Result<(), DeliveryError> {
        for plugin in &self.plugins {
            plugin.before_deliver(self, &reference);
        }
        let result = self.deliver_reference(&reference);
        self.pending.count_down();
        self.callback.after_delivery();
        if result.is_ok() {
            for plugin in &self.plugins {
                plugin.after_deliver(self, &reference);
            }
        }
        result
    }

    fn deliver_reference(&self, reference: &Arc<dyn MessageReference>) -> Result<(), DeliveryError> {
        let message = reference.message();
        if message.is_large() && self.config.supports_large_message {
            let step = {
                let mut state = self.state();
                let streaming_this = state
                    .streamer
                    .as_ref()
                    .is_some_and(|s| s.reference().message_id() == reference.message_id());
                if !streaming_this {
                    // The streamer is installed under the lock when the
                    // reference is accepted; its absence here is a logic
                    // error, not something to paper over by rebuilding it.
                    return Err(DeliveryError::IllegalState(format!(
                        "no active streamer for large message {}",
                        reference.message_id()
                    )));
                }
                self.drive_streamer_locked(&mut state)?
            };
            self.follow_up_stream_step(step);
            Ok(())
        } else {
            let message = self.rewrite_for_legacy_client(message);
            let size = self
                .callback
                .send_message(reference, &message, self, reference.delivery_count())?;
            self.credits.consume(size);
            Ok(())
        }
    }

    /// Runs one streamer step under the lock, clearing the streamer on
    /// completion or failure.
    fn drive_streamer_locked(&self, state: &mut DeliveryState) -> Result<StreamStep, DeliveryError> {
        let started = state.started;
        let Some(streamer) = state.streamer.as_mut() else {
            return Ok(StreamStep::Blocked);
        };
        match streamer.deliver(self, started) {
            Ok(StreamStep::Finished) => {
                state.streamer = None;
                Ok(StreamStep::Finished)
            }
            Ok(step) => Ok(step),
            Err(delivery_error) => {
                streamer.finish();
                state.streamer = None;
                Err(delivery_error)
            }
        }
    }

    /// Acts on a streamer step with the lock released.
    fn follow_up_stream_step(&self, step: StreamStep) {
        match step {
            StreamStep::SentHeader | StreamStep::SentChunk => self.schedule_large_message_resume(),
            StreamStep::Finished => self.prompt_delivery(),
            StreamStep::Blocked => {}
        }
    }

    fn schedule_large_message_resume(&self) {
        let Some(consumer) = self.self_ref.upgrade() else {
            return;
        };
        // The scheduled step counts as a pending delivery so stop/close
        // flushes wait for it
        self.pending.count_up();
        self.executor
            .execute(Box::new(move || consumer.resume_large_message()));
    }

    /// Executor task: advances the active streamer by one step.
    fn resume_large_message(&self) {
        self.resume_large_message_step();
        self.pending.count_down();
    }

    fn resume_large_message_step(&self) {
        if self.is_closed() {
            return;
        }
        let outcome = {
            let mut state = self.state();
            if state.streamer.is_none() {
                return;
            }
            let reference = state.streamer.as_ref().map(|s| Arc::clone(s.reference()));
            (self.drive_streamer_locked(&mut state), reference)
        };
        match outcome {
            (Ok(step), _) => self.follow_up_stream_step(step),
            (Err(delivery_error), reference) => {
                error!(
                    consumer_id = self.id,
                    queue = %self.queue_name,
                    error = %delivery_error,
                    "large-message streaming failed; abandoning the delivery"
                );
                if let Some(reference) = reference {
                    self.queue.error_processing(reference, &delivery_error);
                }
            }
        }
    }

    /// Asks the delivery sources to resume pushing: the streamer if one is
    /// active, otherwise the browse cursor or the queue's delivery loop.
    pub fn prompt_delivery(&self) {
        if self.is_closed() {
            return;
        }
        let streaming = self.state().streamer.is_some();
        if streaming {
            self.schedule_large_message_resume();
        } else if self.config.browse_only {
            if let Some(consumer) = self.self_ref.upgrade() {
                self.executor.execute(Box::new(move || consumer.run_browser()));
            }
        } else {
            self.queue.deliver_async();
        }
    }

    // =========================================================================
    // Browse traversal
    // =========================================================================

    /// Executor task: drains the browse cursor through the dispatch machine.
    fn run_browser(&self) {
        if self.is_closed() {
            return;
        }
        let Some(browser) = &self.browser else {
            return;
        };
        let mut browser = browser.lock().unwrap_or_else(PoisonError::into_inner);

        // Retry the reference the previous run was busy on
        if let Some(reference) = browser.take_current() {
            match self.offer_browsed(&reference) {
                BrowseOutcome::Delivered | BrowseOutcome::Skipped => {}
                BrowseOutcome::Busy => {
                    browser.retain(reference);
                    return;
                }
                BrowseOutcome::Failed => return,
            }
        }

        loop {
            let Some(reference) = browser.next_reference() else {
                if browser.mark_finished() {
                    drop(browser);
                    self.callback.browser_finished(self);
                }
                return;
            };
            match self.offer_browsed(&reference) {
                BrowseOutcome::Delivered | BrowseOutcome::Skipped => {}
                BrowseOutcome::Busy => {
                    browser.retain(reference);
                    return;
                }
                BrowseOutcome::Failed => return,
            }
        }
    }

    fn offer_browsed(&self, reference: &Arc<dyn MessageReference>) -> BrowseOutcome {
        match self.handle(Arc::clone(reference)) {
            Ok(HandleStatus::Handled) => match self.proceed_deliver(Arc::clone(reference)) {
                Ok(()) => BrowseOutcome::Delivered,
                Err(delivery_error) => {
                    error!(
                        consumer_id = self.id,
                        queue = %self.queue_name,
                        error = %delivery_error,
                        "browse delivery failed"
                    );
                    BrowseOutcome::Failed
                }
            },
            Ok(HandleStatus::Busy) => BrowseOutcome::Busy,
            Ok(HandleStatus::NoMatch) => BrowseOutcome::Skipped,
            Err(delivery_error) => {
                error!(
                    consumer_id = self.id,
                    queue = %self.queue_name,
                    error = %delivery_error,
                    "browse dispatch failed"
                );
                BrowseOutcome::Failed
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts delivery and prompts the queue.
    pub fn start(&self) {
        if self.is_closed() {
            return;
        }
        self.set_started(true);
        debug!(consumer_id = self.id, queue = %self.queue_name, "consumer started");
        self.prompt_delivery();
    }

    /// Stops delivery: waits for in-flight sends to drain, then stops taking
    /// references.
    pub fn stop(&self) {
        if self.is_closed() {
            return;
        }
        self.stop_internal();
    }

    fn stop_internal(&self) {
        self.flush_delivery();
        self.set_started(false);
        debug!(consumer_id = self.id, queue = %self.queue_name, "consumer stopped");
    }

    fn set_started(&self, started: bool) {
        // Browse-only consumers have no Stopped state
        self.state().started = self.config.browse_only || started;
    }

    /// Waits for every accepted dispatch to reach the wire (or fail).
    fn flush_delivery(&self) {
        if !self.pending.await_zero(self.config.flush_timeout) {
            warn!(
                consumer_id = self.id,
                queue = %self.queue_name,
                pending = self.pending.count(),
                timeout_ms = self.config.flush_timeout.as_millis() as u64,
                "timed out waiting for in-flight deliveries to flush"
            );
        }
    }

    /// Enters or leaves the transferring state.
    ///
    /// On entry, a barrier task on the queue executor drains any
    /// forced-delivery probe already scheduled there; running the barrier on
    /// that executor rather than joining threads is what avoids the historic
    /// cross-executor deadlock. On exit, delivery is prompted.
    pub fn set_transferring(&self, transferring: bool) {
        if self.is_closed() {
            return;
        }
        self.state().transferring = transferring;
        debug!(consumer_id = self.id, queue = %self.queue_name, transferring, "transfer state changed");

        if transferring {
            let barrier = Arc::new(CountLatch::new());
            barrier.count_up();
            let passed = Arc::clone(&barrier);
            self.executor.execute(Box::new(move || passed.count_down()));
            if !barrier.await_zero(self.config.transfer_barrier_timeout) {
                warn!(
                    consumer_id = self.id,
                    queue = %self.queue_name,
                    "timed out on the queue-executor barrier while entering transfer"
                );
            }
        } else {
            self.prompt_delivery();
        }
    }

    /// Closes the consumer. Idempotent; every step is best-effort so close
    /// always completes.
    pub fn close(&self, failed: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(consumer_id = self.id, queue = %self.queue_name, failed, "closing consumer");

        for plugin in &self.plugins {
            plugin.before_close_consumer(self, failed);
        }

        self.stop_internal();

        {
            let mut state = self.state();
            if let Some(mut streamer) = state.streamer.take() {
                streamer.finish();
            }
        }

        if let Some(browser) = &self.browser {
            browser.lock().unwrap_or_else(PoisonError::into_inner).close();
        } else {
            self.queue.remove_consumer(self.id);
        }

        let remaining = self.state().ledger.drain_all();
        if !remaining.is_empty() {
            self.cancel_remaining(remaining);
        }

        if self.session.has_transacted_refs(self.id) {
            self.session.register_lingerer(self.id);
        }

        // Notification before the ref-count recheck: cluster peers must see
        // the closure before a possible auto-delete removes the queue.
        self.management.consumer_closed(self.close_notification());
        self.queue.recheck_ref_count();

        if failed {
            self.callback.disconnect(self, &self.queue_name);
        }

        for plugin in &self.plugins {
            plugin.after_close_consumer(self, failed);
        }
    }

    /// Returns undrained in-flight references to the queue.
    fn cancel_remaining(&self, remaining: Vec<Arc<dyn MessageReference>>) {
        if self.queue.allows_reference_callback() {
            // The transaction is a cancellation context, not a commit: the
            // cancel side effect runs during rollback.
            let mut tx = self.session.new_transaction();
            for reference in &remaining {
                if let Err(delivery_error) =
                    self.queue.cancel_in_tx(tx.as_mut(), Arc::clone(reference), true)
                {
                    error!(
                        consumer_id = self.id,
                        queue = %self.queue_name,
                        message_id = reference.message_id(),
                        error = %delivery_error,
                        "failed to cancel in-flight reference during close"
                    );
                }
            }
            if let Err(delivery_error) = tx.rollback() {
                error!(
                    consumer_id = self.id,
                    queue = %self.queue_name,
                    error = %delivery_error,
                    "failed to roll back the close cancellation context"
                );
            }
        } else {
            let timestamp = unix_millis();
            for reference in remaining {
                let message_id = reference.message_id();
                if let Err(delivery_error) = self.queue.cancel(reference, timestamp) {
                    error!(
                        consumer_id = self.id,
                        queue = %self.queue_name,
                        message_id,
                        error = %delivery_error,
                        "failed to cancel in-flight reference during close"
                    );
                }
            }
        }
    }

    fn close_notification(&self) -> ConsumerClosedNotification {
        ConsumerClosedNotification {
            address: self.binding.address.clone(),
            cluster_name: self.binding.cluster_name.clone(),
            routing_name: self.binding.routing_name.clone(),
            filter: self.filter.as_ref().map(|f| f.filter_string()),
            distance: self.binding.distance,
            consumer_count: self.queue.consumer_count(),
            user: self.session.username(),
            remote_address: self.session.remote_address(),
            session_name: self.session.name(),
        }
    }

    // =========================================================================
    // Acknowledge / cancel / reject
    // =========================================================================

    /// Acknowledges every in-flight reference up to and including
    /// `up_to_message_id`, in delivery order.
    ///
    /// With `tx` present the references enlist there and a failure marks it
    /// rollback-only. Without one, a fresh transaction is opened, committed
    /// on success and rolled back on failure. Returns the acknowledged ids.
    pub fn acknowledge(
        &self,
        tx: Option<&mut dyn Transaction>,
        up_to_message_id: MessageId,
    ) -> Result<Vec<MessageId>, DeliveryError> {
        self.forbid_browse("acknowledge")?;
        match tx {
            Some(tx) => match self.ack_through(tx, up_to_message_id) {
                Ok(ids) => Ok(ids),
                Err(delivery_error) => {
                    tx.mark_rollback_only(delivery_error.to_string());
                    Err(delivery_error)
                }
            },
            None => {
                let mut tx = self.session.new_transaction();
                match self.ack_through(tx.as_mut(), up_to_message_id) {
                    Ok(ids) => {
                        tx.commit()?;
                        Ok(ids)
                    }
                    Err(delivery_error) => {
                        if let Err(rollback_error) = tx.rollback() {
                            error!(
                                consumer_id = self.id,
                                queue = %self.queue_name,
                                error = %rollback_error,
                                "rollback failed after acknowledge error"
                            );
                        }
                        Err(delivery_error)
                    }
                }
            }
        }
    }

    fn ack_through(
        &self,
        tx: &mut dyn Transaction,
        up_to_message_id: MessageId,
    ) -> Result<Vec<MessageId>, DeliveryError> {
        let mut acked = Vec::new();
        loop {
            let Some(reference) = self.state().ledger.poll() else {
                return Err(DeliveryError::NoReference {
                    consumer_id: self.id,
                    message_id: up_to_message_id,
                    queue_name: self.queue_name.clone(),
                });
            };
            let message_id = reference.message_id();
            reference.acknowledge(Some(tx), self.id)?;
            self.metrics.record_ack();
            acked.push(message_id);
            if message_id == up_to_message_id {
                return Ok(acked);
            }
        }
    }

    /// Acknowledges exactly one in-flight reference by id.
    pub fn individual_acknowledge(
        &self,
        tx: Option<&mut dyn Transaction>,
        message_id: MessageId,
    ) -> Result<(), DeliveryError> {
        self.forbid_browse("acknowledge")?;
        match tx {
            Some(tx) => match self.ack_one(tx, message_id) {
                Ok(()) => Ok(()),
                Err(delivery_error) => {
                    tx.mark_rollback_only(delivery_error.to_string());
                    Err(delivery_error)
                }
            },
            None => {
                let mut tx = self.session.new_transaction();
                match self.ack_one(tx.as_mut(), message_id) {
                    Ok(()) => {
                        tx.commit()?;
                        Ok(())
                    }
                    Err(delivery_error) => {
                        if let Err(rollback_error) = tx.rollback() {
                            error!(
                                consumer_id = self.id,
                                queue = %self.queue_name,
                                error = %rollback_error,
                                "rollback failed after individual-acknowledge error"
                            );
                        }
                        Err(delivery_error)
                    }
                }
            }
        }
    }

    fn ack_one(&self, tx: &mut dyn Transaction, message_id: MessageId) -> Result<(), DeliveryError> {
        let Some(reference) = self.state().ledger.remove(message_id) else {
            return Err(DeliveryError::NoReference {
                consumer_id: self.id,
                message_id,
                queue_name: self.queue_name.clone(),
            });
        };
        reference.acknowledge(Some(tx), self.id)?;
        self.metrics.record_ack();
        Ok(())
    }

    /// Cancels one in-flight reference, returning it to the queue.
    ///
    /// A non-failure cancel reverts the delivery-count increment unless the
    /// wire callback takes responsibility for it. Unlike `reject`, a cancel
    /// of an absent reference is an error.
    pub fn individual_cancel(&self, message_id: MessageId, failed: bool) -> Result<(), DeliveryError> {
        self.forbid_browse("cancel")?;
        let Some(reference) = self.state().ledger.remove(message_id) else {
            return Err(DeliveryError::IllegalState(format!(
                "cannot cancel message {message_id}: not in delivery"
            )));
        };
        if !failed && !self.callback.update_delivery_count_after_cancel(self, &reference, failed) {
            reference.decrement_delivery_count();
        }
        self.queue.cancel(reference, unix_millis())
    }

    /// Routes one in-flight reference to the dead-letter sink.
    ///
    /// Silently succeeds when the reference is absent: MQTT clients
    /// retransmit rejects, and a double-reject must not error.
    pub fn reject(&self, message_id: MessageId) -> Result<(), DeliveryError> {
        self.forbid_browse("reject")?;
        let Some(reference) = self.state().ledger.remove(message_id) else {
            return Ok(());
        };
        self.queue.send_to_dead_letter_address(reference)
    }

    /// Re-inserts a reference at the head of the ledger, restoring delivery
    /// order after a protocol-level rollback.
    pub fn back_to_delivering(&self, reference: Arc<dyn MessageReference>) {
        self.state().ledger.push_front(reference);
    }

    /// Collects in-flight references in order from the first satisfying
    /// `start` through the first then satisfying `end` (inclusive),
    /// optionally excising them for protocol-level redelivery bookkeeping.
    pub fn scan_delivering_references<S, E>(
        &self,
        start: S,
        end: E,
        remove: bool,
    ) -> Vec<Arc<dyn MessageReference>>
    where
        S: Fn(&dyn MessageReference) -> bool,
        E: Fn(&dyn MessageReference) -> bool,
    {
        self.state().ledger.scan(start, end, remove)
    }

    fn forbid_browse(&self, operation: &str) -> Result<(), DeliveryError> {
        if self.config.browse_only {
            return Err(DeliveryError::IllegalState(format!(
                "browse-only consumer {} cannot {operation}",
                self.id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Flow control
    // =========================================================================

    /// Applies a client credit update.
    ///
    /// `-1` disables the meter entirely; `0` zeroes it (the slow-consumer
    /// throttle); a positive grant prompts delivery iff it makes the balance
    /// positive again.
    pub fn receive_credits(&self, credits: i32) {
        match credits {
            -1 => {
                self.credits.disable();
                self.prompt_delivery();
            }
            0 => self.credits.reset(),
            credits if credits > 0 => {
                if self.credits.grant(credits as usize) {
                    self.prompt_delivery();
                }
            }
            other => {
                warn!(consumer_id = self.id, credits = other, "ignoring invalid credit update");
            }
        }
    }

    // =========================================================================
    // Forced delivery
    // =========================================================================

    /// Emits a synthetic probe carrying `sequence`, scheduled on the queue
    /// executor so it is written after every delivery already in flight
    /// there. Errors are logged, never surfaced.
    pub fn force_delivery(&self, sequence: u64) {
        let Some(consumer) = self.self_ref.upgrade() else {
            return;
        };
        self.executor
            .execute(Box::new(move || consumer.run_forced_delivery(sequence)));
    }

    fn run_forced_delivery(&self, sequence: u64) {
        if self.is_closed() {
            return;
        }
        if self.state().transferring {
            // Re-enqueue until the transfer settles; the executor keeps the
            // probe ordered against real deliveries either way.
            debug!(consumer_id = self.id, sequence, "delaying forced delivery until transfer completes");
            self.force_delivery(sequence);
            return;
        }
        let (reference, message) = forced::forced_delivery_reference(
            self.storage.generate_id(),
            self.binding.address.clone(),
            Arc::clone(&self.queue),
            sequence,
        );
        // Probes are flow-control signalling; they bypass the credit meter
        if let Err(delivery_error) = self.callback.send_message(&reference, &message, self, 0) {
            error!(
                consumer_id = self.id,
                queue = %self.queue_name,
                sequence,
                error = %delivery_error,
                "failed to emit forced-delivery probe"
            );
        }
    }

    // =========================================================================
    // Observability & accessors
    // =========================================================================

    /// Consumer id, unique within the session.
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Storage-issued sequential id.
    pub fn sequential_id(&self) -> u64 {
        self.sequential_id
    }

    /// Consumer priority.
    pub fn priority(&self) -> u8 {
        self.config.priority
    }

    /// Whether this is a read-only browse cursor.
    pub fn is_browse_only(&self) -> bool {
        self.config.browse_only
    }

    /// Whether the consumer has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether delivery is currently started.
    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Whether the consumer is mid-transfer.
    pub fn is_transferring(&self) -> bool {
        self.state().transferring
    }

    /// Filter expression, if a filter is attached.
    pub fn filter_string(&self) -> Option<String> {
        self.filter.as_ref().map(|f| f.filter_string())
    }

    /// Monotonic count of acknowledged messages.
    pub fn acks(&self) -> u64 {
        self.metrics.acks()
    }

    /// Messages acknowledged per second since the last sample, two decimals,
    /// rounded up.
    pub fn message_rate(&self) -> f64 {
        self.metrics.message_rate()
    }

    /// Wall-clock creation time.
    pub fn created_at(&self) -> SystemTime {
        self.metrics.created_at()
    }

    /// Snapshot of in-flight message ids in delivery order.
    pub fn delivering_messages(&self) -> Vec<MessageId> {
        self.state().ledger.message_ids()
    }

    /// Remaining credit in bytes, or `None` when the meter is unlimited.
    pub fn credit_balance(&self) -> Option<i64> {
        self.credits.available()
    }

    /// Whether `handle` may run inline on the sending thread.
    pub fn supports_direct_delivery(&self) -> bool {
        self.callback.supports_direct_delivery()
    }

    pub(crate) fn credits(&self) -> &CreditMeter {
        &self.credits
    }

    pub(crate) fn callback(&self) -> &dyn SessionCallback {
        self.callback.as_ref()
    }

    pub(crate) fn min_large_message_size(&self) -> usize {
        self.config.min_large_message_size
    }

    fn rewrite_for_legacy_client(&self, message: Arc<dyn Message>) -> Arc<dyn Message> {
        match self.legacy_prefix {
            Some(prefix) => legacy::apply_prefix(message, prefix),
            None => message,
        }
    }

    fn state(&self) -> MutexGuard<'_, DeliveryState> {
        // Close must stay best-effort even if a collaborator panicked under
        // the lock, so poisoning is absorbed rather than propagated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("id", &self.id)
            .field("sequential_id", &self.sequential_id)
            .field("queue", &self.queue_name)
            .field("browse_only", &self.config.browse_only)
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum BrowseOutcome {
    Delivered,
    Skipped,
    Busy,
    Failed,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
