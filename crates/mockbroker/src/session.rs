//! Session and transaction doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferroq_delivery::spi::{Session, Transaction};
use ferroq_delivery::{ConsumerId, DeliveryError, MessageId, ADDRESSING_CHANGE_VERSION};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    RolledBack,
}

/// Everything one transaction saw before resolving.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub acks: Vec<MessageId>,
    pub cancels: Vec<(MessageId, bool)>,
    pub rollback_only: Option<String>,
    pub outcome: TxOutcome,
}

/// Shared log of resolved transactions.
#[derive(Debug, Default)]
pub struct TxLog {
    records: Mutex<Vec<TxRecord>>,
}

impl TxLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, record: TxRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Snapshot of resolved transactions, oldest first.
    pub fn records(&self) -> Vec<TxRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A transaction double; resolution pushes its record onto the shared log.
pub struct TestTransaction {
    log: Arc<TxLog>,
    acks: Vec<MessageId>,
    cancels: Vec<(MessageId, bool)>,
    rollback_only: Option<String>,
    fail_commit: bool,
}

impl TestTransaction {
    pub fn new(log: Arc<TxLog>) -> Self {
        Self {
            log,
            acks: Vec::new(),
            cancels: Vec::new(),
            rollback_only: None,
            fail_commit: false,
        }
    }

    /// Makes `commit` fail even without a rollback-only mark.
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn enlisted_acks(&self) -> &[MessageId] {
        &self.acks
    }

    pub fn rollback_only_reason(&self) -> Option<&str> {
        self.rollback_only.as_deref()
    }

    fn record(&mut self, outcome: TxOutcome) -> TxRecord {
        TxRecord {
            acks: std::mem::take(&mut self.acks),
            cancels: std::mem::take(&mut self.cancels),
            rollback_only: self.rollback_only.take(),
            outcome,
        }
    }
}

impl Transaction for TestTransaction {
    fn enlist_ack(&mut self, message_id: MessageId) {
        self.acks.push(message_id);
    }

    fn enlist_cancel(&mut self, message_id: MessageId, expire: bool) {
        self.cancels.push((message_id, expire));
    }

    fn mark_rollback_only(&mut self, reason: String) {
        self.rollback_only.get_or_insert(reason);
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.is_some()
    }

    fn commit(mut self: Box<Self>) -> Result<(), DeliveryError> {
        if self.fail_commit || self.rollback_only.is_some() {
            let reason = self
                .rollback_only
                .clone()
                .unwrap_or_else(|| "injected commit failure".into());
            let record = self.record(TxOutcome::RolledBack);
            self.log.push(record);
            return Err(DeliveryError::IllegalState(format!(
                "transaction is rollback-only: {reason}"
            )));
        }
        let record = self.record(TxOutcome::Committed);
        self.log.push(record);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), DeliveryError> {
        let record = self.record(TxOutcome::RolledBack);
        self.log.push(record);
        Ok(())
    }
}

/// A session double.
pub struct TestSession {
    name: String,
    username: Option<String>,
    remote_address: String,
    metadata: Mutex<HashMap<String, String>>,
    channel_version: AtomicI32,
    has_transacted: AtomicBool,
    lingerers: Mutex<Vec<ConsumerId>>,
    pub tx_log: Arc<TxLog>,
}

impl TestSession {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            username: Some("admin".into()),
            remote_address: "10.0.0.9:52114".into(),
            metadata: Mutex::new(HashMap::new()),
            channel_version: AtomicI32::new(ADDRESSING_CHANGE_VERSION),
            has_transacted: AtomicBool::new(false),
            lingerers: Mutex::new(Vec::new()),
            tx_log: TxLog::new(),
        })
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn set_channel_version(&self, version: i32) {
        self.channel_version.store(version, Ordering::SeqCst);
    }

    pub fn set_has_transacted_refs(&self, has: bool) {
        self.has_transacted.store(has, Ordering::SeqCst);
    }

    pub fn lingerers(&self) -> Vec<ConsumerId> {
        self.lingerers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Session for TestSession {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }

    fn metadata(&self, key: &str) -> Option<String> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn channel_version(&self) -> i32 {
        self.channel_version.load(Ordering::SeqCst)
    }

    fn new_transaction(&self) -> Box<dyn Transaction> {
        Box::new(TestTransaction::new(Arc::clone(&self.tx_log)))
    }

    fn has_transacted_refs(&self, _consumer_id: ConsumerId) -> bool {
        self.has_transacted.load(Ordering::SeqCst)
    }

    fn register_lingerer(&self, consumer_id: ConsumerId) {
        self.lingerers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer_id);
    }
}
