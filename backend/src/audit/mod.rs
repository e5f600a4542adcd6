//! Audit writer (C8).
//!
//! Many producers feed a bounded queue; producers never block — if the
//! queue is full on enqueue the log is dropped and a counter ticks (§5
//! "the audit queue is the only intentional backpressure point and it
//! chooses to drop rather than block"). A small worker pool drains the
//! queue into batched multi-row inserts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{AuditAction, AuditLog, AuditOutcome, Id, TransactionChannel};

use super::db::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditWriterConfig {
    pub buffer_size: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for AuditWriterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            workers: 2,
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    written: AtomicU64,
    batches_written: AtomicU64,
    write_errors: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct AuditStats {
    pub received: u64,
    pub written: u64,
    pub batches_written: u64,
    pub write_errors: u64,
    pub dropped: u64,
    pub avg_batch_size: f64,
    pub pending: usize,
}

pub struct AuditWriter {
    sender: mpsc::Sender<AuditLog>,
    counters: Arc<Counters>,
    last_flush: Arc<Mutex<Option<DateTime<Utc>>>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl AuditWriter {
    pub fn start(db: Arc<Database>, config: AuditWriterConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let last_flush = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let mut handles = Vec::with_capacity(config.workers);
        for _ in 0..config.workers.max(1) {
            let db = db.clone();
            let receiver = receiver.clone();
            let counters = counters.clone();
            let last_flush = last_flush.clone();
            let cancel = cancel.clone();
            let batch_size = config.batch_size.max(1);
            let flush_interval = config.flush_interval;
            handles.push(tokio::spawn(async move {
                worker_loop(db, receiver, counters, last_flush, cancel, batch_size, flush_interval).await;
            }));
        }

        Self {
            sender,
            counters,
            last_flush,
            cancel,
            handles: Mutex::new(handles),
            stopped: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue; on a full queue the log is dropped and counted.
    pub fn enqueue(&self, log: AuditLog) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if self.sender.try_send(log).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Factory API (§4.8): builds a timestamped record and returns a
    /// builder with `with_*` option setters; `send()` enqueues it.
    pub fn audit(
        &self,
        customer_id: Option<Id>,
        session_id: impl Into<String>,
        action: AuditAction,
        outcome: AuditOutcome,
        channel: TransactionChannel,
    ) -> AuditEntryBuilder<'_> {
        AuditEntryBuilder {
            writer: self,
            log: AuditLog {
                customer_id,
                employee_id: None,
                session_id: session_id.into(),
                action,
                outcome,
                channel,
                branch_id: None,
                atm_id: None,
                ip_address: None,
                user_agent: None,
                account_id: None,
                transaction_id: None,
                beneficiary_id: None,
                description: None,
                failure_reason: None,
                risk_score: None,
                request_id: Uuid::new_v4().to_string(),
                metadata: serde_json::json!({}),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn stats(&self) -> AuditStats {
        let written = self.counters.written.load(Ordering::Relaxed);
        let batches = self.counters.batches_written.load(Ordering::Relaxed);
        AuditStats {
            received: self.counters.received.load(Ordering::Relaxed),
            written,
            batches_written: batches,
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            avg_batch_size: if batches == 0 { 0.0 } else { written as f64 / batches as f64 },
            pending: self.sender.max_capacity() - self.sender.capacity(),
        }
    }

    /// Idempotent: signals workers, waits up to 30s for them to drain and
    /// exit.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        let _ = tokio::time::timeout(Duration::from_secs(30), async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
    }

    #[cfg(test)]
    fn new_for_test(buffer_size: usize) -> Self {
        let (sender, _receiver) = mpsc::channel(buffer_size);
        Self {
            sender,
            counters: Arc::new(Counters::default()),
            last_flush: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }
}

pub struct AuditEntryBuilder<'a> {
    writer: &'a AuditWriter,
    log: AuditLog,
}

impl<'a> AuditEntryBuilder<'a> {
    pub fn with_account(mut self, account_id: Id) -> Self {
        self.log.account_id = Some(account_id);
        self
    }

    pub fn with_transaction(mut self, transaction_id: Id) -> Self {
        self.log.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_atm(mut self, atm_id: Id) -> Self {
        self.log.atm_id = Some(atm_id);
        self
    }

    pub fn with_branch(mut self, branch_id: Id) -> Self {
        self.log.branch_id = Some(branch_id);
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.log.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.log.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.log.failure_reason = Some(reason.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.log.description = Some(description.into());
        self
    }

    pub fn with_risk_score(mut self, score: f64) -> Self {
        self.log.risk_score = Some(score);
        self
    }

    pub fn with_beneficiary(mut self, beneficiary_id: Id) -> Self {
        self.log.beneficiary_id = Some(beneficiary_id);
        self
    }

    pub fn send(self) {
        self.writer.enqueue(self.log);
    }
}

async fn worker_loop(
    db: Arc<Database>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<AuditLog>>>,
    counters: Arc<Counters>,
    last_flush: Arc<Mutex<Option<DateTime<Utc>>>>,
    cancel: CancellationToken,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            received = async { receiver.lock().await.recv().await } => {
                match received {
                    Some(log) => {
                        batch.push(log);
                        if batch.len() >= batch_size {
                            flush(&db, &mut batch, &counters, &last_flush).await;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&db, &mut batch, &counters, &last_flush).await;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    // Shutdown: drain whatever remains, batch_size chunks at a time,
    // without blocking on an empty channel.
    loop {
        let mut drained_any = false;
        {
            let mut recv = receiver.lock().await;
            while batch.len() < batch_size {
                match recv.try_recv() {
                    Ok(log) => {
                        batch.push(log);
                        drained_any = true;
                    }
                    Err(_) => break,
                }
            }
        }
        if !batch.is_empty() {
            flush(&db, &mut batch, &counters, &last_flush).await;
        }
        if !drained_any {
            break;
        }
    }
}

async fn flush(
    db: &Database,
    batch: &mut Vec<AuditLog>,
    counters: &Counters,
    last_flush: &Mutex<Option<DateTime<Utc>>>,
) {
    if batch.is_empty() {
        return;
    }
    let to_write = std::mem::take(batch);
    let batch_len = to_write.len() as u64;
    let result = tokio::time::timeout(Duration::from_secs(30), insert_batch(db, &to_write)).await;
    *last_flush.lock() = Some(Utc::now());
    match result {
        Ok(Ok(())) => {
            counters.written.fetch_add(batch_len, Ordering::Relaxed);
            counters.batches_written.fetch_add(1, Ordering::Relaxed);
        }
        _ => {
            // Logs are observational, not a ledger: no retries on failure.
            counters.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn insert_batch(db: &Database, logs: &[AuditLog]) -> Result<(), sqlx::Error> {
    let mut builder = sqlx::QueryBuilder::new(
        "INSERT INTO audit_logs (customer_id, employee_id, session_id, action, outcome, channel, \
         branch_id, atm_id, ip_address, user_agent, account_id, transaction_id, beneficiary_id, \
         description, failure_reason, risk_score, request_id, metadata, timestamp) ",
    );
    builder.push_values(logs, |mut row, log| {
        row.push_bind(log.customer_id)
            .push_bind(log.employee_id)
            .push_bind(&log.session_id)
            .push_bind(log.action)
            .push_bind(log.outcome)
            .push_bind(log.channel)
            .push_bind(log.branch_id)
            .push_bind(log.atm_id)
            .push_bind(&log.ip_address)
            .push_bind(&log.user_agent)
            .push_bind(log.account_id)
            .push_bind(log.transaction_id)
            .push_bind(log.beneficiary_id)
            .push_bind(&log.description)
            .push_bind(&log.failure_reason)
            .push_bind(log.risk_score)
            .push_bind(&log.request_id)
            .push_bind(&log.metadata)
            .push_bind(log.timestamp);
    });
    builder.build().execute(db.pool()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_past_capacity_increments_dropped_not_written() {
        let writer = AuditWriter::new_for_test(2);
        for _ in 0..5 {
            writer
                .audit(Some(1), "sess-1", AuditAction::BalanceInquiry, AuditOutcome::Success, TransactionChannel::Online)
                .send();
        }
        let stats = writer.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.written, 0);
        assert_eq!(stats.received, stats.written + stats.dropped + stats.pending as u64);
        assert!(stats.dropped > 0);
    }

    #[test]
    fn builder_applies_option_setters() {
        let writer = AuditWriter::new_for_test(4);
        writer
            .audit(Some(1), "sess-2", AuditAction::Withdrawal, AuditOutcome::Success, TransactionChannel::Atm)
            .with_account(10)
            .with_atm(3)
            .with_description("atm withdrawal")
            .send();
        assert_eq!(writer.stats().received, 1);
    }
}
