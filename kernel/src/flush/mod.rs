// Flush Coordinator
//
// Owns the buffer and flush state behind a single lock. Every path
// that touches them (appends, policy evaluation, requeue) goes through
// here, which guarantees at most one flush in flight and that no two
// flushes ever take overlapping records.
//
// The lock is never held across the write itself: records are taken
// under the lock, written without it, and settled under it again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::alert::{AlertSink, BUFFER_OVERFLOW_SUBJECT};
use crate::buffer::Buffer;
use crate::policy::{
    FlushDecision, FlushInputs, FlushPolicy, FlushScope, FlushState, FlushTrigger,
};
use crate::record::LogRecord;
use crate::writer::{BatchWriter, WriteError};

/// Result of one flush operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub written: usize,
    pub requeued: usize,
}

impl FlushReport {
    pub fn succeeded(&self) -> bool {
        self.requeued == 0
    }
}

/// Running counters, shared with whoever wants to report them.
#[derive(Debug, Default)]
pub struct FlushStats {
    flushes: AtomicU64,
    failed_writes: AtomicU64,
    records_written: AtomicU64,
    records_requeued: AtomicU64,
    overflow_alerts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStatsSnapshot {
    pub flushes: u64,
    pub failed_writes: u64,
    pub records_written: u64,
    pub records_requeued: u64,
    pub overflow_alerts: u64,
}

impl FlushStats {
    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_requeued: self.records_requeued.load(Ordering::Relaxed),
            overflow_alerts: self.overflow_alerts.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    buffer: Buffer,
    state: FlushState,
}

struct Inner {
    shared: Mutex<Shared>,
    policy: FlushPolicy,
    writer: Arc<dyn BatchWriter>,
    alerts: AlertSink,
    write_timeout: Option<Duration>,
    stats: FlushStats,
    settled: Notify,
}

/// Cloneable handle to the flush machinery.
#[derive(Clone)]
pub struct Flusher {
    inner: Arc<Inner>,
}

impl Flusher {
    /// Create a flusher over an empty buffer.
    ///
    /// With a `write_timeout`, writes that take longer count as failed.
    pub fn new(
        policy: FlushPolicy,
        writer: Arc<dyn BatchWriter>,
        alerts: AlertSink,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    buffer: Buffer::new(),
                    state: FlushState::new(Instant::now().into_std()),
                }),
                policy,
                writer,
                alerts,
                write_timeout,
                stats: FlushStats::default(),
                settled: Notify::new(),
            }),
        }
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.inner.policy
    }

    /// Buffer a record. Never blocks on an in-flight write.
    pub fn append(&self, record: LogRecord) {
        self.inner.lock().buffer.append(record);
    }

    /// Number of buffered records and their estimated size in bytes.
    pub fn buffered(&self) -> (usize, usize) {
        let shared = self.inner.lock();
        (shared.buffer.len(), shared.buffer.estimate_size_bytes())
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.lock().state.in_progress
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Evaluate the flush policy and start a flush if it calls for one.
    ///
    /// The write runs on a spawned task; the returned handle may be
    /// dropped to let it run detached. Must be called from within a
    /// tokio runtime.
    pub fn evaluate(&self) -> Option<JoinHandle<FlushReport>> {
        let now = Instant::now().into_std();
        let mut shared = self.inner.lock();

        // An overflow flush empties the buffer while it runs; the episode
        // only ends once a settled buffer is seen below the limit.
        let buffered_bytes = shared.buffer.estimate_size_bytes();
        if !shared.state.in_progress && buffered_bytes < self.inner.policy.max_buffer_bytes {
            shared.state.overflow_alerted = false;
        }

        let inputs = FlushInputs {
            in_progress: shared.state.in_progress,
            buffered: shared.buffer.len(),
            buffered_bytes,
            since_last_flush: now.saturating_duration_since(shared.state.last_flush),
            overflow_alerted: shared.state.overflow_alerted,
        };

        let (trigger, scope, alert) = match self.inner.policy.evaluate(&inputs) {
            FlushDecision::InProgress | FlushDecision::Skip => return None,
            FlushDecision::RestartClock => {
                shared.state.last_flush = now;
                return None;
            }
            FlushDecision::Flush {
                trigger,
                scope,
                alert,
            } => (trigger, scope, alert),
        };

        let records = match scope {
            FlushScope::Batch(count) => shared.buffer.take_batch(count),
            FlushScope::All => shared.buffer.take_all(),
        };
        shared.state.begin(now);
        if alert {
            shared.state.overflow_alerted = true;
        }
        drop(shared);

        if alert {
            self.raise_overflow_alert(buffered_bytes);
        }

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.flush(trigger, records).await }))
    }

    /// Drain the whole buffer now, regardless of thresholds.
    ///
    /// Waits for any in-flight flush to settle first, then writes the
    /// buffer inline. Returns `None` if there was nothing to flush.
    pub async fn force_flush(&self) -> Option<FlushReport> {
        let records = loop {
            let settled = self.inner.settled.notified();
            {
                let mut shared = self.inner.lock();
                if !shared.state.in_progress {
                    if shared.buffer.is_empty() {
                        return None;
                    }
                    let records = shared.buffer.take_all();
                    shared.state.begin(Instant::now().into_std());
                    break records;
                }
            }
            settled.await;
        };

        Some(self.inner.flush(FlushTrigger::Forced, records).await)
    }

    /// Wait until no flush is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.inner.settled.notified();
            if !self.is_flushing() {
                return;
            }
            settled.await;
        }
    }

    fn raise_overflow_alert(&self, buffered_bytes: usize) {
        let limit = self.inner.policy.max_buffer_bytes;
        self.inner.stats.overflow_alerts.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            buffered_bytes,
            limit,
            "buffer exceeded memory threshold, flushing early"
        );
        self.inner.alerts.notify(
            BUFFER_OVERFLOW_SUBJECT,
            format!(
                "Buffer reached {:.2} MB, over the {:.2} MB limit. Flushing early.",
                mib(buffered_bytes),
                mib(limit)
            ),
        );
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `records` in chunks of at most `batch_size`, then settle:
    /// on the first failed chunk, that chunk and everything after it go
    /// back to the front of the buffer.
    async fn flush(&self, trigger: FlushTrigger, records: Vec<LogRecord>) -> FlushReport {
        let flush_id = Uuid::new_v4();
        let chunk_size = self.policy.batch_size.max(1);
        let total = records.len();
        let mut settlement = Settlement {
            inner: self,
            records,
            written: 0,
        };

        while settlement.written < total {
            let end = (settlement.written + chunk_size).min(total);
            match self.write(&settlement.records[settlement.written..end]).await {
                Ok(()) => settlement.written = end,
                Err(e) => {
                    self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        %flush_id,
                        ?trigger,
                        error = %e,
                        pending = settlement.pending(),
                        "batch write failed, requeueing"
                    );
                    break;
                }
            }
        }

        let written = settlement.written;
        let requeued = settlement.pending();
        drop(settlement);

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .records_written
            .fetch_add(written as u64, Ordering::Relaxed);
        self.stats
            .records_requeued
            .fetch_add(requeued as u64, Ordering::Relaxed);
        if written > 0 {
            tracing::info!(%flush_id, ?trigger, written, "saved batch of logs");
        }

        FlushReport {
            trigger,
            written,
            requeued,
        }
    }

    async fn write(&self, chunk: &[LogRecord]) -> Result<(), WriteError> {
        let write = self.writer.write(chunk);
        match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result.map(drop),
                Err(_) => Err(WriteError::TimedOut(limit)),
            },
            None => write.await.map(drop),
        }
    }
}

/// Records taken by one flush. Dropping it requeues whatever was not
/// written and ends the flush, so a panicking writer or an abandoned
/// flush still leaves the flusher usable.
struct Settlement<'a> {
    inner: &'a Inner,
    records: Vec<LogRecord>,
    written: usize,
}

impl Settlement<'_> {
    fn pending(&self) -> usize {
        self.records.len() - self.written
    }
}

impl Drop for Settlement<'_> {
    fn drop(&mut self) {
        let unwritten = self.records.split_off(self.written);
        {
            let mut shared = self.inner.lock();
            if !unwritten.is_empty() {
                shared.buffer.requeue_front(unwritten);
            }
            shared.state.finish();
        }
        self.inner.settled.notify_waiters();
    }
}

fn mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
