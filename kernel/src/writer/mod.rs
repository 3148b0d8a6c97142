// Batch Writer Abstraction
//
// Defines the durability contract for persisting a batch of records.
// A write succeeds or fails as a whole from the caller's point of view;
// on failure the caller assumes nothing from the batch was persisted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::record::LogRecord;

pub mod file;

pub use file::JsonLinesWriter;

/// Acknowledgment of a persisted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub written: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("backend rejected batch: {0}")]
    Backend(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

/// Storage backend that accepts bulk writes.
///
/// Implementations MAY tolerate individual item failures internally,
/// but must report failure if they cannot vouch for the whole batch.
/// Callers retry a failed batch in full, so backends should tolerate
/// receiving the same record more than once.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn write(&self, records: &[LogRecord]) -> Result<WriteAck, WriteError>;
}

/// Writer that keeps batches in memory.
///
/// Failures can be scripted with [`InMemoryBatchWriter::fail_next`].
#[derive(Debug, Default)]
pub struct InMemoryBatchWriter {
    batches: Mutex<Vec<Vec<LogRecord>>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl InMemoryBatchWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Every successfully written batch, in write order.
    pub fn batches(&self) -> Vec<Vec<LogRecord>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every successfully written record, in write order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.batches().into_iter().flatten().collect()
    }

    /// Number of write calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchWriter for InMemoryBatchWriter {
    async fn write(&self, records: &[LogRecord]) -> Result<WriteAck, WriteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WriteError::Backend("scripted failure".into()));
        }

        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(records.to_vec());

        Ok(WriteAck {
            written: records.len(),
        })
    }
}
