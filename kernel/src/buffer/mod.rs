// Pending Record Buffer
//
// Ordered FIFO of records that have been acknowledged to the bus but
// not yet persisted. The buffer itself is not synchronized; callers
// hold it behind the flusher's lock, which makes every operation here
// atomic with respect to the others.

use std::collections::VecDeque;

use crate::record::LogRecord;

#[derive(Debug, Default)]
pub struct Buffer {
    records: VecDeque<LogRecord>,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    /// Add a record at the tail.
    pub fn append(&mut self, record: LogRecord) {
        self.records.push_back(record);
    }

    /// Remove up to `max` records from the head, oldest first.
    pub fn take_batch(&mut self, max: usize) -> Vec<LogRecord> {
        let count = max.min(self.records.len());
        self.records.drain(..count).collect()
    }

    /// Remove every buffered record, oldest first.
    pub fn take_all(&mut self) -> Vec<LogRecord> {
        self.records.drain(..).collect()
    }

    /// Put a previously taken batch back at the head.
    ///
    /// The batch keeps its internal order and ends up ahead of anything
    /// appended since it was taken.
    pub fn requeue_front(&mut self, records: Vec<LogRecord>) {
        for record in records.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Estimated size of the buffer serialized as a JSON array.
    ///
    /// Recomputed from the records on every call so it can never drift
    /// from the buffer contents.
    pub fn estimate_size_bytes(&self) -> usize {
        let separators = self.records.len().saturating_sub(1);
        let payload: usize = self.records.iter().map(LogRecord::encoded_len).sum();
        2 + separators + payload
    }
}
