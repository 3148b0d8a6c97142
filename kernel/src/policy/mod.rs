// Flush Policy
//
// Decides when the buffer must be flushed and how much of it.
// This module is pure and deterministic: it sees a snapshot of the
// buffer and flush state and returns a decision. Applying that
// decision is the flusher's job.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Thresholds that drive flushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Records per bounded flush, and the largest single write.
    pub batch_size: usize,

    /// Maximum age of the oldest unflushed data before a full flush.
    pub flush_interval: Duration,

    /// Estimated buffer size that forces a full flush and an alert.
    pub max_buffer_bytes: usize,
}

/// Why a flush was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// Buffer grew past the memory threshold.
    Overflow,

    /// Flush interval elapsed with data still buffered.
    Interval,

    /// Buffer holds at least one full batch.
    BatchFull,

    /// Explicit request, e.g. on shutdown.
    Forced,
}

/// How much of the buffer a flush takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    /// Exactly this many records from the head.
    Batch(usize),

    /// The whole buffer.
    All,
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushDecision {
    /// A flush is already in flight.
    InProgress,

    /// Nothing to do.
    Skip,

    /// The interval elapsed on an empty buffer; restart the clock.
    RestartClock,

    /// Start a flush.
    Flush {
        trigger: FlushTrigger,
        scope: FlushScope,
        alert: bool,
    },
}

/// Mutable flush bookkeeping. Never persisted.
#[derive(Debug, Clone)]
pub struct FlushState {
    pub last_flush: Instant,
    pub in_progress: bool,

    /// Set once the current overflow episode has been alerted on.
    pub overflow_alerted: bool,
}

impl FlushState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_flush: now,
            in_progress: false,
            overflow_alerted: false,
        }
    }

    /// Mark a flush as started.
    pub fn begin(&mut self, now: Instant) {
        self.in_progress = true;
        self.last_flush = now;
    }

    /// Mark the in-flight flush as settled.
    pub fn finish(&mut self) {
        self.in_progress = false;
    }
}

/// Snapshot the policy evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushInputs {
    pub in_progress: bool,
    pub buffered: usize,
    pub buffered_bytes: usize,
    pub since_last_flush: Duration,
    pub overflow_alerted: bool,
}

impl FlushPolicy {
    /// Evaluate the policy. First matching rule wins:
    ///
    /// 1. a flush in flight blocks any other
    /// 2. memory pressure drains everything and alerts once per episode
    /// 3. an elapsed interval drains everything, if there is anything
    /// 4. a full batch flushes exactly `batch_size` records
    pub fn evaluate(&self, inputs: &FlushInputs) -> FlushDecision {
        if inputs.in_progress {
            return FlushDecision::InProgress;
        }

        if inputs.buffered > 0 && inputs.buffered_bytes >= self.max_buffer_bytes {
            return FlushDecision::Flush {
                trigger: FlushTrigger::Overflow,
                scope: FlushScope::All,
                alert: !inputs.overflow_alerted,
            };
        }

        if inputs.since_last_flush >= self.flush_interval {
            if inputs.buffered == 0 {
                return FlushDecision::RestartClock;
            }
            return FlushDecision::Flush {
                trigger: FlushTrigger::Interval,
                scope: FlushScope::All,
                alert: false,
            };
        }

        if inputs.buffered >= self.batch_size {
            return FlushDecision::Flush {
                trigger: FlushTrigger::BatchFull,
                scope: FlushScope::Batch(self.batch_size),
                alert: false,
            };
        }

        FlushDecision::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FlushPolicy {
        FlushPolicy {
            batch_size: 100,
            flush_interval: Duration::from_secs(60),
            max_buffer_bytes: 1024,
        }
    }

    fn inputs(buffered: usize, bytes: usize, since_secs: u64) -> FlushInputs {
        FlushInputs {
            in_progress: false,
            buffered,
            buffered_bytes: bytes,
            since_last_flush: Duration::from_secs(since_secs),
            overflow_alerted: false,
        }
    }

    #[test]
    fn in_progress_blocks_everything() {
        let mut i = inputs(500, 4096, 600);
        i.in_progress = true;

        assert_eq!(policy().evaluate(&i), FlushDecision::InProgress);
    }

    #[test]
    fn overflow_wins_over_interval_and_batch() {
        let decision = policy().evaluate(&inputs(500, 1024, 600));

        assert_eq!(
            decision,
            FlushDecision::Flush {
                trigger: FlushTrigger::Overflow,
                scope: FlushScope::All,
                alert: true,
            }
        );
    }

    #[test]
    fn overflow_alerts_once_per_episode() {
        let mut i = inputs(10, 2048, 0);
        i.overflow_alerted = true;

        match policy().evaluate(&i) {
            FlushDecision::Flush { trigger, alert, .. } => {
                assert_eq!(trigger, FlushTrigger::Overflow);
                assert!(!alert);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn interval_drains_partial_buffer() {
        let decision = policy().evaluate(&inputs(3, 50, 60));

        assert_eq!(
            decision,
            FlushDecision::Flush {
                trigger: FlushTrigger::Interval,
                scope: FlushScope::All,
                alert: false,
            }
        );
    }

    #[test]
    fn interval_on_empty_buffer_only_restarts_clock() {
        let decision = policy().evaluate(&inputs(0, 2, 120));
        assert_eq!(decision, FlushDecision::RestartClock);
    }

    #[test]
    fn full_batch_flushes_exactly_batch_size() {
        let decision = policy().evaluate(&inputs(250, 500, 5));

        assert_eq!(
            decision,
            FlushDecision::Flush {
                trigger: FlushTrigger::BatchFull,
                scope: FlushScope::Batch(100),
                alert: false,
            }
        );
    }

    #[test]
    fn below_all_thresholds_skips() {
        assert_eq!(policy().evaluate(&inputs(99, 500, 59)), FlushDecision::Skip);
    }
}
