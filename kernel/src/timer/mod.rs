// Flush Timer
//
// Periodically evaluates the flush policy so that buffered records
// age out even when no new messages arrive. Goes through the same
// flusher as the consumer, so it obeys the same single-flush rule.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::flush::Flusher;

/// Spawn the timer task. It runs until `shutdown` is cancelled.
pub fn spawn_flush_timer(
    flusher: Flusher,
    tick: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if flusher.evaluate().is_some() {
                        tracing::debug!("timer started a flush");
                    }
                }
            }
        }

        tracing::debug!("flush timer stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::alert::{AlertSink, TracingNotifier};
    use crate::policy::FlushPolicy;
    use crate::record::LogRecord;
    use crate::writer::InMemoryBatchWriter;

    fn flusher(writer: Arc<InMemoryBatchWriter>) -> Flusher {
        let policy = FlushPolicy {
            batch_size: 100,
            flush_interval: Duration::from_secs(60),
            max_buffer_bytes: 5 * 1024 * 1024,
        };
        Flusher::new(policy, writer, AlertSink::new(Arc::new(TracingNotifier)), None)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_flush_an_aging_buffer_without_new_messages() {
        let writer = Arc::new(InMemoryBatchWriter::new());
        let flusher = flusher(writer.clone());
        let shutdown = CancellationToken::new();

        for seq in 0..7 {
            flusher.append(LogRecord::from_value(json!({ "seq": seq })).unwrap());
        }
        let timer = spawn_flush_timer(flusher.clone(), Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(writer.batches().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        flusher.wait_idle().await;
        assert_eq!(writer.records().len(), 7);
        assert_eq!(flusher.buffered().0, 0);
        assert_eq!(flusher.stats().flushes, 1);

        shutdown.cancel();
        timer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_shutdown() {
        let writer = Arc::new(InMemoryBatchWriter::new());
        let shutdown = CancellationToken::new();
        let timer = spawn_flush_timer(flusher(writer), Duration::from_secs(1), shutdown.clone());

        shutdown.cancel();
        timer.await.unwrap();
    }
}
