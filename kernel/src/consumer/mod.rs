// Consumer Loop
//
// Pulls one delivery at a time from the bus, buffers it and settles it
// with the bus, then gives the flush policy a chance to run.
//
// A delivery is acknowledged as soon as its record sits in the buffer,
// not once it is persisted. A crash between the two loses the record
// even though the bus considers it delivered.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertSink, CONSUMER_DOWN_SUBJECT};
use crate::bus::{BusError, Delivery, MessageSource};
use crate::flush::Flusher;
use crate::record::LogRecord;

/// Lifecycle of the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsumerState {
    /// Not yet subscribed.
    Idle,

    /// Subscription active, handling deliveries.
    Consuming,

    /// Input ended or shutdown was requested.
    Stopped,

    /// The bus failed; the process is expected to exit.
    FatallyFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("message bus failure: {0}")]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub delivered: u64,
    pub buffered: u64,
    pub rejected: u64,
}

/// How a clean run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub state: ConsumerState,
    pub stats: ConsumerStats,
}

pub struct ConsumerLoop<S> {
    source: S,
    flusher: Flusher,
    alerts: AlertSink,
    shutdown: CancellationToken,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl<S: MessageSource> ConsumerLoop<S> {
    pub fn new(
        source: S,
        flusher: Flusher,
        alerts: AlertSink,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            flusher,
            alerts,
            shutdown,
            state: ConsumerState::Idle,
            stats: ConsumerStats::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Consume until the input ends, shutdown is requested, or the bus
    /// fails. A bus failure raises an alert before it is returned.
    pub async fn run(mut self) -> Result<ConsumerReport, ConsumerError> {
        if let Err(e) = self.source.subscribe().await {
            return Err(self.fail(e).await);
        }
        self.state = ConsumerState::Consuming;
        tracing::info!("log consumer running");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.source.recv() => next,
            };

            let result = match next {
                Ok(Some(delivery)) => self.handle(delivery).await,
                Ok(None) => break,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                return Err(self.fail(e).await);
            }
        }

        self.state = ConsumerState::Stopped;
        let stats = self.stats;
        tracing::info!(
            delivered = stats.delivered,
            buffered = stats.buffered,
            rejected = stats.rejected,
            "log consumer stopped"
        );

        Ok(ConsumerReport {
            state: self.state,
            stats,
        })
    }

    async fn handle(&mut self, delivery: Delivery) -> Result<(), BusError> {
        self.stats.delivered += 1;

        match LogRecord::decode(&delivery.payload) {
            Ok(record) => {
                self.flusher.append(record);
                self.stats.buffered += 1;
                tracing::debug!(
                    tag = delivery.tag.0,
                    buffered = self.stats.buffered,
                    "buffered log"
                );
                self.source.ack(delivery.tag).await?;
            }
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(tag = delivery.tag.0, error = %e, "invalid log payload, rejecting");
                self.source.reject(delivery.tag).await?;
            }
        }

        // Detached: the flush settles on its own task.
        drop(self.flusher.evaluate());
        Ok(())
    }

    async fn fail(&mut self, error: BusError) -> ConsumerError {
        tracing::error!(error = %error, "consumer failed");
        self.alerts
            .notify_and_wait(
                CONSUMER_DOWN_SUBJECT,
                &format!("The consumer crashed: {error}"),
            )
            .await;
        self.state = ConsumerState::FatallyFailed;
        ConsumerError::Bus(error)
    }
}
