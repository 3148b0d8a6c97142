// In-Process Bus
//
// A tokio channel standing in for a broker queue. Settlements are
// recorded in a shared ledger so callers can observe them.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BusError, Delivery, DeliveryTag, MessageSource};

enum Envelope {
    Message(Vec<u8>),
    Failure(BusError),
}

/// Producer handle for a [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelPublisher {
    /// Publish a payload. Returns `false` if the source is gone.
    pub async fn publish(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.tx
            .send(Envelope::Message(payload.into()))
            .await
            .is_ok()
    }

    /// Make the source's next `recv` fail with `error`.
    pub async fn fail(&self, error: BusError) -> bool {
        self.tx.send(Envelope::Failure(error)).await.is_ok()
    }
}

/// Acknowledged and rejected delivery tags, in settlement order.
#[derive(Debug, Clone, Default)]
pub struct DeliveryLedger {
    inner: Arc<Mutex<LedgerEntries>>,
}

#[derive(Debug, Default)]
struct LedgerEntries {
    acked: Vec<DeliveryTag>,
    rejected: Vec<DeliveryTag>,
}

impl DeliveryLedger {
    pub fn acked(&self) -> Vec<DeliveryTag> {
        self.lock().acked.clone()
    }

    pub fn rejected(&self) -> Vec<DeliveryTag> {
        self.lock().rejected.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerEntries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ChannelSource {
    rx: mpsc::Receiver<Envelope>,
    next_tag: u64,
    subscribed: bool,
    ledger: DeliveryLedger,
}

impl ChannelSource {
    /// Create a connected publisher/source pair.
    pub fn new(capacity: usize) -> (ChannelPublisher, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            rx,
            next_tag: 1,
            subscribed: false,
            ledger: DeliveryLedger::default(),
        };
        (ChannelPublisher { tx }, source)
    }

    pub fn ledger(&self) -> DeliveryLedger {
        self.ledger.clone()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn subscribe(&mut self) -> Result<(), BusError> {
        self.subscribed = true;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, BusError> {
        if !self.subscribed {
            return Err(BusError::Subscribe("recv before subscribe".into()));
        }

        match self.rx.recv().await {
            Some(Envelope::Message(payload)) => {
                let tag = DeliveryTag(self.next_tag);
                self.next_tag += 1;
                Ok(Some(Delivery { tag, payload }))
            }
            Some(Envelope::Failure(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BusError> {
        self.ledger.lock().acked.push(tag);
        Ok(())
    }

    async fn reject(&mut self, tag: DeliveryTag) -> Result<(), BusError> {
        self.ledger.lock().rejected.push(tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_publish_order_with_fresh_tags() {
        let (publisher, mut source) = ChannelSource::new(8);
        source.subscribe().await.unwrap();

        publisher.publish("a").await;
        publisher.publish("b").await;
        drop(publisher);

        let first = source.recv().await.unwrap().unwrap();
        let second = source.recv().await.unwrap().unwrap();
        assert_eq!(first.payload, b"a");
        assert_eq!(second.tag, DeliveryTag(2));
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recv_requires_subscription() {
        let (_publisher, mut source) = ChannelSource::new(1);
        assert!(matches!(
            source.recv().await,
            Err(BusError::Subscribe(_))
        ));
    }

    #[tokio::test]
    async fn ledger_tracks_settlements() {
        let (_publisher, mut source) = ChannelSource::new(1);
        let ledger = source.ledger();

        source.ack(DeliveryTag(1)).await.unwrap();
        source.reject(DeliveryTag(2)).await.unwrap();

        assert_eq!(ledger.acked(), vec![DeliveryTag(1)]);
        assert_eq!(ledger.rejected(), vec![DeliveryTag(2)]);
    }
}
