// Message Bus Abstraction
//
// The consumer sees the bus as a stream of opaque payloads that must
// each be settled exactly once: acknowledged or rejected. Connection
// and topology setup belong to the implementation.

use async_trait::async_trait;

pub mod channel;
pub mod lines;

pub use channel::{ChannelPublisher, ChannelSource, DeliveryLedger};
pub use lines::LineSource;

/// Bus-assigned handle used to settle a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("connection lost: {0}")]
    Connection(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inbound side of the message bus.
#[async_trait]
pub trait MessageSource: Send {
    /// Establish the subscription. Called once before any `recv`.
    async fn subscribe(&mut self) -> Result<(), BusError>;

    /// Next delivery, or `None` once the stream has ended cleanly.
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError>;

    /// Confirm a delivery; the bus will not redeliver it.
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BusError>;

    /// Reject a delivery permanently, without requeueing it on the bus.
    async fn reject(&mut self, tag: DeliveryTag) -> Result<(), BusError>;
}
