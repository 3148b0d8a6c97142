// Line-Framed Source
//
// Treats a byte stream (stdin, a file, a pipe) as a queue where every
// non-blank line is one message. There is no broker to settle with,
// so acks and rejects are only logged.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::{BusError, Delivery, DeliveryTag, MessageSource};

pub struct LineSource<R> {
    reader: R,
    line: u64,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0 }
    }
}

#[async_trait]
impl<R> MessageSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn subscribe(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, BusError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = self.reader.read_until(b'\n', &mut buf).await?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;

            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(Delivery {
                tag: DeliveryTag(self.line),
                payload: std::mem::take(&mut buf),
            }));
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BusError> {
        tracing::trace!(line = tag.0, "line acknowledged");
        Ok(())
    }

    async fn reject(&mut self, tag: DeliveryTag) -> Result<(), BusError> {
        tracing::debug!(line = tag.0, "line rejected");
        Ok(())
    }
}
