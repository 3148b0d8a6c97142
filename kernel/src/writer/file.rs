// JSON Lines File Writer
//
// Appends each batch to a file as newline-delimited JSON and syncs it
// to disk before acknowledging. A batch lands whole or not at all: a
// failed append is truncated away, and the append runs on its own task
// so a caller giving up on it cannot stop it between chunks.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{BatchWriter, WriteAck, WriteError};
use crate::record::LogRecord;

pub struct JsonLinesWriter {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl JsonLinesWriter {
    /// Open `path` for appending, creating it if missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WriteError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BatchWriter for JsonLinesWriter {
    async fn write(&self, records: &[LogRecord]) -> Result<WriteAck, WriteError> {
        // Encode up front so a bad record never leaves a torn batch behind.
        let mut buf = Vec::with_capacity(records.iter().map(|r| r.encoded_len() + 1).sum());
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let file = Arc::clone(&self.file);
        tokio::spawn(async move { append_or_rollback(&file, &buf).await })
            .await
            .map_err(|e| WriteError::Backend(format!("append task failed: {e}")))??;

        Ok(WriteAck {
            written: records.len(),
        })
    }
}

async fn append_or_rollback(file: &Mutex<File>, buf: &[u8]) -> Result<(), WriteError> {
    let mut file = file.lock().await;
    let len = file.metadata().await?.len();

    if let Err(e) = append(&mut file, buf).await {
        if let Err(rollback) = file.set_len(len).await {
            tracing::error!(error = %rollback, len, "could not truncate partial batch");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn append(file: &mut File, buf: &[u8]) -> io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await?;
    file.sync_data().await
}
