//! Byte-stream plumbing shared by the serial and RFCOMM transports.
//!
//! Neither stream has framing of its own, so a reader task accumulates into
//! the link's framer. The write half sits behind an async mutex; `None`
//! means closed and every later write fails.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::DisconnectReason;
use super::link::Link;
use crate::error::{NiimlinkError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Size of a single read from the device
const READ_CHUNK: usize = 1024;

#[derive(Default)]
pub(crate) struct StreamIo {
    writer: Arc<AsyncMutex<Option<BoxedWriter>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamIo {
    /// Start reading from `reader` into `link`, and keep `writer` for sends.
    pub async fn attach<R, W>(&self, link: Arc<Link>, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        *self.writer.lock().await = Some(Box::new(writer));

        let writer = self.writer.clone();
        let task = tokio::spawn(read_loop(link, reader, writer));

        let previous = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NiimlinkError::NotConnected)?;
        writer
            .write_all(data)
            .await
            .map_err(|e| NiimlinkError::Transport(format!("Write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| NiimlinkError::Transport(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    /// Stop the reader and close the write half. Safe to call repeatedly.
    ///
    /// Returns once the reader task has finished, so its half of the
    /// stream is dropped before the caller reopens the device.
    pub async fn close(&self) {
        let task = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "shutdown on close");
            }
        }
    }
}

async fn read_loop<R>(link: Arc<Link>, mut reader: R, writer: Arc<AsyncMutex<Option<BoxedWriter>>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    let mut reason = DisconnectReason::Lost;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("stream closed by device");
                break;
            }
            Ok(n) => {
                if let Err(e) = link.ingest(&buf[..n]) {
                    warn!(error = %e, "receive stream unusable");
                    if e.is_fatal_for_link() {
                        reason = DisconnectReason::from_error(&e);
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        }
    }

    drop(reader);
    writer.lock().await.take();
    link.mark_disconnected(reason);
}
