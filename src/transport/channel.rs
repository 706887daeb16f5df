//! # Exclusive Send Channel
//!
//! Serializes every outbound write on one transport.
//!
//! ## Send Modes
//!
//! | Mode | Exclusion token | Inter-send wait | Use |
//! |------|-----------------|-----------------|-----|
//! | normal | held for the whole send | `packet_interval` | everything |
//! | urgent | bypassed | none | abort / shutdown commands |
//!
//! The printer firmware cannot absorb back-to-back writes below a minimum
//! spacing, so normal sends queue on a FIFO token and sleep the interval
//! before writing. Urgent sends skip the queue.
//!
//! ## Sequence (normal send)
//!
//! ```text
//! connected? ── no ──► teardown, NotConnected
//!     │ yes
//! acquire token (FIFO)
//!     │
//! sleep(interval) ◄── woken early by release_waiters() ──► NotConnected
//!     │
//! connected? ── no ──► teardown, NotConnected
//!     │ yes
//! write, release token
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::error::{NiimlinkError, Result};

/// The physical side of a transport, as seen by [`ExclusiveChannel`].
#[async_trait]
pub trait WireWriter: Send + Sync {
    /// Whether the link is up and accepts writes
    fn is_writable(&self) -> bool;

    /// Write one span to the device. Implementations must not interleave
    /// concurrent calls.
    async fn write_raw(&self, data: &[u8]) -> Result<()>;

    /// Tear the link down after a send found it broken.
    async fn teardown(&self);
}

#[derive(Debug)]
pub struct ExclusiveChannel {
    token: Mutex<()>,
    interval: Duration,
    closed: Notify,
}

impl ExclusiveChannel {
    pub fn new(interval: Duration) -> Self {
        Self {
            token: Mutex::new(()),
            interval,
            closed: Notify::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Send `data` through `writer`.
    ///
    /// ## Errors
    ///
    /// [`NiimlinkError::NotConnected`] if the link is down when the call
    /// starts, goes down while waiting, or is found down right before the
    /// write. The writer is torn down in every one of those cases.
    pub async fn send<W>(&self, writer: &W, data: &[u8], urgent: bool) -> Result<()>
    where
        W: WireWriter + ?Sized,
    {
        if urgent {
            trace!(len = data.len(), "urgent send");
            return write_checked(writer, data).await;
        }

        if !writer.is_writable() {
            writer.teardown().await;
            return Err(NiimlinkError::NotConnected);
        }

        let _token = self.token.lock().await;

        // A sender queued behind a dead link should fail without sleeping.
        if !writer.is_writable() {
            writer.teardown().await;
            return Err(NiimlinkError::NotConnected);
        }

        if !self.interval.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.closed.notified() => {
                    debug!("send aborted by disconnect");
                    return Err(NiimlinkError::NotConnected);
                }
            }
        }

        write_checked(writer, data).await
    }

    /// Wake every send currently sleeping out the interval.
    ///
    /// Called on disconnect so no sender waits on a link that is gone.
    pub fn release_waiters(&self) {
        self.closed.notify_waiters();
    }
}

async fn write_checked<W>(writer: &W, data: &[u8]) -> Result<()>
where
    W: WireWriter + ?Sized,
{
    if !writer.is_writable() {
        writer.teardown().await;
        return Err(NiimlinkError::NotConnected);
    }
    if let Err(e) = writer.write_raw(data).await {
        if e.is_fatal_for_link() {
            debug!(error = %e, "write failed, tearing link down");
            writer.teardown().await;
        }
        return Err(e);
    }
    trace!(data = %hex::encode(data), ">> sent");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
