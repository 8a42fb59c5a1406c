//! External collaborator: the audio capture device.
//!
//! The controller never touches microphone hardware; it only asks a bridge
//! to start and stop, and forwards the encoded frames the bridge emits.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

/// An audio capture device as seen by the connection controller.
#[async_trait]
pub trait CaptureBridge: Send + Sync {
    /// Starts capture. The returned stream yields encoded audio frames and
    /// ends once the device has flushed after [`CaptureBridge::end`].
    async fn begin(&self, format_hint: &str) -> Result<mpsc::Receiver<Bytes>>;

    /// Stops capture and flushes; resolves once the final frames have been
    /// handed to the stream.
    async fn end(&self) -> Result<()>;
}

/// A bridge with no microphone behind it: starts cleanly, yields no frames.
/// Useful for text-only runs of the client.
#[derive(Default)]
pub struct NullBridge {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

#[async_trait]
impl CaptureBridge for NullBridge {
    async fn begin(&self, _format_hint: &str) -> Result<mpsc::Receiver<Bytes>> {
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn end(&self) -> Result<()> {
        // Dropping the sender ends the frame stream, which is the flush
        // signal for an empty capture.
        self.tx.lock().await.take();
        Ok(())
    }
}
