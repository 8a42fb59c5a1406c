//! External collaborator: the sequential audio playback queue.

use async_trait::async_trait;
use tracing::info;

/// Consumes the pending-audio sequence in arrival order. The core never
/// plays audio itself.
#[async_trait]
pub trait Playback: Send + Sync {
    async fn enqueue(&self, url: &str);
}

/// A playback sink that just logs what it would have played.
pub struct LogPlayback;

#[async_trait]
impl Playback for LogPlayback {
    async fn enqueue(&self, url: &str) {
        info!(%url, "audio ready for playback");
    }
}
