//! The single authoritative conversation status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The UI-facing state of the conversation. Exactly one value is active at
/// a time; the UI and the capture bridge derive permitted actions from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// No channel, and no reconnect scheduled.
    Disconnected,
    /// A fresh channel is being established (no session to resume).
    Connecting,
    /// Channel open, idle, accepting input.
    Ready,
    /// Microphone capture is active and audio frames are streaming out.
    Recording,
    /// The remote is working on a response.
    Processing,
    /// The channel was lost (or is being resumed) and a retry is pending.
    Reconnecting,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationStatus::Disconnected => "disconnected",
            ConversationStatus::Connecting => "connecting",
            ConversationStatus::Ready => "ready",
            ConversationStatus::Recording => "recording",
            ConversationStatus::Processing => "processing",
            ConversationStatus::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", ConversationStatus::Disconnected), "disconnected");
        assert_eq!(format!("{}", ConversationStatus::Reconnecting), "reconnecting");
        assert_eq!(format!("{}", ConversationStatus::Ready), "ready");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ConversationStatus::Recording).unwrap();
        assert_eq!(json, "\"recording\"");

        let parsed: ConversationStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(parsed, ConversationStatus::Processing);
    }
}
