//! Defines the WebSocket control-frame protocol between the client and the
//! voice service.
//!
//! Both directions are JSON with a `type` discriminator. Raw binary frames
//! (audio payload) travel on the same channel but are not represented here:
//! they are only valid between a sent `audio_start` and `audio_end`.

use crate::session::CoarseState;
use serde::{Deserialize, Serialize};

/// Control frames sent from the client to the voice service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Announces that binary audio frames follow, with their encoding.
    AudioStart { format: String },
    /// Closes the current audio utterance after the capture flush.
    AudioEnd,
    /// A typed user message.
    Text { text: String },
    /// Abandons the in-flight exchange server-side.
    Cancel,
    /// Liveness probe; the server answers with `pong`.
    Ping,
}

/// Why the server pushed an unsolicited message mid-conversation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageReason {
    FollowUp,
    Correction,
    Proactive,
    Continuation,
}

/// An unsolicited, server-initiated message. The transport may deliver
/// several of these per logical turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub reason: MessageReason,
}

/// An ephemeral progress snapshot, replaced wholesale by each update and
/// cleared on completion or error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessingNotice {
    pub message: String,
    pub elapsed_seconds: u64,
}

/// Frames sent from the voice service to the client.
///
/// Unknown discriminators deserialize to [`ServerFrame::Unknown`] so callers
/// can log and ignore them (forward compatibility).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Liveness acknowledgment for a client `ping`.
    Pong,
    /// A fresh session was established and assigned an id.
    Ready { session_id: String },
    /// The session named in the connect request was resumed. Carries the
    /// server-side coarse state, best-effort partial snapshots, and any
    /// frames queued while the client was away.
    SessionRestored {
        session_id: String,
        state: CoarseState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_transcript: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_response: Option<String>,
        #[serde(default)]
        pending_messages: Vec<ServerFrame>,
    },
    /// In-progress transcription of the user's speech (most-recent-wins).
    PartialTranscript { text: String },
    /// Final transcription; supersedes any partial.
    FinalTranscript { text: String },
    /// A chunk of the streamed response. `accumulated`, when present, is the
    /// server-supplied full text so far; otherwise the chunk stands alone.
    ResponseChunk {
        chunk: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accumulated: Option<String>,
    },
    /// The response finished; may carry synthesized audio and media.
    ResponseComplete {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
    },
    /// Progress report while the remote works.
    ProcessingStatus { message: String, elapsed_seconds: u64 },
    /// Unsolicited server-initiated content.
    ServerMessage(ServerMessage),
    /// A conversation-local, recoverable error.
    Error { message: String },
    /// Any discriminator this client does not understand.
    #[serde(other)]
    Unknown,
}
