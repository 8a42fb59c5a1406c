//! Routes inbound server frames into the observable conversation state.
//!
//! One pure reducer handles both live frames and frames replayed from a
//! `session_restored` payload, so resumption cannot diverge from the live
//! path. The async layer owns side effects (persistence, playback handoff,
//! timer disarming) and drives them from the returned [`RouteOutcome`].

use crate::protocol::{ProcessingNotice, ServerFrame, ServerMessage};
use crate::session::CoarseState;
use crate::status::ConversationStatus;
use tracing::debug;

/// Everything the UI can observe about the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub status: ConversationStatus,
    pub session_id: Option<String>,
    pub partial_transcript: Option<String>,
    pub final_transcript: Option<String>,
    pub response_text: Option<String>,
    pub response_complete: bool,
    pub media_url: Option<String>,
    /// Append-only; the only channel for unsolicited server content.
    pub server_messages: Vec<ServerMessage>,
    /// Ordered audio references not yet confirmed played.
    pub pending_audio: Vec<String>,
    pub processing: Option<ProcessingNotice>,
    pub error: Option<String>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            status: ConversationStatus::Disconnected,
            session_id: None,
            partial_transcript: None,
            final_transcript: None,
            response_text: None,
            response_complete: false,
            media_url: None,
            server_messages: Vec::new(),
            pending_audio: Vec::new(),
            processing: None,
            error: None,
        }
    }
}

impl Conversation {
    /// Clears the per-exchange fields, error included. Used by `cancel()`;
    /// connection identity (status, session id) is untouched.
    pub fn clear_exchange(&mut self) {
        self.partial_transcript = None;
        self.final_transcript = None;
        self.response_text = None;
        self.response_complete = false;
        self.processing = None;
        self.error = None;
    }
}

/// What the routed frame meant, so the caller can apply side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A liveness ack: disarm the probe timer, nothing visible changed.
    LivenessAck,
    /// A `ready` or `session_restored`: the session is (re)established.
    SessionOpened,
    /// Conversation state changed.
    StateChanged,
    /// Unknown discriminator; logged and dropped.
    Ignored,
}

/// Applies one server frame to the conversation.
///
/// Frames queued inside `session_restored` are replayed through this same
/// function recursively, preserving arrival order, so N replayed frames
/// produce exactly the state N live frames would have.
pub fn route(frame: ServerFrame, conv: &mut Conversation) -> RouteOutcome {
    match frame {
        ServerFrame::Pong => RouteOutcome::LivenessAck,

        ServerFrame::Ready { session_id } => {
            conv.session_id = Some(session_id);
            conv.status = ConversationStatus::Ready;
            conv.error = None;
            RouteOutcome::SessionOpened
        }

        ServerFrame::SessionRestored {
            session_id,
            state,
            partial_transcript,
            partial_response,
            pending_messages,
        } => {
            conv.session_id = Some(session_id);
            conv.error = None;
            if partial_transcript.is_some() {
                conv.partial_transcript = partial_transcript;
            }
            if partial_response.is_some() {
                conv.response_text = partial_response;
                conv.response_complete = false;
            }
            conv.status = match state {
                CoarseState::Processing => ConversationStatus::Processing,
                CoarseState::Idle | CoarseState::Recording => ConversationStatus::Ready,
            };
            for queued in pending_messages {
                route(queued, conv);
            }
            RouteOutcome::SessionOpened
        }

        ServerFrame::PartialTranscript { text } => {
            // Most-recent-wins; no accumulation.
            conv.partial_transcript = Some(text);
            RouteOutcome::StateChanged
        }

        ServerFrame::FinalTranscript { text } => {
            conv.final_transcript = Some(text);
            conv.partial_transcript = None;
            RouteOutcome::StateChanged
        }

        ServerFrame::ResponseChunk { chunk, accumulated } => {
            conv.response_text = Some(accumulated.unwrap_or(chunk));
            conv.response_complete = false;
            conv.status = ConversationStatus::Processing;
            RouteOutcome::StateChanged
        }

        ServerFrame::ResponseComplete {
            text,
            audio_url,
            media_url,
        } => {
            conv.response_text = Some(text);
            conv.response_complete = true;
            if media_url.is_some() {
                conv.media_url = media_url;
            }
            conv.processing = None;
            if let Some(url) = audio_url {
                conv.pending_audio.push(url);
            }
            conv.status = ConversationStatus::Ready;
            RouteOutcome::StateChanged
        }

        ServerFrame::ProcessingStatus {
            message,
            elapsed_seconds,
        } => {
            conv.processing = Some(ProcessingNotice {
                message,
                elapsed_seconds,
            });
            RouteOutcome::StateChanged
        }

        ServerFrame::ServerMessage(msg) => {
            if let Some(url) = &msg.audio_url {
                conv.pending_audio.push(url.clone());
            }
            conv.server_messages.push(msg);
            RouteOutcome::StateChanged
        }

        ServerFrame::Error { message } => {
            // Errors are conversation-local and recoverable: back to ready,
            // never to disconnected.
            conv.error = Some(message);
            conv.processing = None;
            conv.status = ConversationStatus::Ready;
            RouteOutcome::StateChanged
        }

        ServerFrame::Unknown => {
            debug!("ignoring frame with unknown discriminator");
            RouteOutcome::Ignored
        }
    }
}
