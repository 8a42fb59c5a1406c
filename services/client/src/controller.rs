//! The connection controller: owns the duplex channel, the reconnect and
//! liveness policy, and every `ConversationStatus` transition.
//!
//! The controller is a single-owner actor. User intents arrive as commands
//! over an mpsc channel; inbound frames, capture frames and timer deadlines
//! are multiplexed into the same `tokio::select!` loop, so no two events can
//! mutate the conversation concurrently. Disconnect takes precedence over
//! everything: it clears the should-reconnect flag before acting, and every
//! timer-driven path checks that flag before forcing a reconnect.

use crate::capture::CaptureBridge;
use crate::config::{CapturePolicy, Config};
use crate::playback::Playback;
use crate::transport::{FrameSink, FrameStream, Transport, WireFrame};
use bytes::Bytes;
use murmur_core::protocol::{ClientFrame, ServerFrame};
use murmur_core::router::{Conversation, RouteOutcome, route};
use murmur_core::session::{CoarseState, SessionMirror, SessionRecord};
use murmur_core::status::ConversationStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Fixed escalating reconnect schedule; holds at the last value. The index
/// resets to zero on every successful `ready`/`session_restored`.
const RECONNECT_SCHEDULE: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Grace period between the capture flush and the `audio_end` frame, so the
/// final frames can drain through the channel first.
const AUDIO_END_GRACE: Duration = Duration::from_millis(300);

/// User/UI intents, serialized through the controller task.
#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    StartCapture,
    StopCapture,
    SendText(String),
    Cancel,
    Foregrounded,
    Backgrounded,
}

/// One iteration's worth of input to the controller loop.
enum Event {
    Command(Option<Command>),
    Inbound(Option<anyhow::Result<WireFrame>>),
    CaptureFrame(Option<Bytes>),
    ReconnectDue,
    LivenessTimedOut,
    AudioEndDue,
}

/// The caller-facing side of the controller. Cheap to clone; all methods
/// enqueue a command for the controller task.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    conversation: Arc<Mutex<Conversation>>,
    status_rx: watch::Receiver<ConversationStatus>,
}

impl ClientHandle {
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    pub fn start_capture(&self) {
        self.send(Command::StartCapture);
    }

    pub fn stop_capture(&self) {
        self.send(Command::StopCapture);
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Command::SendText(text.into()));
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// The app came back to the foreground; verify the channel is alive.
    pub fn foregrounded(&self) {
        self.send(Command::Foregrounded);
    }

    /// The app is being suspended; persist state while we still can.
    pub fn backgrounded(&self) {
        self.send(Command::Backgrounded);
    }

    /// A snapshot of everything the UI can observe.
    pub async fn conversation(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    pub fn status(&self) -> ConversationStatus {
        *self.status_rx.borrow()
    }

    /// A watch receiver that updates on every status transition.
    pub fn status_updates(&self) -> watch::Receiver<ConversationStatus> {
        self.status_rx.clone()
    }

    fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("controller task is gone; command dropped");
        }
    }
}

/// Owns the channel, the timers, and the reconnect flag. Everything runs on
/// one task; see the module docs for the race discipline.
pub struct ConnectionController {
    cfg: Config,
    transport: Arc<dyn Transport>,
    mirror: SessionMirror,
    capture: Arc<dyn CaptureBridge>,
    playback: Arc<dyn Playback>,

    conversation: Arc<Mutex<Conversation>>,
    status_tx: watch::Sender<ConversationStatus>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,

    sink: Option<Box<dyn FrameSink>>,
    stream: Option<Box<dyn FrameStream>>,
    capture_rx: Option<mpsc::Receiver<Bytes>>,

    /// True by default; set false only by an explicit disconnect.
    should_reconnect: bool,
    delay_index: usize,
    reconnect_at: Option<Instant>,
    liveness_deadline: Option<Instant>,
    audio_end_at: Option<Instant>,
    shutdown: bool,
}

impl ConnectionController {
    /// Builds a controller and spawns its task.
    pub fn spawn(
        cfg: Config,
        transport: Arc<dyn Transport>,
        mirror: SessionMirror,
        capture: Arc<dyn CaptureBridge>,
        playback: Arc<dyn Playback>,
    ) -> (ClientHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let conversation = Arc::new(Mutex::new(Conversation::default()));
        let (status_tx, status_rx) = watch::channel(ConversationStatus::Disconnected);

        let controller = Self {
            cfg,
            transport,
            mirror,
            capture,
            playback,
            conversation: conversation.clone(),
            status_tx,
            cmd_rx,
            sink: None,
            stream: None,
            capture_rx: None,
            should_reconnect: true,
            delay_index: 0,
            reconnect_at: None,
            liveness_deadline: None,
            audio_end_at: None,
            shutdown: false,
        };
        let handle = ClientHandle {
            cmd_tx,
            conversation,
            status_rx,
        };
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!("connection controller started");
        while !self.shutdown {
            let event = {
                let cmd_rx = &mut self.cmd_rx;
                let stream = &mut self.stream;
                let capture_rx = &mut self.capture_rx;
                let reconnect_at = self.reconnect_at;
                let liveness_deadline = self.liveness_deadline;
                let audio_end_at = self.audio_end_at;
                tokio::select! {
                    cmd = cmd_rx.recv() => Event::Command(cmd),
                    frame = next_inbound(stream) => Event::Inbound(frame),
                    chunk = next_capture(capture_rx) => Event::CaptureFrame(chunk),
                    _ = sleep_until_opt(reconnect_at) => Event::ReconnectDue,
                    _ = sleep_until_opt(liveness_deadline) => Event::LivenessTimedOut,
                    _ = sleep_until_opt(audio_end_at) => Event::AudioEndDue,
                }
            };

            match event {
                Event::Command(Some(cmd)) => self.handle_command(cmd).await,
                Event::Command(None) => {
                    // Every handle is gone; shut down cleanly.
                    self.disconnect().await;
                    self.shutdown = true;
                }
                Event::Inbound(Some(Ok(frame))) => self.handle_inbound(frame).await,
                Event::Inbound(Some(Err(e))) => {
                    warn!(error = ?e, "channel error");
                    self.channel_lost().await;
                }
                Event::Inbound(None) => {
                    info!("channel closed by remote");
                    self.channel_lost().await;
                }
                Event::CaptureFrame(Some(chunk)) => self.forward_audio(chunk).await,
                Event::CaptureFrame(None) => self.capture_stream_ended().await,
                Event::ReconnectDue => {
                    self.reconnect_at = None;
                    self.try_connect().await;
                }
                Event::LivenessTimedOut => self.liveness_timeout().await,
                Event::AudioEndDue => self.finish_capture().await,
            }
        }
        info!("connection controller stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => {
                // A fresh connect re-enables reconnection after a previous
                // explicit disconnect.
                self.should_reconnect = true;
                self.delay_index = 0;
                self.reconnect_at = None;
                self.try_connect().await;
            }
            Command::Disconnect => self.disconnect().await,
            Command::StartCapture => self.start_capture().await,
            Command::StopCapture => self.stop_capture().await,
            Command::SendText(text) => self.send_text(text).await,
            Command::Cancel => self.cancel().await,
            Command::Foregrounded => self.foregrounded().await,
            Command::Backgrounded => self.backgrounded().await,
        }
    }

    // --- connection lifecycle ---

    async fn try_connect(&mut self) {
        if self.sink.is_some() {
            debug!("connect requested but a channel is already open");
            return;
        }
        if !self.should_reconnect {
            // A scheduled retry outlived an explicit disconnect.
            return;
        }

        let record = self.mirror.load(self.cfg.session_max_age);
        let resuming = record.is_some();
        let reconnecting = resuming || self.status() == ConversationStatus::Reconnecting;
        self.set_status(if reconnecting {
            ConversationStatus::Reconnecting
        } else {
            ConversationStatus::Connecting
        })
        .await;

        let url = match &record {
            Some(r) => format!("{}?session_id={}", self.cfg.server_url, r.session_id),
            None => self.cfg.server_url.clone(),
        };
        info!(resuming, "opening channel");

        match self.transport.connect(&url).await {
            Ok((sink, stream)) => {
                self.sink = Some(sink);
                self.stream = Some(stream);
                // Status advances when the server answers with `ready` or
                // `session_restored`.
            }
            Err(e) => {
                warn!(error = ?e, "channel establishment failed");
                self.set_error(format!("connection failed: {}", e)).await;
                if reconnecting {
                    self.schedule_retry();
                } else {
                    self.set_status(ConversationStatus::Disconnected).await;
                }
            }
        }
    }

    /// The channel is gone (remote close, read/write error, or a failed
    /// liveness probe). Persist first, then drop the halves; the drop is the
    /// forced close.
    async fn channel_lost(&mut self) {
        self.liveness_deadline = None;
        self.audio_end_at = None;
        self.reconnect_at = None;
        if self.capture_rx.take().is_some() {
            if let Err(e) = self.capture.end().await {
                warn!(error = ?e, "capture stop failed after channel loss");
            }
        }
        self.persist().await;
        self.sink = None;
        self.stream = None;
        if self.should_reconnect {
            self.set_status(ConversationStatus::Reconnecting).await;
            self.schedule_retry();
        } else {
            self.set_status(ConversationStatus::Disconnected).await;
        }
    }

    fn schedule_retry(&mut self) {
        let delay = RECONNECT_SCHEDULE[self.delay_index.min(RECONNECT_SCHEDULE.len() - 1)];
        if self.delay_index < RECONNECT_SCHEDULE.len() - 1 {
            self.delay_index += 1;
        }
        debug!(delay_secs = delay.as_secs(), "scheduling reconnect");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn disconnect(&mut self) {
        // Disconnect takes precedence over everything: clear the flag first
        // so a racing liveness timeout or scheduled retry becomes a no-op.
        self.should_reconnect = false;
        self.reconnect_at = None;
        self.liveness_deadline = None;
        self.audio_end_at = None;
        if self.capture_rx.take().is_some() {
            if let Err(e) = self.capture.end().await {
                warn!(error = ?e, "capture stop failed during disconnect");
            }
        }
        // Best-effort; a persist failure must not block the close.
        self.persist().await;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = ?e, "close handshake failed");
            }
        }
        self.stream = None;
        self.set_status(ConversationStatus::Disconnected).await;
        info!("disconnected");
    }

    // --- liveness monitor ---

    async fn foregrounded(&mut self) {
        if !self.should_reconnect {
            // Explicitly disconnected; foregrounding changes nothing.
            return;
        }
        if self.sink.is_none() {
            self.set_status(ConversationStatus::Reconnecting).await;
            self.try_connect().await;
            return;
        }
        // The channel claims to be open, but after a background suspension
        // it may be a zombie. Probe it and demand an answer.
        debug!("probing channel liveness");
        if self.send_frame(ClientFrame::Ping).await {
            self.liveness_deadline = Some(Instant::now() + self.cfg.liveness_timeout);
        }
        // On probe-send failure, send_frame already forced the reconnect path.
    }

    async fn backgrounded(&mut self) {
        self.persist().await;
        // A pending probe means nothing while suspended.
        self.liveness_deadline = None;
    }

    async fn liveness_timeout(&mut self) {
        self.liveness_deadline = None;
        if !self.should_reconnect {
            // A manual disconnect raced the timer; it wins.
            return;
        }
        warn!("liveness probe unanswered; forcing reconnect");
        self.channel_lost().await;
    }

    // --- capture ---

    async fn start_capture(&mut self) {
        if self.capture_rx.is_some() || self.audio_end_at.is_some() {
            debug!("capture already active; ignoring start");
            return;
        }
        let status = self.status();
        let allowed = match self.cfg.capture_policy {
            CapturePolicy::RequireReady => status == ConversationStatus::Ready,
            CapturePolicy::AllowWhileProcessing => matches!(
                status,
                ConversationStatus::Ready | ConversationStatus::Processing
            ),
        };
        if !allowed {
            self.set_error(format!("cannot record while {}", status)).await;
            return;
        }
        if self.sink.is_none() {
            self.set_error("cannot record: not connected".to_string()).await;
            return;
        }

        match self.capture.begin(&self.cfg.audio_format).await {
            Ok(rx) => {
                let started = self
                    .send_frame(ClientFrame::AudioStart {
                        format: self.cfg.audio_format.clone(),
                    })
                    .await;
                if started {
                    self.capture_rx = Some(rx);
                    self.set_status(ConversationStatus::Recording).await;
                    self.persist().await;
                } else {
                    // The channel died underneath us; send_frame already
                    // moved us to the reconnect path.
                    if let Err(e) = self.capture.end().await {
                        warn!(error = ?e, "capture stop failed after send failure");
                    }
                }
            }
            Err(e) => {
                warn!(error = ?e, "capture device failed to start");
                self.set_error(format!("capture failed: {}", e)).await;
            }
        }
    }

    async fn stop_capture(&mut self) {
        if self.capture_rx.is_none() {
            debug!("stop requested but capture is not active");
            return;
        }
        // Back to ready immediately; the remote keeps delivering results
        // asynchronously and new input is allowed right away.
        self.set_status(ConversationStatus::Ready).await;
        if let Err(e) = self.capture.end().await {
            warn!(error = ?e, "capture flush failed");
            self.set_error(format!("capture failed: {}", e)).await;
            self.capture_rx = None;
            let _ = self.send_frame(ClientFrame::AudioEnd).await;
            self.persist().await;
            return;
        }
        // Let the final frames drain before closing the utterance.
        self.audio_end_at = Some(Instant::now() + AUDIO_END_GRACE);
        self.persist().await;
    }

    /// Closes out the utterance once the grace period elapses.
    async fn finish_capture(&mut self) {
        self.audio_end_at = None;
        self.capture_rx = None;
        let _ = self.send_frame(ClientFrame::AudioEnd).await;
    }

    async fn capture_stream_ended(&mut self) {
        if self.audio_end_at.is_some() {
            // The flush finished ahead of the grace deadline.
            self.finish_capture().await;
        } else {
            // The device quit without a stop: surface it and force-reset.
            warn!("capture stream ended unexpectedly");
            self.set_error("capture device stopped unexpectedly".to_string())
                .await;
            self.capture_rx = None;
            let _ = self.send_frame(ClientFrame::AudioEnd).await;
            if self.status() == ConversationStatus::Recording {
                self.set_status(ConversationStatus::Ready).await;
            }
        }
    }

    async fn forward_audio(&mut self, chunk: Bytes) {
        let result = match self.sink.as_mut() {
            Some(sink) => sink.send(WireFrame::Binary(chunk)).await,
            None => {
                debug!("dropping audio frame: channel not open");
                return;
            }
        };
        if let Err(e) = result {
            warn!(error = ?e, "audio send failed; treating channel as lost");
            self.channel_lost().await;
        }
    }

    // --- user messages ---

    async fn send_text(&mut self, text: String) {
        if self.sink.is_none() {
            self.set_error("cannot send: not connected".to_string()).await;
            return;
        }
        // Multiple outstanding requests are allowed; the response arrives
        // asynchronously and status stays as-is.
        let _ = self.send_frame(ClientFrame::Text { text }).await;
    }

    async fn cancel(&mut self) {
        if self.status() == ConversationStatus::Disconnected {
            return;
        }
        if self.sink.is_some() {
            let _ = self.send_frame(ClientFrame::Cancel).await;
        }
        if self.capture_rx.take().is_some() {
            self.audio_end_at = None;
            if let Err(e) = self.capture.end().await {
                warn!(error = ?e, "capture stop failed during cancel");
            }
        }
        self.conversation.lock().await.clear_exchange();
        // Cancel never waits on the server. If the channel was found dead
        // while sending, the reconnect path has already claimed the status.
        if !matches!(
            self.status(),
            ConversationStatus::Reconnecting | ConversationStatus::Disconnected
        ) {
            self.set_status(ConversationStatus::Ready).await;
        }
        self.persist().await;
    }

    // --- inbound frames ---

    async fn handle_inbound(&mut self, frame: WireFrame) {
        let text = match frame {
            WireFrame::Text(text) => text,
            WireFrame::Binary(_) => {
                debug!("ignoring unexpected binary frame from server");
                return;
            }
        };
        let frame: ServerFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                // Malformed frames are dropped without touching state.
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        let outcome = {
            let mut conv = self.conversation.lock().await;
            route(frame, &mut conv)
        };
        match outcome {
            RouteOutcome::LivenessAck => {
                debug!("liveness ack received");
                self.liveness_deadline = None;
            }
            RouteOutcome::SessionOpened => {
                self.delay_index = 0;
                self.reconnect_at = None;
                self.publish_status().await;
                self.flush_playback().await;
                self.persist().await;
                let conv = self.conversation.lock().await;
                info!(session_id = ?conv.session_id, status = %conv.status, "session established");
            }
            RouteOutcome::StateChanged => {
                self.publish_status().await;
                self.flush_playback().await;
                self.persist().await;
            }
            RouteOutcome::Ignored => {}
        }
    }

    // --- shared plumbing ---

    async fn send_frame(&mut self, frame: ClientFrame) -> bool {
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = ?e, "failed to serialize control frame");
                return false;
            }
        };
        let result = match self.sink.as_mut() {
            Some(sink) => sink.send(WireFrame::Text(payload)).await,
            None => {
                self.set_error("not connected".to_string()).await;
                return false;
            }
        };
        if let Err(e) = result {
            warn!(error = ?e, "send failed; treating channel as lost");
            self.channel_lost().await;
            return false;
        }
        true
    }

    fn status(&self) -> ConversationStatus {
        *self.status_tx.borrow()
    }

    async fn set_status(&mut self, status: ConversationStatus) {
        self.conversation.lock().await.status = status;
        self.status_tx.send_if_modified(|s| {
            if *s != status {
                *s = status;
                true
            } else {
                false
            }
        });
        debug!(%status, "status");
    }

    /// Mirrors a router-driven status change into the watch channel.
    async fn publish_status(&mut self) {
        let status = self.conversation.lock().await.status;
        self.status_tx.send_if_modified(|s| {
            if *s != status {
                *s = status;
                true
            } else {
                false
            }
        });
    }

    /// Drains the pending-audio sequence into the playback collaborator,
    /// in arrival order, each entry exactly once. Draining on handoff keeps
    /// the sequence bounded over a long-lived conversation.
    async fn flush_playback(&mut self) {
        let urls = {
            let mut conv = self.conversation.lock().await;
            std::mem::take(&mut conv.pending_audio)
        };
        for url in urls {
            self.playback.enqueue(&url).await;
        }
    }

    /// Best-effort snapshot of the conversation into the session mirror.
    /// No-op until the server has assigned a session id.
    async fn persist(&mut self) {
        let record = {
            let conv = self.conversation.lock().await;
            let Some(session_id) = conv.session_id.clone() else {
                return;
            };
            SessionRecord {
                session_id,
                // Restamped by the mirror at save time.
                last_activity_at: chrono::Utc::now(),
                coarse_state: match conv.status {
                    ConversationStatus::Recording => CoarseState::Recording,
                    ConversationStatus::Processing => CoarseState::Processing,
                    _ => CoarseState::Idle,
                },
                partial_transcript: conv.partial_transcript.clone(),
                partial_response: if conv.response_complete {
                    None
                } else {
                    conv.response_text.clone()
                },
                pending_audio_urls: conv.pending_audio.clone(),
            }
        };
        self.mirror.save(&record);
    }

    async fn set_error(&mut self, message: String) {
        warn!(%message, "surfacing error");
        self.conversation.lock().await.error = Some(message);
    }
}

async fn next_inbound(
    stream: &mut Option<Box<dyn FrameStream>>,
) -> Option<anyhow::Result<WireFrame>> {
    match stream {
        Some(stream) => stream.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn next_capture(rx: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
