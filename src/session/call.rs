//! Per-call session: the state machine that bridges one telephony media
//! stream to one supervised backend link.
//!
//! Each call runs as a single tokio task that owns all mutable session
//! state. The telephony socket and the backend link reach it through
//! channels, so the two receive paths never touch shared state directly;
//! the select loop below is the one place `turn_state`, the pending buffer,
//! and the lifecycle state change.
//!
//! Lifecycle: `Connecting → Active → {Reconnecting → Active | Draining} →
//! Closed`. Transient backend loss is absorbed by buffering caller audio
//! and redialing with bounded backoff; telephony loss (the caller hung up)
//! is terminal.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::backend::connector::{BackendDialer, BackendLink};
use crate::backend::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::backend::protocol::{BackendEvent, ClientMessage};
use crate::backend::supervisor::ReconnectSupervisor;
use crate::codec;
use crate::config::schema::{BridgeConfig, DrainPolicy};
use crate::errors::RegistryError;
use crate::session::buffer::PendingBuffer;
use crate::session::intent;
use crate::session::observer::{CallObserver, FinalState, Role};
use crate::session::registry::{SessionHandle, SessionRegistry, SessionStats};
use crate::telephony::protocol::{InboundFrame, OutboundFrame};

/// Inbound frames queued toward a session before the socket pump backs off.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Name attached to playback-tracking marks.
const MARK_NAME: &str = "responsePart";

/// 20 ms of 8 kHz mu-law, the chunk size used when streaming a fallback
/// announcement.
const ANNOUNCE_CHUNK_BYTES: usize = 160;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle state of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Reconnecting,
    Draining,
    Closed,
}

/// Whose audio currently owns the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AgentSpeaking,
    UserSpeaking,
    Idle,
}

/// How a relay step left the session.
enum Flow {
    Continue,
    /// The caller hung up (telephony `stop` or socket gone).
    HungUp,
    /// The backend link is unusable; reconnect.
    LinkLost,
    /// The backend ended the conversation (e.g. its session expired).
    BackendEnded,
}

/// Outcome of trying to obtain a backend link.
enum Obtained {
    Link(BackendLink),
    HungUp,
    Failed,
    Expired,
}

/// Why the active relay loop returned.
enum ActiveEnd {
    LinkLost,
    HungUp,
    BackendEnded,
    Expired,
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// State machine for one phone call.
pub struct CallSession {
    call_id: String,
    stream_sid: String,
    config: BridgeConfig,
    telephony_rx: mpsc::Receiver<InboundFrame>,
    telephony_tx: mpsc::Sender<OutboundFrame>,
    dialer: Arc<dyn BackendDialer>,
    supervisor: ReconnectSupervisor,
    observer: Arc<dyn CallObserver>,
    registry: Arc<SessionRegistry>,
    state_tx: watch::Sender<SessionState>,
    stats: Arc<SessionStats>,

    turn_state: TurnState,
    pending: PendingBuffer,
    /// Outstanding playback marks; non-zero means agent audio is in flight.
    mark_queue: usize,
    started_at: Instant,
    last_activity: Instant,
    /// Stream clock of the most recent caller media frame.
    latest_media_ts: u64,
    /// Stream clock when the current agent utterance began playing.
    response_start_ts: Option<u64>,
    last_assistant_item: Option<String>,
    /// Barge-in signals before this instant are ignored.
    guard_until: Instant,
}

impl CallSession {
    /// Register and start a session for a newly started media stream.
    ///
    /// Fails without side effects if the call id is already registered.
    /// The returned handle routes inbound frames and answers status
    /// queries; the session unregisters itself when it closes.
    pub fn spawn(
        config: BridgeConfig,
        call_id: &str,
        stream_sid: &str,
        telephony_tx: mpsc::Sender<OutboundFrame>,
        dialer: Arc<dyn BackendDialer>,
        observer: Arc<dyn CallObserver>,
        registry: Arc<SessionRegistry>,
    ) -> Result<SessionHandle, RegistryError> {
        let (frames_tx, telephony_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let stats = Arc::new(SessionStats::default());

        let handle = SessionHandle {
            frames: frames_tx,
            state: state_rx,
            stats: stats.clone(),
            started_at: chrono::Local::now(),
        };
        registry.register(call_id, handle.clone())?;

        let now = Instant::now();
        let session = CallSession {
            call_id: call_id.to_string(),
            stream_sid: stream_sid.to_string(),
            supervisor: ReconnectSupervisor::new(config.reconnect.clone()),
            pending: PendingBuffer::new(config.session.outbound_buffer_frames),
            guard_until: now + Duration::from_millis(config.session.interruption_guard_ms),
            config,
            telephony_rx,
            telephony_tx,
            dialer,
            observer,
            registry,
            state_tx,
            stats,
            turn_state: TurnState::Idle,
            mark_queue: 0,
            started_at: now,
            last_activity: now,
            latest_media_ts: 0,
            response_start_ts: None,
            last_assistant_item: None,
        };

        tokio::spawn(session.run());
        Ok(handle)
    }

    async fn run(mut self) {
        info!(
            "Call {} started (stream {})",
            self.call_id, self.stream_sid
        );
        self.observer.on_call_started(&self.call_id).await;

        let deadline =
            self.started_at + Duration::from_secs(self.config.session.max_call_duration_s);
        let final_state = self.drive(deadline).await;
        self.finish(final_state).await;
    }

    /// The lifecycle loop: obtain a link, relay until it is lost, repeat.
    async fn drive(&mut self, deadline: Instant) -> FinalState {
        let mut first = true;
        loop {
            self.set_state(if first {
                SessionState::Connecting
            } else {
                SessionState::Reconnecting
            });

            let link = match self.obtain_link(deadline).await {
                Obtained::Link(link) => link,
                Obtained::HungUp => return FinalState::Completed,
                Obtained::Failed => {
                    self.drain_backend_failed().await;
                    return FinalState::BackendFailed;
                }
                Obtained::Expired => {
                    self.set_state(SessionState::Draining);
                    return FinalState::TimedOut;
                }
            };
            first = false;

            match self.active(link, deadline).await {
                ActiveEnd::LinkLost => continue,
                ActiveEnd::HungUp => return FinalState::Completed,
                ActiveEnd::BackendEnded => return FinalState::Completed,
                ActiveEnd::Expired => {
                    self.set_state(SessionState::Draining);
                    return FinalState::TimedOut;
                }
            }
        }
    }

    /// Dial the backend (with backoff) while continuing to service the
    /// telephony side: caller audio keeps buffering, and a hang-up cancels
    /// the dial immediately.
    async fn obtain_link(&mut self, deadline: Instant) -> Obtained {
        let supervisor = self.supervisor.clone();
        let dialer = self.dialer.clone();
        let stats = self.stats.clone();
        let mut acquire = Box::pin(async move {
            supervisor
                .acquire(dialer.as_ref(), |attempt| {
                    stats.retry_count.store(attempt, Ordering::SeqCst);
                })
                .await
        });

        loop {
            tokio::select! {
                result = &mut acquire => {
                    return match result {
                        Ok(link) => Obtained::Link(link),
                        Err(e) => {
                            warn!("Call {}: backend unavailable: {}", self.call_id, e);
                            Obtained::Failed
                        }
                    };
                }
                maybe = self.telephony_rx.recv() => {
                    match maybe {
                        Some(frame) => {
                            if self.absorb_offline_frame(frame) {
                                return Obtained::HungUp;
                            }
                        }
                        None => return Obtained::HungUp,
                    }
                }
                _ = sleep_until(deadline) => return Obtained::Expired,
            }
        }
    }

    /// Handle a telephony frame while no backend link exists.
    ///
    /// Returns `true` if the caller hung up.
    fn absorb_offline_frame(&mut self, frame: InboundFrame) -> bool {
        match frame {
            InboundFrame::Media { media } => {
                self.latest_media_ts = media.timestamp_ms();
                self.last_activity = Instant::now();
                match codec::decode_payload(&media.payload) {
                    Ok(chunk) => self.buffer_chunk(chunk),
                    Err(e) => warn!(
                        "Call {}: dropping malformed media payload: {}",
                        self.call_id, e
                    ),
                }
                false
            }
            InboundFrame::Mark { .. } => {
                self.mark_queue = self.mark_queue.saturating_sub(1);
                false
            }
            InboundFrame::Stop => {
                info!("Call {}: caller hung up during reconnect", self.call_id);
                true
            }
            InboundFrame::Start { .. } | InboundFrame::Connected => {
                debug!("Call {}: ignoring unexpected stream event", self.call_id);
                false
            }
        }
    }

    fn buffer_chunk(&mut self, chunk: Vec<u8>) {
        if self.pending.push(chunk).is_some() {
            self.stats
                .frames_dropped
                .store(self.pending.dropped(), Ordering::SeqCst);
            debug!(
                "Call {}: outbound buffer full, dropped oldest frame",
                self.call_id
            );
        }
    }

    /// Relay frames in both directions until the link dies or the call ends.
    async fn active(&mut self, mut link: BackendLink, deadline: Instant) -> ActiveEnd {
        // Frames buffered during the gap go out first, in arrival order.
        // A failure mid-flush keeps the remaining frames (and the one that
        // failed) for the next link.
        while let Some(chunk) = self.pending.pop() {
            if let Err(e) = link.send(codec::encode_audio(&chunk)).await {
                warn!(
                    "Call {}: flush failed ({}), backend link lost again",
                    self.call_id, e
                );
                self.pending.push_front(chunk);
                link.close();
                return ActiveEnd::LinkLost;
            }
        }

        self.set_state(SessionState::Active);
        self.stats.retry_count.store(0, Ordering::SeqCst);
        let mut heartbeat = HeartbeatMonitor::new(&self.config.heartbeat, Instant::now());

        enum Step {
            Inbound(Option<InboundFrame>),
            Backend(Option<BackendEvent>),
            HeartbeatTick,
            Deadline,
        }

        loop {
            let hb_wakeup = heartbeat.next_wakeup().unwrap_or(deadline);

            let step = tokio::select! {
                maybe = self.telephony_rx.recv() => Step::Inbound(maybe),
                maybe = link.recv() => Step::Backend(maybe),
                _ = sleep_until(hb_wakeup) => Step::HeartbeatTick,
                _ = sleep_until(deadline) => Step::Deadline,
            };

            let flow = match step {
                Step::Inbound(Some(frame)) => self.relay_inbound(frame, &link).await,
                Step::Inbound(None) => Flow::HungUp,
                Step::Backend(Some(event)) => {
                    self.handle_backend_event(event, &link, &mut heartbeat).await
                }
                Step::Backend(None) => Flow::LinkLost,
                Step::HeartbeatTick => match heartbeat.on_tick(Instant::now()) {
                    Some(HeartbeatAction::SendProbe) => {
                        match link.send(ClientMessage::Probe).await {
                            Ok(()) => Flow::Continue,
                            Err(e) => {
                                warn!("Call {}: probe send failed: {}", self.call_id, e);
                                Flow::LinkLost
                            }
                        }
                    }
                    Some(HeartbeatAction::Dead) => {
                        warn!(
                            "Call {}: heartbeat deadline missed, link presumed dead",
                            self.call_id
                        );
                        Flow::LinkLost
                    }
                    None => Flow::Continue,
                },
                Step::Deadline => {
                    info!("Call {}: max call duration reached", self.call_id);
                    link.close();
                    return ActiveEnd::Expired;
                }
            };

            match flow {
                Flow::Continue => {}
                Flow::HungUp => {
                    link.close();
                    return ActiveEnd::HungUp;
                }
                Flow::LinkLost => {
                    link.close();
                    return ActiveEnd::LinkLost;
                }
                Flow::BackendEnded => {
                    link.close();
                    return ActiveEnd::BackendEnded;
                }
            }
        }
    }

    /// Forward one telephony frame while the link is up.
    async fn relay_inbound(&mut self, frame: InboundFrame, link: &BackendLink) -> Flow {
        match frame {
            InboundFrame::Media { media } => {
                self.latest_media_ts = media.timestamp_ms();
                self.last_activity = Instant::now();
                match codec::decode_payload(&media.payload) {
                    Ok(chunk) => {
                        if let Err(e) = link.send(codec::encode_audio(&chunk)).await {
                            warn!(
                                "Call {}: backend send failed ({}), buffering",
                                self.call_id, e
                            );
                            self.buffer_chunk(chunk);
                            return Flow::LinkLost;
                        }
                    }
                    Err(e) => warn!(
                        "Call {}: dropping malformed media payload: {}",
                        self.call_id, e
                    ),
                }
                Flow::Continue
            }
            InboundFrame::Mark { .. } => {
                self.mark_queue = self.mark_queue.saturating_sub(1);
                Flow::Continue
            }
            InboundFrame::Stop => {
                info!("Call {}: stream stopped", self.call_id);
                Flow::HungUp
            }
            InboundFrame::Start { .. } | InboundFrame::Connected => {
                debug!("Call {}: ignoring unexpected stream event", self.call_id);
                Flow::Continue
            }
        }
    }

    /// React to one backend event.
    async fn handle_backend_event(
        &mut self,
        event: BackendEvent,
        link: &BackendLink,
        heartbeat: &mut HeartbeatMonitor,
    ) -> Flow {
        match event {
            BackendEvent::AudioDelta { audio, item_id } => {
                if item_id.is_some() && item_id != self.last_assistant_item {
                    self.response_start_ts = Some(self.latest_media_ts);
                    self.last_assistant_item = item_id;
                }
                self.turn_state = TurnState::AgentSpeaking;

                let payload = codec::encode_payload(&audio);
                if self
                    .telephony_tx
                    .send(OutboundFrame::media(&self.stream_sid, payload))
                    .await
                    .is_err()
                {
                    return Flow::HungUp;
                }
                if self
                    .telephony_tx
                    .send(OutboundFrame::mark(&self.stream_sid, MARK_NAME))
                    .await
                    .is_err()
                {
                    return Flow::HungUp;
                }
                self.mark_queue += 1;
                Flow::Continue
            }
            BackendEvent::UserTranscript { text } => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    self.stats.user_turns.fetch_add(1, Ordering::SeqCst);
                    self.observer
                        .on_transcript_turn(&self.call_id, Role::User, &text)
                        .await;
                    if intent::appointment_candidate(&text) {
                        self.observer
                            .on_appointment_candidate(&self.call_id, &text)
                            .await;
                    }
                }
                Flow::Continue
            }
            BackendEvent::AgentTranscript { text } => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    self.stats.agent_turns.fetch_add(1, Ordering::SeqCst);
                    self.observer
                        .on_transcript_turn(&self.call_id, Role::Agent, &text)
                        .await;
                }
                Flow::Continue
            }
            BackendEvent::SpeechStarted => self.handle_interruption(link).await,
            BackendEvent::SpeechStopped => {
                if self.turn_state == TurnState::UserSpeaking {
                    self.turn_state = TurnState::Idle;
                }
                Flow::Continue
            }
            BackendEvent::ResponseDone => {
                self.turn_state = TurnState::Idle;
                Flow::Continue
            }
            BackendEvent::Keepalive => {
                heartbeat.ack();
                Flow::Continue
            }
            BackendEvent::SessionCreated => {
                debug!("Call {}: backend session created", self.call_id);
                Flow::Continue
            }
            BackendEvent::Error { code, message } => {
                warn!("Call {}: backend error {}: {}", self.call_id, code, message);
                match code.as_str() {
                    // The backend is done with this conversation; end the
                    // call cleanly rather than reconnecting into a void.
                    "session_expired" => Flow::BackendEnded,
                    _ => Flow::Continue,
                }
            }
            BackendEvent::Other(tag) => {
                debug!("Call {}: ignoring backend event {}", self.call_id, tag);
                Flow::Continue
            }
        }
    }

    /// Caller speech while the agent is talking: cut the utterance short on
    /// the backend and flush unplayed audio on the telephony side, once.
    async fn handle_interruption(&mut self, link: &BackendLink) -> Flow {
        let now = Instant::now();
        if now < self.guard_until {
            debug!(
                "Call {}: ignoring barge-in inside the guard window",
                self.call_id
            );
            return Flow::Continue;
        }

        if self.turn_state == TurnState::AgentSpeaking && self.mark_queue > 0 {
            if let (Some(start), Some(item_id)) =
                (self.response_start_ts, self.last_assistant_item.clone())
            {
                let audio_end_ms = self.latest_media_ts.saturating_sub(start);
                if link
                    .send(ClientMessage::Truncate {
                        item_id,
                        audio_end_ms,
                    })
                    .await
                    .is_err()
                {
                    return Flow::LinkLost;
                }
            }
            if self
                .telephony_tx
                .send(OutboundFrame::clear(&self.stream_sid))
                .await
                .is_err()
            {
                return Flow::HungUp;
            }
            self.mark_queue = 0;
            self.response_start_ts = None;
            self.last_assistant_item = None;
            debug!("Call {}: barge-in, cleared agent audio", self.call_id);
        }

        self.turn_state = TurnState::UserSpeaking;
        Flow::Continue
    }

    /// Retries exhausted: notify collaborators and run the drain policy so
    /// the caller never sits in dead air.
    async fn drain_backend_failed(&mut self) {
        self.set_state(SessionState::Draining);
        self.observer.on_backend_unavailable(&self.call_id).await;

        if let DrainPolicy::Announce { audio_file } = self.config.session.drain.clone() {
            match tokio::fs::read(&audio_file).await {
                Ok(audio) => {
                    info!(
                        "Call {}: playing fallback announcement ({} bytes)",
                        self.call_id,
                        audio.len()
                    );
                    for chunk in audio.chunks(ANNOUNCE_CHUNK_BYTES) {
                        let payload = codec::encode_payload(chunk);
                        if self
                            .telephony_tx
                            .send(OutboundFrame::media(&self.stream_sid, payload))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        // Pace at real time so the provider does not clip it.
                        sleep(Duration::from_millis(20)).await;
                    }
                }
                Err(e) => warn!(
                    "Call {}: cannot read fallback announcement {}: {}",
                    self.call_id,
                    audio_file.display(),
                    e
                ),
            }
        }
    }

    /// Release everything and report the final accounting. The registry
    /// entry is removed here and only here.
    async fn finish(mut self, final_state: FinalState) {
        self.set_state(SessionState::Closed);
        self.registry.unregister(&self.call_id);

        let duration = self.started_at.elapsed().as_secs();
        info!(
            "Call {} closed after {}s ({:?}, {} user / {} agent turns, {} frames dropped)",
            self.call_id,
            duration,
            final_state,
            self.stats.user_turns.load(Ordering::SeqCst),
            self.stats.agent_turns.load(Ordering::SeqCst),
            self.stats.frames_dropped.load(Ordering::SeqCst),
        );
        debug!(
            "Call {}: last caller activity {}s before close",
            self.call_id,
            self.last_activity.elapsed().as_secs()
        );
        self.observer
            .on_call_ended(&self.call_id, duration, final_state)
            .await;
    }

    fn set_state(&mut self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }
}
