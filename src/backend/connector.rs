//! Backend connector: one outbound streaming connection to the voice-AI
//! backend.
//!
//! [`BackendLink`] is the session-facing handle: bounded sends, an ordered
//! typed event stream, and an idempotent close. The link itself is
//! channel-backed and transport-agnostic: the WebSocket transport feeds it
//! from a pair of reader/writer tasks, and tests feed it directly from
//! in-memory channels.
//!
//! [`WsDialer`] establishes real connections: it resolves the configured
//! credential (static bearer key, or an HTTP call that mints a short-lived
//! signed URL), performs the handshake with a connect timeout, then sends
//! the session-setup and initial response-trigger messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::backend::protocol::{BackendEvent, ClientMessage};
use crate::codec;
use crate::config::schema::{BackendConfig, CredentialConfig};
use crate::errors::{ConnectError, SendError};

/// How many messages may queue toward the transport before sends push back.
const LINK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Dialer trait
// ---------------------------------------------------------------------------

/// Establishes backend links. The seam between the session's supervision
/// logic and the actual transport, so reconnect behavior is testable with
/// scripted links.
#[async_trait]
pub trait BackendDialer: Send + Sync {
    async fn dial(&self) -> Result<BackendLink, ConnectError>;
}

// ---------------------------------------------------------------------------
// BackendLink
// ---------------------------------------------------------------------------

/// One live duplex connection to the backend.
///
/// Owned exclusively by a call session; replaced wholesale on reconnect,
/// never shared or duplicated.
pub struct BackendLink {
    out_tx: mpsc::Sender<ClientMessage>,
    events_rx: mpsc::Receiver<BackendEvent>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
    send_timeout: Duration,
}

impl BackendLink {
    /// Build a link from raw channel halves.
    ///
    /// The transport (or a test) owns the other ends: it consumes
    /// `ClientMessage`s from the paired receiver and produces
    /// `BackendEvent`s into the paired sender.
    pub fn from_channels(
        out_tx: mpsc::Sender<ClientMessage>,
        events_rx: mpsc::Receiver<BackendEvent>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            out_tx,
            events_rx,
            closed: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
            send_timeout,
        }
    }

    /// Notify handle a transport task can select on to observe `close()`.
    pub fn close_signal(&self) -> Arc<Notify> {
        self.close_signal.clone()
    }

    /// Send one message, waiting at most the configured send timeout.
    pub async fn send(&self, msg: ClientMessage) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::ConnectionClosed);
        }
        match timeout(self.send_timeout, self.out_tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(SendError::ConnectionClosed)
            }
            Err(_) => Err(SendError::Timeout(self.send_timeout.as_millis() as u64)),
        }
    }

    /// Receive the next event, in the order the backend produced them.
    ///
    /// Returns `None` once the link is gone (remote close, transport error,
    /// or local `close()`), after which the session replaces the link.
    pub async fn recv(&mut self) -> Option<BackendEvent> {
        match self.events_rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.closed.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    /// Close the link. Idempotent; the transport tears down on the first
    /// call and later calls are no-ops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// WebSocket dialer
// ---------------------------------------------------------------------------

/// Dials the backend over a WebSocket per [`BackendConfig`].
pub struct WsDialer {
    config: BackendConfig,
}

impl WsDialer {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Resolve the connection URL and optional bearer key for this dial.
    async fn resolve_credential(&self) -> Result<(String, Option<String>), ConnectError> {
        match &self.config.credential {
            CredentialConfig::ApiKey { key } => {
                Ok((self.config.url.clone(), Some(key.clone())))
            }
            CredentialConfig::SignedUrl { endpoint, api_key } => {
                let client = reqwest::Client::new();
                let mut request = client
                    .get(endpoint)
                    .timeout(Duration::from_secs(self.config.connect_timeout_s));
                if let Some(key) = api_key {
                    request = request.header(AUTHORIZATION, format!("Bearer {}", key));
                }

                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() {
                        ConnectError::Timeout(self.config.connect_timeout_s)
                    } else {
                        ConnectError::NetworkUnreachable(e.to_string())
                    }
                })?;

                let status = response.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(ConnectError::AuthFailed(format!(
                        "signed-URL endpoint returned {}",
                        status
                    )));
                }
                if !status.is_success() {
                    return Err(ConnectError::NetworkUnreachable(format!(
                        "signed-URL endpoint returned {}",
                        status
                    )));
                }

                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| ConnectError::NetworkUnreachable(e.to_string()))?;
                let url = body
                    .get("url")
                    .or_else(|| body.get("signedUrl"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ConnectError::NetworkUnreachable(
                            "signed-URL response missing `url`".into(),
                        )
                    })?;

                // The minted URL embeds its own authentication.
                Ok((url.to_string(), None))
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ConnectError> {
    HeaderValue::from_str(value)
        .map_err(|e| ConnectError::AuthFailed(format!("invalid header value: {}", e)))
}

fn classify_ws_error(e: tokio_tungstenite::tungstenite::Error) -> ConnectError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                ConnectError::AuthFailed(format!("handshake rejected: {}", status))
            } else {
                ConnectError::NetworkUnreachable(format!("handshake failed: {}", status))
            }
        }
        other => ConnectError::NetworkUnreachable(other.to_string()),
    }
}

#[async_trait]
impl BackendDialer for WsDialer {
    async fn dial(&self) -> Result<BackendLink, ConnectError> {
        let (url, bearer) = self.resolve_credential().await?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::NetworkUnreachable(e.to_string()))?;
        {
            let headers = request.headers_mut();
            if let Some(key) = bearer {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", key))?);
            }
            for (name, value) in &self.config.extra_headers {
                let name: HeaderName = name.parse().map_err(|_| {
                    ConnectError::NetworkUnreachable(format!("invalid header name `{}`", name))
                })?;
                headers.insert(name, header_value(value)?);
            }
        }

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_s);
        let (ws_stream, _response) = timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConnectError::Timeout(self.config.connect_timeout_s))?
            .map_err(classify_ws_error)?;

        debug!("Backend WebSocket connected");

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(LINK_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<BackendEvent>(LINK_CHANNEL_CAPACITY);

        let link = BackendLink::from_channels(
            out_tx,
            events_rx,
            Duration::from_millis(self.config.send_timeout_ms),
        );
        let close_signal = link.close_signal();

        // Writer: messages from the session toward the socket. Probes ride
        // as transport pings; everything else serializes to a text frame.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = out_rx.recv() => match maybe {
                        Some(msg) => {
                            let ws_msg = match msg {
                                ClientMessage::Probe => WsMessage::Ping(Vec::new()),
                                other => match other.to_json() {
                                    Some(text) => WsMessage::Text(text),
                                    None => continue,
                                },
                            };
                            if let Err(e) = ws_sink.send(ws_msg).await {
                                debug!("Backend write failed: {}", e);
                                break;
                            }
                        }
                        None => {
                            let _ = ws_sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                    },
                    _ = close_signal.notified() => {
                        let _ = ws_sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Reader: socket frames decoded into typed events. Malformed frames
        // are logged and dropped; they never end the link.
        tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(WsMessage::Text(text)) => match codec::decode_event(&text) {
                        Ok(event) => {
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Dropping malformed backend frame: {}", e);
                        }
                    },
                    Ok(WsMessage::Pong(_)) => {
                        if events_tx.send(BackendEvent::Keepalive).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        debug!("Backend closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("Backend read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // events_tx drops here; the session sees `None` and reconnects.
        });

        // Configure the agent and trigger the greeting before handing the
        // link to the session.
        link.send(ClientMessage::session_setup(&self.config))
            .await
            .map_err(|e| ConnectError::NetworkUnreachable(e.to_string()))?;
        link.send(ClientMessage::ResponseCreate)
            .await
            .map_err(|e| ConnectError::NetworkUnreachable(e.to_string()))?;

        Ok(link)
    }
}
