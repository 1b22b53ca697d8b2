//! WebSocket server for the telephony media-stream endpoint.
//!
//! The telephony provider opens one WebSocket per call and streams JSON
//! envelopes over it. Each connection waits for its `start` frame, spawns a
//! [`CallSession`], then pumps frames between the socket and the session's
//! channels. The registry routes status queries while the call is live.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::backend::connector::{BackendDialer, WsDialer};
use crate::config::schema::BridgeConfig;
use crate::session::call::CallSession;
use crate::session::observer::CallObserver;
use crate::session::registry::SessionRegistry;
use crate::telephony::protocol::{InboundFrame, OutboundFrame};

/// Outbound frames queued toward a socket before the session backs off.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Media-stream WebSocket server.
pub struct BridgeServer {
    config: BridgeConfig,
    registry: Arc<SessionRegistry>,
    observer: Arc<dyn CallObserver>,
    dialer: Arc<dyn BackendDialer>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl BridgeServer {
    /// Create a server that dials the configured backend over WebSocket.
    pub fn new(config: BridgeConfig, observer: Arc<dyn CallObserver>) -> Self {
        let dialer: Arc<dyn BackendDialer> = Arc::new(WsDialer::new(config.backend.clone()));
        Self::with_dialer(config, observer, dialer)
    }

    /// Create a server with a custom dialer (embedding and tests).
    pub fn with_dialer(
        config: BridgeConfig,
        observer: Arc<dyn CallObserver>,
        dialer: Arc<dyn BackendDialer>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            observer,
            dialer,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// The registry of active calls, for status queries.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Bind the listener and start accepting media streams.
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .context("Invalid listen address")?;

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!("Media-stream server listening on ws://{}", addr);

        let shutdown = self.shutdown.clone();
        let config = self.config.clone();
        let registry = self.registry.clone();
        let observer = self.observer.clone();
        let dialer = self.dialer.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer_addr)) => {
                                debug!("Media stream connected from {}", peer_addr);
                                let config = config.clone();
                                let registry = registry.clone();
                                let observer = observer.clone();
                                let dialer = dialer.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(
                                        stream, config, registry, observer, dialer,
                                    )
                                    .await
                                    {
                                        error!("Media stream error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        info!("Media-stream server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop accepting new streams. Active calls keep running until they end.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// The server's listen address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Handle one media-stream connection: handshake, wait for `start`, then
/// pump frames until either side ends the call.
async fn handle_connection(
    stream: TcpStream,
    config: BridgeConfig,
    registry: Arc<SessionRegistry>,
    observer: Arc<dyn CallObserver>,
    dialer: Arc<dyn BackendDialer>,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let mut ws_sender = Some(ws_sender);
    let mut session_tx: Option<mpsc::Sender<InboundFrame>> = None;

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(InboundFrame::Connected) => {
                    debug!("Media stream handshake preamble");
                }
                Ok(InboundFrame::Start { start }) => {
                    if session_tx.is_some() {
                        warn!("Ignoring repeated start frame on one stream");
                        continue;
                    }
                    let Some(mut sender) = ws_sender.take() else {
                        continue;
                    };

                    let call_id = match start.call_id() {
                        Some(id) => id.to_string(),
                        None => {
                            warn!("Start frame without call id, synthesizing one");
                            format!("call-{}", uuid::Uuid::new_v4())
                        }
                    };
                    info!("Stream started: {} (call {})", start.stream_sid, call_id);

                    let (out_tx, mut out_rx) =
                        mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);

                    match CallSession::spawn(
                        config.clone(),
                        &call_id,
                        &start.stream_sid,
                        out_tx,
                        dialer.clone(),
                        observer.clone(),
                        registry.clone(),
                    ) {
                        Ok(handle) => {
                            session_tx = Some(handle.frames.clone());
                            // Session -> socket pump. Ends when the session
                            // drops its sender, which closes the stream.
                            tokio::spawn(async move {
                                while let Some(frame) = out_rx.recv().await {
                                    match serde_json::to_string(&frame) {
                                        Ok(text) => {
                                            if sender.send(Message::Text(text)).await.is_err() {
                                                break;
                                            }
                                        }
                                        Err(e) => {
                                            warn!("Failed to serialize outbound frame: {}", e);
                                        }
                                    }
                                }
                                let _ = sender.send(Message::Close(None)).await;
                            });
                        }
                        Err(e) => {
                            warn!("Rejecting media stream: {}", e);
                            break;
                        }
                    }
                }
                Ok(frame) => {
                    let is_stop = matches!(frame, InboundFrame::Stop);
                    match &session_tx {
                        Some(tx) => {
                            if tx.send(frame).await.is_err() {
                                // Session already closed (max duration, drain).
                                break;
                            }
                        }
                        None => debug!("Frame before start, ignoring"),
                    }
                    if is_stop {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Ignoring malformed media-stream frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Media stream closed by provider");
                break;
            }
            Err(e) => {
                warn!("Media stream read error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Socket gone. Make sure the session learns the call ended, whether or
    // not a stop frame made it through.
    if let Some(tx) = session_tx {
        let _ = tx.send(InboundFrame::Stop).await;
    }

    Ok(())
}
