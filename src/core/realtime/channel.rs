//! WebSocket data channel into a realtime session.
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Auth: ephemeral client secret issued by the gateway's `/token` endpoint
//!
//! Outgoing [`ClientEvent`]s are queued on an mpsc channel and written by a
//! single connection task, so the order of awaited sends is the order on the
//! wire. Incoming events are parsed into [`RealtimeEvent`]s and forwarded to
//! the receiver returned from [`WsDataChannel::connect`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::base::{ConnectionState, DataChannel, RealtimeError, RealtimeResult};
use super::events::RealtimeEvent;
use super::messages::ClientEvent;

/// Default realtime WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for incoming server events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Realtime data channel backed by a WebSocket connection.
pub struct WsDataChannel {
    /// Connected flag shared with the connection task
    open: Arc<AtomicBool>,
    /// Last known connection state
    state: Arc<Mutex<ConnectionState>>,
    /// Outgoing event queue
    ws_sender: mpsc::Sender<ClientEvent>,
    /// Connection task handle
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WsDataChannel {
    /// Build the WebSocket URL with model parameter.
    pub fn build_ws_url(base_url: &str, model: &str) -> String {
        format!("{}?model={}", base_url.trim_end_matches('/'), model)
    }

    /// Connect to the realtime endpoint with an ephemeral client secret.
    ///
    /// Returns the channel and a receiver of parsed server events. The receiver
    /// closes when the connection ends.
    pub async fn connect(
        url: &str,
        client_secret: &str,
    ) -> RealtimeResult<(Self, mpsc::Receiver<RealtimeEvent>)> {
        let parsed = url::Url::parse(url)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RealtimeError::InvalidConfiguration("URL has no host".to_string()))?
            .to_string();

        let request = http::Request::builder()
            .uri(url)
            .header("Authorization", format!("Bearer {}", client_secret))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Connected to realtime session");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(EVENT_CHANNEL_CAPACITY);

        let open = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(ConnectionState::Connected));
        let task_open = open.clone();
        let task_state = state.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(event) = outgoing else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match RealtimeEvent::from_json(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            tracing::debug!("Event receiver dropped");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse server event: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("WebSocket closed by server");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }

            task_open.store(false, Ordering::SeqCst);
            *task_state.lock() = ConnectionState::Closed;
        });

        Ok((
            Self {
                open,
                state,
                ws_sender: tx,
                connection_handle: Mutex::new(Some(handle)),
            },
            event_rx,
        ))
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Close the connection and stop the connection task.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Closed;
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
        tracing::info!("Disconnected from realtime session");
    }
}

impl Drop for WsDataChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl DataChannel for WsDataChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::NotConnected);
        }
        tracing::debug!("Sending realtime event: {}", event.event_type());
        self.ws_sender
            .send(event)
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }
}
