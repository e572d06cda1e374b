//! WebSocket client for the Gemini Live API.

use crate::{
    events::{ClientCommand, ServerEvent},
    protocol::{ClientMessage, SessionSetup, parse_server_frame},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, protocol::Message as WsMessage},
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Upper bound on the closing handshake once the session is over.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// The inbound half of an open live connection.
///
/// Events arrive on a single ordered channel. Outbound traffic goes through
/// the `ClientCommand` channel handed to [`Connector::connect`]. Dropping it
/// ends the connection; the I/O task finishes the closing handshake on its
/// own within a bounded time.
pub struct LiveConnection {
    events: mpsc::Receiver<ServerEvent>,
}

impl LiveConnection {
    pub fn new(events: mpsc::Receiver<ServerEvent>) -> Self {
        Self { events }
    }

    /// Waits for the next event. Returns `None` once the connection task has ended.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }
}

/// Opens live connections. Implemented by [`GeminiLiveClient`] and by test fakes.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and sends `setup`. Commands received on `outbound` are written
    /// to the connection until a `ClientCommand::Close` arrives or every sender
    /// is dropped.
    async fn connect(
        &self,
        setup: SessionSetup,
        outbound: mpsc::Receiver<ClientCommand>,
    ) -> Result<LiveConnection>;
}

/// A [`Connector`] for the Gemini `BidiGenerateContent` websocket.
pub struct GeminiLiveClient {
    endpoint: String,
    api_key: SecretString,
    setup_timeout: Duration,
    event_capacity: usize,
}

impl GeminiLiveClient {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            event_capacity: 128,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Bounds both the websocket handshake and the wait for `setupComplete`.
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}key={}",
            self.endpoint,
            separator,
            self.api_key.expose_secret()
        )
    }
}

#[async_trait]
impl Connector for GeminiLiveClient {
    async fn connect(
        &self,
        setup: SessionSetup,
        outbound: mpsc::Receiver<ClientCommand>,
    ) -> Result<LiveConnection> {
        let (mut ws_stream, _) = tokio::time::timeout(self.setup_timeout, connect_async(self.url()))
            .await
            .context("Timed out connecting to the Gemini Live endpoint")?
            .context("Failed to connect to the Gemini Live endpoint")?;
        info!(model = %setup.model, "Connected to Gemini Live WebSocket.");

        let setup_payload = serde_json::to_string(&ClientMessage::setup(&setup))?;
        ws_stream
            .send(WsMessage::Text(setup_payload.into()))
            .await
            .context("Failed to send session setup")?;

        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        let setup_timeout = self.setup_timeout;
        tokio::spawn(run_io(
            ws_stream,
            outbound,
            events_tx,
            setup_timeout,
            CLOSE_TIMEOUT,
        ));
        Ok(LiveConnection::new(events_rx))
    }
}

/// Pumps the websocket until either side ends the session.
///
/// Realtime input is dropped until the server acknowledges the setup. The
/// final event (`ConnectionClosed` or `ConnectionError`) is emitted only when
/// the server or the transport ended the session. The closing handshake is
/// abandoned after `close_timeout`.
async fn run_io<S>(
    ws: S,
    mut outbound: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<ServerEvent>,
    setup_timeout: Duration,
    close_timeout: Duration,
) where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut is_ready = false;
    let mut dropped_before_ready: u64 = 0;
    let setup_deadline = tokio::time::sleep(setup_timeout);
    tokio::pin!(setup_deadline);

    let terminal = loop {
        tokio::select! {
            _ = &mut setup_deadline, if !is_ready => {
                error!(?setup_timeout, "Gemini did not acknowledge the session setup.");
                break Some(ServerEvent::ConnectionError(format!(
                    "setup not acknowledged within {}s",
                    setup_timeout.as_secs_f32()
                )));
            }
            command = outbound.recv() => {
                let Some(message) = command.and_then(ClientMessage::from_command) else {
                    debug!("Outbound channel closed or close requested.");
                    break None;
                };
                if !is_ready && matches!(message, ClientMessage::RealtimeInput(_)) {
                    dropped_before_ready += 1;
                    continue;
                }
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize client message");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(WsMessage::Text(payload.into())).await {
                    error!(error = %e, "Error writing to Gemini WebSocket");
                    break Some(ServerEvent::ConnectionError(e.to_string()));
                }
            }
            frame = ws_rx.next() => {
                let parsed = match frame {
                    Some(Ok(WsMessage::Text(text))) => parse_server_frame(text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => parse_server_frame(text),
                        Err(_) => {
                            warn!(len = data.len(), "Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(close_frame))) => {
                        info!(?close_frame, "Gemini WebSocket connection closed by server.");
                        break Some(ServerEvent::ConnectionClosed);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Error reading from Gemini WebSocket: {}", e);
                        break Some(ServerEvent::ConnectionError(e.to_string()));
                    }
                    None => break Some(ServerEvent::ConnectionClosed),
                };

                let batch = match parsed {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse Gemini message");
                        continue;
                    }
                };
                let mut receiver_gone = false;
                for event in batch {
                    if event == ServerEvent::Opened {
                        info!("Gemini session setup is complete. Ready for bidirectional streaming.");
                        is_ready = true;
                    }
                    if events.send(event).await.is_err() {
                        receiver_gone = true;
                        break;
                    }
                }
                if receiver_gone {
                    debug!("Event receiver dropped; closing connection.");
                    break None;
                }
            }
        }
    };

    if dropped_before_ready > 0 {
        debug!(dropped_before_ready, "Dropped realtime input sent before setup completed");
    }
    let client_closed = match terminal {
        Some(event) => {
            let _ = events.send(event).await;
            false
        }
        None => true,
    };
    drop(events);
    let shutdown = async {
        if client_closed {
            let _ = ws_tx.send(WsMessage::Close(None)).await;
        }
        let _ = ws_tx.close().await;
    };
    if tokio::time::timeout(close_timeout, shutdown).await.is_err() {
        warn!(?close_timeout, "Gave up on the WebSocket closing handshake.");
    }
}
