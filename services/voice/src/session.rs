//! Voice Session Controller
//!
//! Owns one live conversation: the microphone, the speaker queue, the
//! connection and the transcript. Server events are applied one at a time in
//! arrival order; audio and tool responses leave through the bounded outbound
//! channel without ever blocking the event loop.

use crate::capture::{AudioInput, CapturePipeline, CaptureStats};
use crate::dispatcher::ToolDispatcher;
use crate::error::SessionError;
use crate::playback::{AudioOutput, PlaybackScheduler};
use crate::transcript::{TranscriptAggregator, TranscriptTurn};
use gemini_realtime::{ClientCommand, Connector, LiveConnection, ServerEvent, SessionSetup};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const SYSTEM_INSTRUCTION: &str = "Eres un asistente experto en buceo profesional y seguridad marina. \
Responde en español de forma concisa y amigable. Puedes usar las herramientas disponibles para responder \
preguntas sobre el estado actual de la operación, como el número de buzos operativos o el estado de sus bitácoras.";

pub const STATUS_READY: &str = "Listo para conversar.";
pub const STATUS_STARTING: &str = "Iniciando sesión...";
pub const STATUS_CONNECTED: &str = "Conectado. ¡Puedes empezar a hablar!";
pub const STATUS_CLOSING: &str = "Cerrando sesión...";
pub const STATUS_CLOSED: &str = "Sesión cerrada.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl SessionState {
    /// Holds the device and the connection.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub voice: String,
    pub outbound_queue_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: crate::config::DEFAULT_LIVE_MODEL.to_string(),
            voice: crate::config::DEFAULT_VOICE.to_string(),
            outbound_queue_depth: 32,
        }
    }
}

pub struct SessionController {
    connector: Box<dyn Connector>,
    dispatcher: ToolDispatcher,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    aggregator: TranscriptAggregator,
    transcript_log: Vec<TranscriptTurn>,
    options: SessionOptions,
    state: SessionState,
    status: String,
    connection: Option<LiveConnection>,
    outbound: Option<mpsc::Sender<ClientCommand>>,
    tool_sends: JoinSet<()>,
}

impl SessionController {
    pub fn new(
        connector: Box<dyn Connector>,
        dispatcher: ToolDispatcher,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
        options: SessionOptions,
    ) -> Self {
        Self {
            connector,
            dispatcher,
            capture: CapturePipeline::new(input),
            playback: PlaybackScheduler::new(output),
            aggregator: TranscriptAggregator::new(),
            transcript_log: Vec::new(),
            options,
            state: SessionState::Idle,
            status: STATUS_READY.to_string(),
            connection: None,
            outbound: None,
            tool_sends: JoinSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Human-readable state shown to the operator.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn transcript_log(&self) -> &[TranscriptTurn] {
        &self.transcript_log
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.capture.stats()
    }

    /// Acquires the devices and opens the connection.
    ///
    /// The session stays `Connecting` until the server acknowledges the
    /// setup; feed it events with [`run`](Self::run) or
    /// [`handle_event`](Self::handle_event).
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.transition(SessionState::Connecting, STATUS_STARTING.to_string());
        self.transcript_log.clear();

        let (outbound_tx, outbound_rx) = mpsc::channel(self.options.outbound_queue_depth);
        let acquired = self
            .capture
            .acquire(outbound_tx.clone())
            .and_then(|()| self.playback.open());
        if let Err(e) = acquired {
            error!(error = %e, "Failed to acquire audio devices");
            self.release();
            self.transition(SessionState::Errored, format!("Error: {}", e));
            return Err(e.into());
        }

        let setup = SessionSetup {
            model: self.options.model.clone(),
            voice: self.options.voice.clone(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            tools: self.dispatcher.declarations(),
        };
        match self.connector.connect(setup, outbound_rx).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.outbound = Some(outbound_tx);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to open live connection");
                drop(outbound_tx);
                self.release();
                let message = format!("{:#}", e);
                self.transition(
                    SessionState::Errored,
                    format!("Error de conexión: {}", message),
                );
                Err(SessionError::Connection(message))
            }
        }
    }

    /// Waits for the next server event. `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        match self.connection.as_mut() {
            Some(connection) => connection.recv().await,
            None => None,
        }
    }

    /// Processes events until the connection ends or the session errors.
    pub async fn run(&mut self) {
        while self.state.is_active() {
            let event = self
                .next_event()
                .await
                .unwrap_or(ServerEvent::ConnectionClosed);
            self.handle_event(event);
        }
    }

    /// Applies one server event.
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Opened => {
                if self.state == SessionState::Connecting {
                    self.capture.mark_ready();
                    self.transition(SessionState::Open, STATUS_CONNECTED.to_string());
                }
            }
            ServerEvent::ConnectionError(message) => {
                if self.state.is_active() {
                    error!(%message, "Live connection failed");
                    self.release();
                    self.transition(
                        SessionState::Errored,
                        format!("Error de conexión: {}", message),
                    );
                }
            }
            ServerEvent::ConnectionClosed => {
                if self.state.is_active() || self.state == SessionState::Closing {
                    self.release();
                    self.transition(SessionState::Closed, STATUS_CLOSED.to_string());
                }
            }
            event if self.state != SessionState::Open => {
                debug!(state = ?self.state, ?event, "Ignoring event outside an open session");
            }
            ServerEvent::InputTranscriptFragment(text) => self.aggregator.on_input_fragment(&text),
            ServerEvent::OutputTranscriptFragment(text) => {
                self.aggregator.on_output_fragment(&text)
            }
            ServerEvent::TurnComplete => {
                if let Some(turn) = self.aggregator.on_turn_complete() {
                    info!(user = %turn.user_text, model = %turn.model_text, "Turn complete");
                    self.transcript_log.push(turn);
                }
            }
            ServerEvent::ToolCallRequest(calls) => {
                for call in &calls {
                    let response = self.dispatcher.dispatch(call);
                    self.send_detached(ClientCommand::ToolResponse(response));
                }
            }
            ServerEvent::AudioChunk(blob) => {
                self.playback.on_audio_chunk(&blob);
            }
            ServerEvent::Interrupted => self.playback.on_interrupted(),
            ServerEvent::GoAway { time_left } => {
                warn!(?time_left, "Server announced it will close the connection");
            }
        }
    }

    /// Releases the devices and closes the connection. Calling it when no
    /// session is running is a no-op.
    pub fn stop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        self.transition(SessionState::Closing, STATUS_CLOSING.to_string());
        self.release();
        self.transition(SessionState::Closed, STATUS_CLOSED.to_string());
    }

    /// Sends without awaiting the caller; responses are not subject to the
    /// drop policy applied to microphone frames.
    fn send_detached(&mut self, command: ClientCommand) {
        let Some(outbound) = self.outbound.clone() else {
            return;
        };
        while self.tool_sends.try_join_next().is_some() {}
        self.tool_sends.spawn(async move {
            if outbound.send(command).await.is_err() {
                warn!("Connection closed before a tool response could be sent");
            }
        });
    }

    fn release(&mut self) {
        self.capture.stop();
        self.playback.shutdown();
        self.tool_sends.abort_all();
        if let Some(outbound) = self.outbound.take() {
            if outbound.try_send(ClientCommand::Close).is_err() {
                debug!("Outbound queue unavailable; connection closes when the channel drops");
            }
        }
        if self.connection.take().is_some() {
            let stats = self.capture.stats();
            info!(
                frames_sent = stats.frames_sent,
                dropped_not_ready = stats.frames_dropped_not_ready,
                dropped_full = stats.frames_dropped_full,
                "Session resources released"
            );
        }
    }

    fn transition(&mut self, state: SessionState, status: String) {
        debug!(from = ?self.state, to = ?state, %status, "Session state change");
        self.state = state;
        self.status = status;
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}
