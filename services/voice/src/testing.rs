//! In-process fakes for the device and connection seams.

use crate::capture::{AudioInput, FrameSink};
use crate::error::AudioError;
use crate::playback::{AudioOutput, PlaybackId};
use anyhow::{Result, bail};
use async_trait::async_trait;
use gemini_realtime::{ClientCommand, Connector, LiveConnection, ServerEvent, SessionSetup};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct InputState {
    sink: Option<FrameSink>,
    fail: bool,
    close_count: usize,
}

#[derive(Clone, Default)]
pub struct FakeInput {
    state: Arc<Mutex<InputState>>,
}

impl FakeInput {
    pub fn failing() -> Self {
        let input = Self::default();
        lock(&input.state).fail = true;
        input
    }

    /// Delivers one frame as the device thread would.
    pub fn emit(&self, frame: &[f32]) {
        if let Some(sink) = lock(&self.state).sink.as_mut() {
            sink(frame);
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }
}

impl AudioInput for FakeInput {
    fn open(&mut self, sink: FrameSink) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(AudioError::NoDevice("input"));
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.sink = None;
        state.close_count += 1;
    }
}

#[derive(Default)]
struct OutputState {
    now: f64,
    open: bool,
    scheduled: Vec<(PlaybackId, f64, usize)>,
    pending: Vec<PlaybackId>,
    cancelled: Vec<PlaybackId>,
    flushes: usize,
    calls: Vec<&'static str>,
    finished: Vec<PlaybackId>,
    close_count: usize,
}

#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn set_time(&self, now: f64) {
        lock(&self.state).now = now;
    }

    /// Reports `id` as played to the end.
    pub fn finish(&self, id: PlaybackId) {
        let mut state = lock(&self.state);
        state.pending.retain(|&pending| pending != id);
        state.finished.push(id);
    }

    /// `(id, start, frames)` for every buffer queued so far.
    pub fn scheduled(&self) -> Vec<(PlaybackId, f64, usize)> {
        lock(&self.state).scheduled.clone()
    }

    /// Ids silenced by a flush while still queued or playing.
    pub fn cancelled(&self) -> Vec<PlaybackId> {
        lock(&self.state).cancelled.clone()
    }

    pub fn flushes(&self) -> usize {
        lock(&self.state).flushes
    }

    /// Device calls in the order they were made.
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.state).calls.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }
}

impl AudioOutput for FakeOutput {
    fn open(&mut self) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        state.open = true;
        state.calls.push("open");
        Ok(())
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).now
    }

    fn play_at(
        &mut self,
        id: PlaybackId,
        samples: Vec<f32>,
        _sample_rate: u32,
        start: f64,
    ) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(AudioError::Stream("output is closed".into()));
        }
        state.scheduled.push((id, start, samples.len()));
        state.pending.push(id);
        state.calls.push("play");
        Ok(())
    }

    fn cancel_all(&mut self) {
        let mut state = lock(&self.state);
        let flushed = std::mem::take(&mut state.pending);
        state.cancelled.extend(flushed);
        state.flushes += 1;
        state.calls.push("flush");
    }

    fn take_finished(&mut self) -> Vec<PlaybackId> {
        std::mem::take(&mut lock(&self.state).finished)
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.open = false;
        state.close_count += 1;
        state.calls.push("close");
    }
}

#[derive(Default)]
struct ConnectorState {
    events: Option<mpsc::Receiver<ServerEvent>>,
    outbound: Option<mpsc::Receiver<ClientCommand>>,
    setup: Option<SessionSetup>,
    failure: Option<String>,
    connects: usize,
}

/// Hands out a connection whose events the test pushes by hand.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::Sender<ServerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let connector = Self::default();
        lock(&connector.state).events = Some(rx);
        (connector, tx)
    }

    pub fn failing(message: &str) -> Self {
        let connector = Self::default();
        lock(&connector.state).failure = Some(message.to_string());
        connector
    }

    /// The receiving end of everything the session sent.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<ClientCommand>> {
        lock(&self.state).outbound.take()
    }

    pub fn setup(&self) -> Option<SessionSetup> {
        lock(&self.state).setup.clone()
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        setup: SessionSetup,
        outbound: mpsc::Receiver<ClientCommand>,
    ) -> Result<LiveConnection> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if let Some(message) = &state.failure {
            bail!("{}", message);
        }
        let Some(events) = state.events.take() else {
            bail!("fake connection already used");
        };
        state.setup = Some(setup);
        state.outbound = Some(outbound);
        Ok(LiveConnection::new(events))
    }
}
