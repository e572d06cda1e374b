//! cpal-backed microphone and speaker.
//!
//! cpal streams cannot leave the thread that built them, so each device runs
//! on its own worker thread that builds the stream, reports readiness, and
//! parks until asked to stop. The speaker callback talks to the session only
//! through lock-free ring buffers.

use crate::capture::{AudioInput, FrameSink};
use crate::codec::INPUT_SAMPLE_RATE;
use crate::error::AudioError;
use crate::playback::{AudioOutput, PlaybackId};
use crate::resample::{StreamResampler, resample_buffer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE_LEN: usize = 256;
const RETIRED_QUEUE_LEN: usize = 256;
/// Voices the mixer holds without reallocating inside the callback.
const VOICE_CAPACITY: usize = 1024;

/// Owns the thread a cpal stream lives on.
struct DeviceWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceWorker {
    /// Runs `build` on a fresh thread and waits until the stream is playing.
    /// Returns the device sample rate reported by `build`.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, u32), AudioError>
    where
        F: FnOnce() -> Result<(cpal::Stream, u32), AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, rate) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(rate));
                // Parked until stop() or the worker is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let mut worker = Self {
            stop_tx,
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok(rate)) => Ok((worker, rate)),
            Ok(Err(e)) => {
                worker.stop();
                Err(e)
            }
            Err(_) => {
                worker.stop();
                Err(AudioError::DeviceThread)
            }
        }
    }

    /// Drops the stream and joins the thread.
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio device thread panicked");
            }
        }
    }
}

impl Drop for DeviceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// --- Microphone ---

/// Turns interleaved device audio into fixed-size mono frames at the input rate.
struct InputFramer {
    channels: usize,
    frame_len: usize,
    resampler: StreamResampler,
    mono: Vec<f32>,
    pending: Vec<f32>,
}

impl InputFramer {
    fn new(channels: usize, device_rate: u32, frame_len: usize) -> Result<Self, AudioError> {
        Ok(Self {
            channels: channels.max(1),
            frame_len,
            resampler: StreamResampler::new(device_rate, INPUT_SAMPLE_RATE, 1024)?,
            mono: Vec::new(),
            pending: Vec::with_capacity(frame_len * 2),
        })
    }

    fn push(&mut self, interleaved: &[f32], sink: &mut FrameSink) -> Result<(), AudioError> {
        self.mono.clear();
        let channels = self.channels;
        self.mono.extend(
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
        self.resampler.push(&self.mono, &mut self.pending)?;
        while self.pending.len() >= self.frame_len {
            let frame: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            sink(&frame);
        }
        Ok(())
    }
}

pub struct CpalInput {
    frame_len: usize,
    worker: Option<DeviceWorker>,
}

impl CpalInput {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            worker: None,
        }
    }
}

impl AudioInput for CpalInput {
    fn open(&mut self, sink: FrameSink) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let frame_len = self.frame_len;
        let (worker, rate) = DeviceWorker::spawn("divewatch-capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or(AudioError::NoDevice("input"))?;
            let supported = device
                .default_input_config()
                .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
            let config: StreamConfig = supported.config();
            debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = config.sample_rate.0,
                channels = config.channels,
                "audio capture initialized"
            );
            let framer = InputFramer::new(
                usize::from(config.channels),
                config.sample_rate.0,
                frame_len,
            )?;
            let stream = match supported.sample_format() {
                SampleFormat::F32 => build_input::<f32>(&device, &config, framer, sink),
                SampleFormat::I16 => build_input::<i16>(&device, &config, framer, sink),
                SampleFormat::U16 => build_input::<u16>(&device, &config, framer, sink),
                other => Err(AudioError::UnsupportedConfig(format!(
                    "input sample format {other:?}"
                ))),
            }?;
            Ok((stream, config.sample_rate.0))
        })?;
        info!(device_rate = rate, frame_len, "Microphone stream running");
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            debug!("audio capture stopped");
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut framer: InputFramer,
    mut sink: FrameSink,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                if let Err(e) = framer.push(&scratch, &mut sink) {
                    error!(error = %e, "Failed to process captured audio");
                }
            },
            |err| error!(error = %err, "audio capture error"),
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}

// --- Speaker ---

struct Voice {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

impl Voice {
    fn is_done(&self, flushed_through: PlaybackId) -> bool {
        self.id <= flushed_through || self.position >= self.samples.len()
    }
}

/// Runs inside the output callback: sums every voice due at each frame and
/// advances the shared frame clock.
///
/// Ids are handed out in increasing order, so a flush is a single watermark:
/// every voice with an id at or below `flushed_through` is silent, whether it
/// is already mixing or still waiting in the command queue. Done voices go
/// back to the session thread through `retired` so their buffers are freed
/// there.
struct Mixer {
    voices: Vec<Voice>,
    commands: HeapCons<Voice>,
    retired: HeapProd<Voice>,
    flushed_through: Arc<AtomicU64>,
    clock: Arc<AtomicU64>,
    channels: usize,
}

impl Mixer {
    fn new(
        commands: HeapCons<Voice>,
        retired: HeapProd<Voice>,
        flushed_through: Arc<AtomicU64>,
        clock: Arc<AtomicU64>,
        channels: usize,
    ) -> Self {
        Self {
            voices: Vec::with_capacity(VOICE_CAPACITY),
            commands,
            retired,
            flushed_through,
            clock,
            channels: channels.max(1),
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        while let Some(voice) = self.commands.try_pop() {
            self.voices.push(voice);
        }
        let flushed_through = self.flushed_through.load(Ordering::Acquire);

        let now = self.clock.load(Ordering::Acquire);
        let mut frames = 0u64;
        for (i, frame) in out.chunks_mut(self.channels).enumerate() {
            let t = now + i as u64;
            let mut mixed = 0.0f32;
            for voice in self.voices.iter_mut() {
                if t >= voice.start_frame && !voice.is_done(flushed_through) {
                    mixed += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
            frame.fill(mixed.clamp(-1.0, 1.0));
            frames += 1;
        }

        let mut i = 0;
        while i < self.voices.len() {
            if !self.voices[i].is_done(flushed_through) {
                i += 1;
                continue;
            }
            let voice = self.voices.swap_remove(i);
            if let Err(voice) = self.retired.try_push(voice) {
                // Retried on the next callback; it stays silent until then.
                self.voices.push(voice);
                break;
            }
        }
        self.clock.fetch_add(frames, Ordering::Release);
    }
}

pub struct CpalOutput {
    worker: Option<DeviceWorker>,
    commands: Option<HeapProd<Voice>>,
    retired: Option<HeapCons<Voice>>,
    flushed_through: Arc<AtomicU64>,
    last_queued: PlaybackId,
    clock: Arc<AtomicU64>,
    device_rate: u32,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            worker: None,
            commands: None,
            retired: None,
            flushed_through: Arc::new(AtomicU64::new(0)),
            last_queued: 0,
            clock: Arc::new(AtomicU64::new(0)),
            device_rate: 0,
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalOutput {
    fn open(&mut self) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (commands_tx, commands_rx) = HeapRb::<Voice>::new(COMMAND_QUEUE_LEN).split();
        let (retired_tx, retired_rx) = HeapRb::<Voice>::new(RETIRED_QUEUE_LEN).split();
        self.clock = Arc::new(AtomicU64::new(0));
        self.flushed_through = Arc::new(AtomicU64::new(0));
        self.last_queued = 0;
        let clock = Arc::clone(&self.clock);
        let flushed_through = Arc::clone(&self.flushed_through);

        let (worker, rate) = DeviceWorker::spawn("divewatch-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or(AudioError::NoDevice("output"))?;
            let supported = device
                .default_output_config()
                .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
            let config: StreamConfig = supported.config();
            debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = config.sample_rate.0,
                channels = config.channels,
                "audio playback initialized"
            );
            let mixer = Mixer::new(
                commands_rx,
                retired_tx,
                flushed_through,
                clock,
                usize::from(config.channels),
            );
            let stream = match supported.sample_format() {
                SampleFormat::F32 => build_output::<f32>(&device, &config, mixer),
                SampleFormat::I16 => build_output::<i16>(&device, &config, mixer),
                SampleFormat::U16 => build_output::<u16>(&device, &config, mixer),
                other => Err(AudioError::UnsupportedConfig(format!(
                    "output sample format {other:?}"
                ))),
            }?;
            Ok((stream, config.sample_rate.0))
        })?;

        info!(device_rate = rate, "Speaker stream running");
        self.device_rate = rate;
        self.commands = Some(commands_tx);
        self.retired = Some(retired_rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        if self.device_rate == 0 {
            return 0.0;
        }
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.device_rate)
    }

    fn play_at(
        &mut self,
        id: PlaybackId,
        samples: Vec<f32>,
        sample_rate: u32,
        start: f64,
    ) -> Result<(), AudioError> {
        let device_rate = self.device_rate;
        let Some(commands) = self.commands.as_mut().filter(|_| device_rate > 0) else {
            return Err(AudioError::Stream("output device is not open".into()));
        };
        let samples = resample_buffer(&samples, sample_rate, device_rate)?;
        let start_frame = (start.max(0.0) * f64::from(device_rate)).round() as u64;
        commands
            .try_push(Voice {
                id,
                start_frame,
                samples,
                position: 0,
            })
            .map_err(|_| AudioError::Stream("playback command queue is full".into()))?;
        self.last_queued = self.last_queued.max(id);
        Ok(())
    }

    fn cancel_all(&mut self) {
        self.flushed_through.fetch_max(self.last_queued, Ordering::AcqRel);
    }

    fn take_finished(&mut self) -> Vec<PlaybackId> {
        let flushed_through = self.flushed_through.load(Ordering::Acquire);
        match self.retired.as_mut() {
            // Buffers are dropped here, off the audio thread.
            Some(retired) => retired
                .pop_iter()
                .filter(|voice| voice.id > flushed_through)
                .map(|voice| voice.id)
                .collect(),
            None => Vec::new(),
        }
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            debug!("audio playback stopped");
        }
        self.commands = None;
        self.retired = None;
        self.device_rate = 0;
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            |err| error!(error = %err, "audio playback error"),
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}
