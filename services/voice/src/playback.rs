//! Gapless scheduling of streamed response audio.
//!
//! Each decoded chunk is queued on the output device to start exactly where
//! the previous one ends. The device owns the clock; the scheduler only keeps
//! the cursor and the set of buffers it has handed over.

use crate::codec;
use crate::error::AudioError;
use gemini_realtime::EncodedBlob;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub type PlaybackId = u64;

/// The speaker side of the session.
pub trait AudioOutput: Send {
    /// Opens the device and starts its clock.
    fn open(&mut self) -> Result<(), AudioError>;

    /// Seconds elapsed on the device clock since `open`.
    fn current_time(&self) -> f64;

    /// Queues mono `samples` recorded at `sample_rate` to start at `start` seconds.
    fn play_at(
        &mut self,
        id: PlaybackId,
        samples: Vec<f32>,
        sample_rate: u32,
        start: f64,
    ) -> Result<(), AudioError>;

    /// Silences every buffer queued so far, including ones the device has
    /// not picked up yet. Buffers queued afterwards are unaffected.
    fn cancel_all(&mut self);

    /// Ids of buffers that played to the end since the last call. Cancelled
    /// buffers are never reported.
    fn take_finished(&mut self) -> Vec<PlaybackId>;

    /// Releases the device. Safe to call repeatedly.
    fn close(&mut self);
}

/// A buffer handed to the device and not yet reported finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,
    pub start: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    cursor: f64,
    active: BTreeMap<PlaybackId, PlaybackHandle>,
    next_id: PlaybackId,
    channels: u16,
    is_open: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            cursor: 0.0,
            active: BTreeMap::new(),
            next_id: 1,
            channels: 1,
            is_open: false,
        }
    }

    pub fn open(&mut self) -> Result<(), AudioError> {
        if !self.is_open {
            self.output.open()?;
            self.is_open = true;
            self.cursor = 0.0;
        }
        Ok(())
    }

    /// Decodes `blob` and schedules it right after everything already queued.
    ///
    /// Malformed chunks are logged and dropped.
    pub fn on_audio_chunk(&mut self, blob: &EncodedBlob) -> Option<PlaybackHandle> {
        self.reap_finished();

        let samples = match codec::decode(blob, self.channels) {
            Ok(samples) => downmix(samples, self.channels),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable audio chunk");
                return None;
            }
        };
        if samples.is_empty() || blob.sample_rate == 0 {
            return None;
        }

        let duration = samples.len() as f64 / f64::from(blob.sample_rate);
        self.cursor = self.cursor.max(self.output.current_time());
        let handle = PlaybackHandle {
            id: self.next_id,
            start: self.cursor,
            duration,
        };
        if let Err(e) = self
            .output
            .play_at(handle.id, samples, blob.sample_rate, handle.start)
        {
            warn!(error = %e, "Failed to queue audio chunk");
            return None;
        }

        self.next_id += 1;
        self.cursor += duration;
        self.active.insert(handle.id, handle);
        Some(handle)
    }

    /// Stops everything queued and lets the next chunk start immediately.
    pub fn on_interrupted(&mut self) {
        let flushed = self.active.len();
        self.output.cancel_all();
        self.active.clear();
        self.cursor = 0.0;
        debug!(flushed, "Playback flushed after interruption");
    }

    /// Forgets handles the device reports as finished.
    pub fn reap_finished(&mut self) {
        for id in self.output.take_finished() {
            self.active.remove(&id);
        }
    }

    /// Cancels pending playback and releases the device. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.active.is_empty() {
            self.on_interrupted();
        }
        self.cursor = 0.0;
        if self.is_open {
            self.output.close();
            self.is_open = false;
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active(&self) -> impl Iterator<Item = &PlaybackHandle> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

fn downmix(samples: Vec<f32>, channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks_exact(usize::from(channels))
        .map(|frame| frame.iter().sum::<f32>() / f32::from(channels))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RESPONSE_SAMPLE_RATE, encode_with};
    use crate::testing::FakeOutput;
    use approx::assert_abs_diff_eq;

    fn chunk(frames: usize) -> EncodedBlob {
        encode_with(&vec![0.1; frames], RESPONSE_SAMPLE_RATE, 1)
    }

    fn scheduler() -> (PlaybackScheduler, FakeOutput) {
        let output = FakeOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        scheduler.open().unwrap();
        (scheduler, output)
    }

    #[test]
    fn test_chunks_are_scheduled_back_to_back() {
        let (mut scheduler, output) = scheduler();
        output.set_time(0.5);

        let first = scheduler.on_audio_chunk(&chunk(2400)).unwrap();
        // Jitter: the clock moves on but the queue is still ahead of it.
        output.set_time(0.55);
        let second = scheduler.on_audio_chunk(&chunk(4800)).unwrap();
        let third = scheduler.on_audio_chunk(&chunk(1200)).unwrap();

        assert_abs_diff_eq!(first.start, 0.5);
        assert_abs_diff_eq!(first.duration, 0.1);
        assert_abs_diff_eq!(second.start, first.start + first.duration);
        assert_abs_diff_eq!(third.start, second.start + second.duration);
        assert_abs_diff_eq!(scheduler.cursor(), 0.85, epsilon = 1e-9);
        assert_eq!(scheduler.active_count(), 3);
        assert_eq!(output.scheduled().len(), 3);
    }

    #[test]
    fn test_late_chunk_starts_at_current_time() {
        let (mut scheduler, output) = scheduler();
        scheduler.on_audio_chunk(&chunk(2400)).unwrap();

        // The queue ran dry; the next chunk must not be scheduled in the past.
        output.set_time(2.0);
        let late = scheduler.on_audio_chunk(&chunk(2400)).unwrap();
        assert_abs_diff_eq!(late.start, 2.0);
    }

    #[test]
    fn test_interruption_flushes_everything() {
        let (mut scheduler, output) = scheduler();
        output.set_time(1.0);
        let a = scheduler.on_audio_chunk(&chunk(2400)).unwrap();
        let b = scheduler.on_audio_chunk(&chunk(2400)).unwrap();

        scheduler.on_interrupted();
        assert_eq!(scheduler.active_count(), 0);
        assert_abs_diff_eq!(scheduler.cursor(), 0.0);
        assert_eq!(output.cancelled(), vec![a.id, b.id]);
        assert_eq!(output.flushes(), 1);

        output.set_time(1.05);
        let next = scheduler.on_audio_chunk(&chunk(2400)).unwrap();
        assert!(next.start >= 1.05);
        assert!(next.start < b.start + b.duration);
    }

    #[test]
    fn test_malformed_chunk_is_dropped_without_disturbing_the_queue() {
        let (mut scheduler, output) = scheduler();
        let good = scheduler.on_audio_chunk(&chunk(2400)).unwrap();

        let bad = EncodedBlob::new(vec![1, 2, 3], RESPONSE_SAMPLE_RATE, 1);
        assert!(scheduler.on_audio_chunk(&bad).is_none());
        assert_abs_diff_eq!(scheduler.cursor(), good.start + good.duration);

        let next = scheduler.on_audio_chunk(&chunk(2400)).unwrap();
        assert_abs_diff_eq!(next.start, good.start + good.duration);
        assert_eq!(output.scheduled().len(), 2);
    }

    #[test]
    fn test_finished_handles_are_reaped() {
        let (mut scheduler, output) = scheduler();
        let a = scheduler.on_audio_chunk(&chunk(2400)).unwrap();
        let b = scheduler.on_audio_chunk(&chunk(2400)).unwrap();

        output.finish(a.id);
        scheduler.reap_finished();
        let remaining: Vec<PlaybackId> = scheduler.active().map(|h| h.id).collect();
        assert_eq!(remaining, vec![b.id]);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut scheduler, output) = scheduler();
        let a = scheduler.on_audio_chunk(&chunk(2400)).unwrap();

        scheduler.shutdown();
        scheduler.shutdown();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(output.cancelled(), vec![a.id]);
        assert_eq!(output.close_count(), 1);
        assert!(!output.is_open());
    }
}
