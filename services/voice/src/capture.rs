//! Microphone frames to encoded realtime input.

use crate::codec;
use crate::error::AudioError;
use gemini_realtime::ClientCommand;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Receives each captured frame on the device's own thread.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// The microphone side of the session.
pub trait AudioInput: Send {
    /// Acquires the device and starts delivering mono frames at the input
    /// rate to `sink`.
    fn open(&mut self, sink: FrameSink) -> Result<(), AudioError>;

    /// Stops delivery and releases the device. Safe to call repeatedly.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_sent: u64,
    /// Captured before the connection was ready, or after it went away.
    pub frames_dropped_not_ready: u64,
    /// The outbound queue was full.
    pub frames_dropped_full: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    not_ready: AtomicU64,
    full: AtomicU64,
}

pub struct CapturePipeline {
    input: Box<dyn AudioInput>,
    ready: Arc<AtomicBool>,
    counters: Arc<Counters>,
    is_acquired: bool,
}

impl CapturePipeline {
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        Self {
            input,
            ready: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            is_acquired: false,
        }
    }

    /// Opens the device. Frames are discarded until [`mark_ready`](Self::mark_ready).
    pub fn acquire(&mut self, outbound: mpsc::Sender<ClientCommand>) -> Result<(), AudioError> {
        if self.is_acquired {
            return Ok(());
        }
        self.ready.store(false, Ordering::Release);

        let ready = Arc::clone(&self.ready);
        let counters = Arc::clone(&self.counters);
        let sink: FrameSink = Box::new(move |frame: &[f32]| {
            if !ready.load(Ordering::Acquire) {
                counters.not_ready.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let blob = codec::encode(frame);
            match outbound.try_send(ClientCommand::RealtimeInput(blob)) {
                Ok(()) => counters.sent.fetch_add(1, Ordering::Relaxed),
                Err(TrySendError::Full(_)) => counters.full.fetch_add(1, Ordering::Relaxed),
                Err(TrySendError::Closed(_)) => counters.not_ready.fetch_add(1, Ordering::Relaxed),
            };
        });

        self.input.open(sink)?;
        self.is_acquired = true;
        info!("Microphone acquired");
        Ok(())
    }

    /// Starts forwarding frames to the connection.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_acquired(&self) -> bool {
        self.is_acquired
    }

    /// Unregisters the frame callback and releases the device.
    pub fn stop(&mut self) {
        self.ready.store(false, Ordering::Release);
        if self.is_acquired {
            self.input.close();
            self.is_acquired = false;
            let stats = self.stats();
            debug!(?stats, "Microphone released");
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_dropped_not_ready: self.counters.not_ready.load(Ordering::Relaxed),
            frames_dropped_full: self.counters.full.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CAPTURE_FRAME_LEN, INPUT_SAMPLE_RATE};
    use crate::testing::FakeInput;

    #[test]
    fn test_frames_before_ready_are_dropped() {
        let input = FakeInput::default();
        let mut pipeline = CapturePipeline::new(Box::new(input.clone()));
        let (tx, mut rx) = mpsc::channel(8);

        pipeline.acquire(tx).unwrap();
        input.emit(&[0.5; CAPTURE_FRAME_LEN]);
        assert!(rx.try_recv().is_err());

        pipeline.mark_ready();
        input.emit(&[0.5; CAPTURE_FRAME_LEN]);
        let Ok(ClientCommand::RealtimeInput(blob)) = rx.try_recv() else {
            panic!("expected an encoded frame");
        };
        assert_eq!(blob.sample_rate, INPUT_SAMPLE_RATE);
        assert_eq!(blob.data.len(), CAPTURE_FRAME_LEN * 2);

        assert_eq!(
            pipeline.stats(),
            CaptureStats {
                frames_sent: 1,
                frames_dropped_not_ready: 1,
                frames_dropped_full: 0,
            }
        );
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let input = FakeInput::default();
        let mut pipeline = CapturePipeline::new(Box::new(input.clone()));
        let (tx, _rx) = mpsc::channel(2);

        pipeline.acquire(tx).unwrap();
        pipeline.mark_ready();
        for _ in 0..5 {
            input.emit(&[0.0; 16]);
        }

        let stats = pipeline.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_dropped_full, 3);
    }

    #[test]
    fn test_stop_is_idempotent_and_unregisters() {
        let input = FakeInput::default();
        let mut pipeline = CapturePipeline::new(Box::new(input.clone()));
        pipeline.stop();
        assert_eq!(input.close_count(), 0);

        let (tx, mut rx) = mpsc::channel(8);
        pipeline.acquire(tx).unwrap();
        pipeline.mark_ready();
        pipeline.stop();
        pipeline.stop();

        assert_eq!(input.close_count(), 1);
        assert!(!input.is_open());
        assert!(!pipeline.is_acquired());
        input.emit(&[0.1; 16]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_device_failure_leaves_pipeline_released() {
        let input = FakeInput::failing();
        let mut pipeline = CapturePipeline::new(Box::new(input));
        let (tx, _rx) = mpsc::channel(8);

        assert!(matches!(pipeline.acquire(tx), Err(AudioError::NoDevice(_))));
        assert!(!pipeline.is_acquired());
    }
}
