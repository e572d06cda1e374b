use crate::error::AudioError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Single-channel `in_rate` to `out_rate` converter taking `chunk_size`
/// input frames per call. The ratio cannot be adjusted after creation.
pub fn create_resampler(
    in_rate: u32,
    out_rate: u32,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    let ratio = f64::from(out_rate) / f64::from(in_rate);
    let max_relative_ratio = 1.0;
    let channels = 1;
    FastFixedIn::<f32>::new(
        ratio,
        max_relative_ratio,
        PolynomialDegree::Cubic,
        chunk_size,
        channels,
    )
    .map_err(|e| AudioError::Resampler(e.to_string()))
}

/// Resamples a continuous mono stream delivered in arbitrary slices.
///
/// Equal rates pass samples through untouched.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_size: usize) -> Result<Self, AudioError> {
        let inner = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(in_rate, out_rate, chunk_size)?)
        };
        Ok(Self {
            inner,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    /// Feeds `samples` and appends whatever output is ready to `out`.
    pub fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<(), AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(samples);
            return Ok(());
        };
        self.pending.extend_from_slice(samples);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let output = resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;
            out.extend_from_slice(&output[0]);
        }
    }
}

/// Resamples a complete mono buffer, compensating for the resampler delay.
pub fn resample_buffer(samples: &[f32], in_rate: u32, out_rate: u32) -> Result<Vec<f32>, AudioError> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_rate, out_rate, samples.len())?;
    let expected =
        (samples.len() as f64 * f64::from(out_rate) / f64::from(in_rate)).round() as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay);
    let head = resampler
        .process_partial(Some(&[samples]), None)
        .map_err(|e| AudioError::Resampler(e.to_string()))?;
    output.extend_from_slice(&head[0]);
    while output.len() < expected + delay {
        let tail = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;
        if tail[0].is_empty() {
            break;
        }
        output.extend_from_slice(&tail[0]);
    }

    let start = delay.min(output.len());
    let end = (start + expected).min(output.len());
    Ok(output[start..end].to_vec())
}
