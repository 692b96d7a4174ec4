use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("Failed to create resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Mono sample-rate converter fed with arbitrarily sized slices.
///
/// Input is buffered until the sinc resampler has a full chunk. Equal rates
/// pass straight through.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self, ResampleError> {
        let inner = if input_rate == output_rate {
            None
        } else {
            let ratio = output_rate as f64 / input_rate as f64;
            let params = SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size.max(1), 1)?;
            log::debug!(
                "Resampler: {}Hz -> {}Hz (ratio {:.3})",
                input_rate,
                output_rate,
                ratio
            );
            Some(resampler)
        };
        Ok(Self {
            inner,
            pending: Vec::with_capacity(chunk_size),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Output samples of filter delay at the head of the converted signal
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Convert `input`, appending whatever output is ready to `out`
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), ResampleError> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let frames = resampler.process(&[&self.pending[..needed]], None)?;
            self.pending.drain(..needed);
            if let Some(channel) = frames.first() {
                out.extend_from_slice(channel);
            }
        }
    }

    /// Push out buffered input, zero-padded to a final chunk
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), ResampleError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let input: [&[f32]; 1] = [&self.pending];
        let frames = resampler.process_partial(Some(&input[..]), None)?;
        self.pending.clear();
        if let Some(channel) = frames.first() {
            out.extend_from_slice(channel);
        }
        Ok(())
    }
}

/// Convert a complete clip in one go
pub fn resample_clip(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>, ResampleError> {
    if input_rate == output_rate {
        return Ok(samples.to_vec());
    }
    let mut resampler = StreamResampler::new(input_rate, output_rate, 1024)?;
    let expected = samples.len() as u64 * output_rate as u64 / input_rate as u64;
    let mut out = Vec::with_capacity(expected as usize + 1024);
    resampler.push(samples, &mut out)?;
    resampler.flush(&mut out)?;
    let delay = resampler.output_delay().min(out.len());
    out.drain(..delay);
    out.truncate(expected as usize);
    Ok(out)
}
