//! Sample-rate conversion with a rubato `FastFixedIn` resampler.
//!
//! Devices capture at their native rate (commonly 48 kHz); recognizers want
//! a fixed rate (typically 16 kHz mono f32). `Resampler` bridges the gap on
//! the listener worker thread, where allocation is allowed. When the rates
//! already match it is a passthrough and no rubato session exists at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::error;

use crate::error::{PacklineError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct Resampler {
    /// `None` when input rate == output rate (passthrough).
    inner: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls; rubato wants full chunks.
    pending: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated `[1][output_frames_max]` output buffer.
    out_buf: Vec<Vec<f32>>,
}

impl Resampler {
    /// # Errors
    /// `PacklineError::AudioDevice` if rubato fails to initialise.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                chunk_size,
                out_buf: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let inner = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| PacklineError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = inner.output_frames_max();
        tracing::debug!(input_rate, output_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            inner: Some(inner),
            pending: Vec::new(),
            chunk_size,
            out_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Feed samples; returns converted output (may be empty while input
    /// accumulates toward a full chunk). Passthrough mode copies input out.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut inner) = self.inner else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.pending.len() >= self.chunk_size {
            let input = &self.pending[..self.chunk_size];
            match inner.process_into_buffer(&[input], &mut self.out_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.out_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.chunk_size);
        }
        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}
