//! Typed audio frame passed from the ring buffer to the recognizer.

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level, used for end-of-utterance detection.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        let frame = AudioFrame::new(vec![0.0; 320], 16_000);
        assert_eq!(frame.rms(), 0.0);
        assert!((frame.duration_secs() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn rms_of_constant_signal_matches_amplitude() {
        let frame = AudioFrame::new(vec![0.5; 160], 16_000);
        assert!((frame.rms() - 0.5).abs() < 1e-6);
    }
}
