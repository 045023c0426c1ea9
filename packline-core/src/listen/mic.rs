//! Microphone-backed command listener.
//!
//! ## Turn lifecycle (one worker thread per turn)
//!
//! ```text
//! 1. Open the capture device inside the worker (cpal streams are !Send)
//! 2. Post Ready
//! 3. Drain ring → resample to the recognizer rate → accumulate speech
//! 4. Emit throttled partial transcripts while speech accumulates
//! 5. On sustained silence (or max accumulation) run the definitive pass,
//!    post the final transcript, end the turn
//! ```
//!
//! The cancellation token is checked before the device opens, after it
//! opens, and on every loop iteration — a cancel racing setup unwinds the
//! partially-acquired capture before any event past `Ready` is posted.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::audio::{resample::Resampler, CaptureStream};
use crate::buffering::{create_capture_ring, frame::AudioFrame, Consumer};
use crate::error::{PacklineError, Result};
use crate::listen::{
    CommandListener, ListenErrorKind, ListenEvent, ListenSink, ListenTurn, RecognizerHandle,
};

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty, to avoid burning a core.
const SLEEP_EMPTY_MS: u64 = 5;

/// Minimum interval between partial recognition passes.
const PARTIAL_MIN_INTERVAL: Duration = Duration::from_millis(700);

#[derive(Debug, Clone)]
pub struct MicListenerConfig {
    /// Rate the recognizer expects (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
    /// RMS below this counts as silence. Default: 0.012.
    pub silence_rms: f32,
    /// Consecutive silent chunks that end the utterance. Default: 25
    /// (≈ 500 ms at a 20 ms stride).
    pub silence_hangover_chunks: u32,
    /// Minimum accumulated speech (samples at the target rate) before any
    /// recognition pass runs. Default: 4000 (0.25 s).
    pub min_speech_samples: usize,
    /// Forced final pass after this much accumulation. Command phrases are
    /// short; default 160000 (10 s) is generous.
    pub max_speech_samples: usize,
}

impl Default for MicListenerConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            preferred_device: None,
            silence_rms: 0.012,
            silence_hangover_chunks: 25,
            min_speech_samples: 4_000,
            max_speech_samples: 160_000,
        }
    }
}

/// Continuous-capture listener feeding a pluggable recognizer.
pub struct MicListener {
    config: MicListenerConfig,
    recognizer: RecognizerHandle,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MicListener {
    pub fn new(config: MicListenerConfig, recognizer: RecognizerHandle) -> Self {
        Self {
            config,
            recognizer,
            cancel: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    fn cancel_current(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("listener worker panicked");
            }
        }
    }
}

impl Drop for MicListener {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

impl CommandListener for MicListener {
    fn begin(&mut self, turn: ListenTurn, events: ListenSink) -> Result<()> {
        self.cancel_current();

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Arc::clone(&cancel);

        let config = self.config.clone();
        let recognizer = self.recognizer.clone();
        let epoch = turn.epoch;

        self.worker = Some(std::thread::spawn(move || {
            run_turn(config, recognizer, epoch, cancel, events);
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancel_current();
    }
}

fn run_turn(
    config: MicListenerConfig,
    recognizer: RecognizerHandle,
    epoch: u64,
    cancel: Arc<AtomicBool>,
    events: ListenSink,
) {
    if cancel.load(Ordering::SeqCst) {
        return;
    }

    let (producer, mut consumer) = create_capture_ring();
    let capture_running = Arc::new(AtomicBool::new(true));

    // Open on THIS thread — the stream must be dropped here too.
    let capture = match CaptureStream::open(
        producer,
        Arc::clone(&capture_running),
        config.preferred_device.as_deref(),
    ) {
        Ok(c) => c,
        Err(e) => {
            let kind = match &e {
                PacklineError::PermissionDenied(_) => ListenErrorKind::PermissionDenied,
                _ => ListenErrorKind::Fatal,
            };
            events(ListenEvent::Error {
                epoch,
                kind,
                message: e.to_string(),
            });
            return;
        }
    };

    // Cancel may have raced the device open; unwind before going live.
    if cancel.load(Ordering::SeqCst) {
        capture.stop();
        return;
    }

    let mut resampler = match Resampler::new(
        capture.sample_rate,
        config.target_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            capture.stop();
            events(ListenEvent::Error {
                epoch,
                kind: ListenErrorKind::Fatal,
                message: e.to_string(),
            });
            return;
        }
    };

    info!(epoch, capture_rate = capture.sample_rate, "listening turn live");
    events(ListenEvent::Ready { epoch });

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut speech_buf: Vec<f32> = Vec::with_capacity(config.max_speech_samples);
    let mut heard_speech = false;
    let mut silent_chunks = 0u32;
    let mut last_partial_at: Option<Instant> = None;
    let mut outcome: Option<ListenEvent> = None;

    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let n = consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            continue;
        }
        let frame = AudioFrame::new(resampled, config.target_sample_rate);

        if frame.rms() >= config.silence_rms {
            heard_speech = true;
            silent_chunks = 0;
            speech_buf.extend_from_slice(&frame.samples);
        } else if heard_speech {
            silent_chunks += 1;
        }

        let utterance_over = heard_speech
            && (silent_chunks >= config.silence_hangover_chunks
                || speech_buf.len() >= config.max_speech_samples);

        if utterance_over && speech_buf.len() >= config.min_speech_samples {
            let frame = AudioFrame::new(speech_buf.clone(), config.target_sample_rate);
            let text = {
                let mut recognizer = recognizer.0.lock();
                let result = recognizer.transcribe(&frame, false);
                recognizer.reset();
                result
            };
            outcome = Some(match text {
                Ok(text) if text.trim().is_empty() => ListenEvent::Error {
                    epoch,
                    kind: ListenErrorKind::Transient,
                    message: "no speech detected".into(),
                },
                Ok(text) => ListenEvent::Transcript {
                    epoch,
                    text,
                    is_final: true,
                },
                Err(e) => ListenEvent::Error {
                    epoch,
                    kind: ListenErrorKind::Fatal,
                    message: e.to_string(),
                },
            });
            break;
        }

        if utterance_over {
            // Too short to recognize — treat as a benign false trigger.
            debug!(samples = speech_buf.len(), "utterance below minimum, restarting");
            speech_buf.clear();
            heard_speech = false;
            silent_chunks = 0;
            continue;
        }

        let partial_due = heard_speech
            && speech_buf.len() >= config.min_speech_samples
            && last_partial_at
                .map(|t| t.elapsed() >= PARTIAL_MIN_INTERVAL)
                .unwrap_or(true);
        if partial_due {
            let frame = AudioFrame::new(speech_buf.clone(), config.target_sample_rate);
            match recognizer.0.lock().transcribe(&frame, true) {
                Ok(text) if !text.trim().is_empty() => {
                    events(ListenEvent::Transcript {
                        epoch,
                        text,
                        is_final: false,
                    });
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "partial recognition failed"),
            }
            last_partial_at = Some(Instant::now());
        }
    }

    capture.stop();
    drop(capture);

    if cancel.load(Ordering::SeqCst) {
        debug!(epoch, "listening turn cancelled");
        return;
    }
    if let Some(event) = outcome {
        events(event);
    }
}
