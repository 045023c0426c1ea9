//! Audio plumbing via the cpal backend: command capture and the silent
//! keep-alive output stream.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block on a lock, or perform I/O. The callback
//! therefore writes straight into an SPSC ring buffer producer whose
//! `push_slice` is lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Both stream types here must be created and dropped on the same
//! thread. The session loop and the listener worker satisfy this by opening
//! streams inside their own threads.

pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{error, info, warn};

use crate::{
    buffering::{CaptureProducer, Producer},
    error::{PacklineError, Result},
};

/// Handle to an active microphone capture stream.
///
/// **Not `Send`** — create and drop on the same OS thread.
pub struct CaptureStream {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to make the callback a no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl CaptureStream {
    /// Open an input device, preferring `preferred_device_name` when given,
    /// and push mono f32 PCM frames into `producer`.
    ///
    /// # Errors
    /// `PacklineError::NoDefaultInputDevice` when no microphone exists;
    /// `PacklineError::PermissionDenied` / `AudioStream` on cpal failures.
    pub fn open(
        mut producer: CaptureProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let mut device = None;
        if let Some(wanted) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    device = devices
                        .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
                    if device.is_none() {
                        warn!("preferred input device '{wanted}' not found, falling back");
                    }
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }
        let device = match device.or_else(|| host.default_input_device()) {
            Some(d) => d,
            None => return Err(PacklineError::NoDefaultInputDevice),
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening command capture device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_cb = Arc::clone(&running);
        let mut mix_buf: Vec<f32> = Vec::new();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    if channels == 1 {
                        push_all(&mut producer, data);
                        return;
                    }
                    downmix(data, channels, &mut mix_buf, |s| s);
                    push_all(&mut producer, &mix_buf);
                },
                |err| error!("capture stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix(data, channels, &mut mix_buf, |s| s as f32 / 32768.0);
                    push_all(&mut producer, &mix_buf);
                },
                |err| error!("capture stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(PacklineError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| classify_device_error(e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_device_error(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CaptureStream {
    pub fn open(
        _producer: CaptureProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(PacklineError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn push_all(producer: &mut CaptureProducer, samples: &[f32]) {
    let written = producer.push_slice(samples);
    if written < samples.len() {
        warn!(
            "capture ring full: dropped {} frames",
            samples.len() - written
        );
    }
}

#[cfg(feature = "audio-cpal")]
fn downmix<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += to_f32(data[base + c]);
        }
        out[f] = sum / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn classify_device_error(message: String) -> PacklineError {
    // Host APIs report denied microphone access as a stream/config error with
    // wording that varies per platform; match the common substrings.
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("access") {
        PacklineError::PermissionDenied(message)
    } else {
        PacklineError::AudioStream(message)
    }
}

/// A silent, looping output stream that holds the audio subsystem open
/// between discrete announce/listen operations, so the OS does not suspend
/// the route mid-session.
///
/// **Not `Send`** — acquired at session start inside the loop thread and
/// dropped there when the session stops.
pub struct KeepAliveStream {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
}

#[cfg(feature = "audio-cpal")]
impl KeepAliveStream {
    /// Open the default output device and start playing silence.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PacklineError::AudioDevice("no default output device".into()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| PacklineError::AudioDevice(e.to_string()))?;
        let config: StreamConfig = supported.config();

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate = config.sample_rate.0,
            "starting keep-alive output stream"
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    data.fill(0.0);
                },
                |err| error!("keep-alive stream error: {err}"),
                None,
            )
            .map_err(|e| PacklineError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PacklineError::AudioStream(e.to_string()))?;

        Ok(Self { _stream: stream })
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl KeepAliveStream {
    pub fn open() -> Result<Self> {
        Err(PacklineError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
