//! Command listener abstraction.
//!
//! A listening turn is a continuous-stream capture: the listener opens its
//! resources (microphone, recognition channel), signals `Ready`, then posts
//! live transcript updates until an utterance finalizes or the turn is
//! cancelled. Setup itself may span suspension points, so cancellation is a
//! token checked at each resumption point — never a bare boolean alone.
//!
//! Events carry the controller epoch the turn was started with; the
//! controller drops anything from a superseded epoch, which is how a cancel
//! racing an in-flight setup always wins.

pub mod stub;

#[cfg(feature = "audio-cpal")]
pub mod mic;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffering::frame::AudioFrame;
use crate::error::Result;

/// Classifies listener errors for the controller's fault handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenErrorKind {
    /// Microphone/recognition permission denied — degrade to manual-only.
    PermissionDenied,
    /// Benign (no speech detected, self-inflicted cancellation) — restart.
    Transient,
    /// Anything else — surface, keep the session usable.
    Fatal,
}

/// Events a listening turn posts back to the controller.
#[derive(Debug, Clone)]
pub enum ListenEvent {
    /// Capture and recognition resources are open; the turn is live.
    Ready { epoch: u64 },
    /// A live transcript update. `is_final` marks the last update for the
    /// utterance.
    Transcript {
        epoch: u64,
        text: String,
        is_final: bool,
    },
    /// The turn failed. No further events follow for this epoch.
    Error {
        epoch: u64,
        kind: ListenErrorKind,
        message: String,
    },
}

impl ListenEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            ListenEvent::Ready { epoch }
            | ListenEvent::Transcript { epoch, .. }
            | ListenEvent::Error { epoch, .. } => *epoch,
        }
    }
}

/// Callback sink the controller hands to `begin`; marshals events onto the
/// controller's single-threaded state-update path.
pub type ListenSink = Arc<dyn Fn(ListenEvent) + Send + Sync>;

/// Parameters for one listening turn.
#[derive(Debug, Clone, Copy)]
pub struct ListenTurn {
    /// Controller epoch; stamped on every event of this turn.
    pub epoch: u64,
}

/// Contract for command-listening backends.
pub trait CommandListener: Send + 'static {
    /// Start a listening turn. Returns once dispatch has begun; resource
    /// acquisition continues asynchronously and is reported via `Ready` (or
    /// an `Error` event) on the sink.
    ///
    /// # Errors
    /// Returns an error only when the turn could not be dispatched at all.
    fn begin(&mut self, turn: ListenTurn, events: ListenSink) -> Result<()>;

    /// Cancel the current turn, including one whose setup is still in
    /// flight: partially-acquired resources must be unwound. Idempotent.
    fn cancel(&mut self);
}

/// Thread-safe reference-counted handle to any [`CommandListener`].
#[derive(Clone)]
pub struct ListenerHandle(pub Arc<Mutex<dyn CommandListener>>);

impl ListenerHandle {
    pub fn new<L: CommandListener>(listener: L) -> Self {
        Self(Arc::new(Mutex::new(listener)))
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").finish_non_exhaustive()
    }
}

/// Recognition backend behind the microphone listener: converts accumulated
/// speech audio into a transcript.
///
/// `&mut self` expresses that decoders are stateful; mutation is serialised
/// through [`RecognizerHandle`]'s mutex.
pub trait TranscriptRecognizer: Send + 'static {
    /// Transcribe a mono f32 frame. `partial` requests a cheap streaming
    /// hypothesis; the definitive pass sends `partial = false`.
    ///
    /// An empty string means no speech was recognized.
    fn transcribe(&mut self, frame: &AudioFrame, partial: bool) -> Result<String>;

    /// Reset decoder state between utterances.
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any [`TranscriptRecognizer`].
#[derive(Clone)]
pub struct RecognizerHandle(pub Arc<Mutex<dyn TranscriptRecognizer>>);

impl RecognizerHandle {
    pub fn new<R: TranscriptRecognizer>(recognizer: R) -> Self {
        Self(Arc::new(Mutex::new(recognizer)))
    }
}

impl std::fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerHandle").finish_non_exhaustive()
    }
}
