//! Announcement engine abstraction.
//!
//! The `Announcer` trait decouples the session controller from any specific
//! text-to-speech backend (platform TTS, cloud synthesis, the dev stub).
//!
//! Completion is reported through a one-shot callback rather than a return
//! value: synthesis is fire-and-forget and finishes on an
//! implementation-defined thread. The controller wraps the callback so the
//! outcome is marshalled onto its single-threaded state-update path, keyed
//! by the step index and epoch active at dispatch time — a late callback for
//! a step the session has already moved past is discarded there.

pub mod stub;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// How an announcement ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// Playback reached the end of the phrase.
    Finished,
    /// Playback was cancelled before completion. Leads to the same phase
    /// transition as `Finished` — the controller distinguishes stale
    /// cancellations by epoch, not by outcome.
    Cancelled,
    /// Synthesis or playback failed.
    Failed(String),
}

/// One announcement dispatch.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Text handed to the synthesizer.
    pub phrase: String,
    /// Step index active at dispatch time.
    pub step_index: usize,
    /// Controller epoch at dispatch time; stale completions are dropped.
    pub epoch: u64,
}

/// Exactly-once completion callback for an announcement.
pub type AnnounceDone = Box<dyn FnOnce(AnnounceOutcome) + Send>;

/// Contract for announcement backends.
pub trait Announcer: Send + 'static {
    /// Begin speaking `request.phrase`. Must invoke `done` exactly once —
    /// with `Finished` on natural completion, `Cancelled` after `cancel()`,
    /// or `Failed` on error. May complete synchronously.
    ///
    /// # Errors
    /// Returns an error only when the request could not be dispatched at
    /// all; in that case `done` must not have been invoked.
    fn speak(&mut self, request: AnnounceRequest, done: AnnounceDone) -> Result<()>;

    /// Cancel the in-flight announcement, if any. Idempotent: cancelling
    /// when nothing is playing (or the phrase already finished) is a no-op
    /// and must not fire a second completion.
    fn cancel(&mut self);
}

/// Thread-safe reference-counted handle to any [`Announcer`] implementor.
#[derive(Clone)]
pub struct AnnouncerHandle(pub Arc<Mutex<dyn Announcer>>);

impl AnnouncerHandle {
    pub fn new<A: Announcer>(announcer: A) -> Self {
        Self(Arc::new(Mutex::new(announcer)))
    }
}

impl std::fmt::Debug for AnnouncerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnouncerHandle").finish_non_exhaustive()
    }
}
