//! Event types broadcast by the session controller.
//!
//! | Event | Channel |
//! |-------|---------|
//! | [`SessionStatusEvent`] | `PackSession::subscribe_status` |
//! | [`StepEvent`] | `PackSession::subscribe_steps` |
//! | [`HeardEvent`] | `PackSession::subscribe_heard` |
//!
//! The UI layer only ever reads these (plus [`SessionSnapshot`]); no fault
//! propagates across the controller boundary as an error.

use serde::{Deserialize, Serialize};

use crate::sequence::Step;

/// Phase of the packing session. `Announcing` and `Listening` are mutually
/// exclusive by construction — speech output and speech input share one
/// audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// No session running (pre-start, or after stop).
    Idle,
    /// Synthesized speech for the current step is playing (or the session is
    /// idle-waiting on manual controls because listening is unavailable).
    Announcing,
    /// Continuous speech capture is active, awaiting a command phrase.
    Listening,
    /// All steps consumed. Terminal until stop or a backward step.
    Complete,
}

/// Fault taxonomy surfaced through the status detail / snapshot error field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionFault {
    /// Terminal "nothing to do" — not an error condition.
    NoTasks,
    /// Microphone/recognition permission denied. The session degrades to
    /// announce-only with manual controls.
    PermissionDenied,
    /// Benign recognizer hiccup; listening restarts automatically.
    TransientRecognition,
    /// Recognizer failure worth showing. The session continues.
    FatalRecognition,
    /// The announcement engine failed; the controller proceeds anyway so the
    /// user is never stuck.
    AnnouncementFailure,
}

/// Emitted whenever the session phase changes or a fault is surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub phase: SessionPhase,
    pub fault: Option<SessionFault>,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Emitted when the current step changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub seq: u64,
    /// Index of the step now current.
    pub index: usize,
    pub total: usize,
    /// Item steps already completed this session.
    pub completed_items: usize,
    pub total_items: usize,
    pub step: Step,
}

/// Diagnostic echo of what the command listener heard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeardEvent {
    pub seq: u64,
    pub text: String,
    /// Marks the last update for an utterance.
    pub is_final: bool,
}

/// Point-in-time view of the session, readable at any moment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// `None` before start and after stop.
    pub current_index: Option<usize>,
    pub total_steps: usize,
    pub completed_items: usize,
    pub total_items: usize,
    /// `completed_items / total_items`, 0.0 when there are no items.
    pub progress: f32,
    pub last_error: Option<String>,
    /// Diagnostic only — most recent transcript heard.
    pub last_heard: Option<String>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            current_index: None,
            total_steps: 0,
            completed_items: 0,
            total_items: 0,
            progress: 0.0,
            last_error: None,
            last_heard: None,
        }
    }
}
