//! Scripted listener and recognizer stubs.
//!
//! `ScriptedListener` replays a fixed script of events per turn — enough to
//! exercise the whole session loop without a microphone. The headless host
//! uses it when voice input is disabled.

use std::collections::VecDeque;

use tracing::debug;

use crate::buffering::frame::AudioFrame;
use crate::error::Result;
use crate::listen::{
    CommandListener, ListenEvent, ListenSink, ListenTurn, TranscriptRecognizer,
};

/// Events to replay for one listening turn, without their epoch (the stub
/// stamps the turn's epoch on delivery).
#[derive(Debug, Clone)]
pub enum ScriptedUpdate {
    Ready,
    Transcript { text: String, is_final: bool },
}

/// Replays one scripted turn per `begin` call, synchronously.
pub struct ScriptedListener {
    turns: VecDeque<Vec<ScriptedUpdate>>,
    pub turns_started: u64,
    pub cancels: u64,
}

impl ScriptedListener {
    pub fn new(turns: Vec<Vec<ScriptedUpdate>>) -> Self {
        Self {
            turns: turns.into(),
            turns_started: 0,
            cancels: 0,
        }
    }

    /// A listener whose every turn becomes ready and then hears nothing.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }
}

impl CommandListener for ScriptedListener {
    fn begin(&mut self, turn: ListenTurn, events: ListenSink) -> Result<()> {
        self.turns_started += 1;
        let script = self.turns.pop_front().unwrap_or(vec![ScriptedUpdate::Ready]);
        for update in script {
            let event = match update {
                ScriptedUpdate::Ready => ListenEvent::Ready { epoch: turn.epoch },
                ScriptedUpdate::Transcript { text, is_final } => ListenEvent::Transcript {
                    epoch: turn.epoch,
                    text,
                    is_final,
                },
            };
            events(event);
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancels += 1;
        debug!("scripted listener cancel");
    }
}

/// Echo-style recognizer stub: reports the frame's size instead of real
/// speech. Lets the microphone listener run end-to-end before a model
/// backend is integrated.
#[derive(Debug, Default)]
pub struct StubRecognizer {
    utterances: u64,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TranscriptRecognizer for StubRecognizer {
    fn transcribe(&mut self, frame: &AudioFrame, partial: bool) -> Result<String> {
        if frame.samples.len() < 160 {
            return Ok(String::new());
        }
        if partial {
            return Ok("\u{2026}".into());
        }
        self.utterances += 1;
        Ok(format!(
            "[stub: {} samples @ {} Hz]",
            frame.samples.len(),
            frame.sample_rate
        ))
    }

    fn reset(&mut self) {
        debug!("StubRecognizer::reset");
    }
}
