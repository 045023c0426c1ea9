//! `StubAnnouncer` — logs the phrase and completes immediately.
//!
//! Used by the headless host and in development before a platform TTS
//! backend is wired in, so the full session loop can be exercised
//! end-to-end without audio hardware.

use tracing::info;

use crate::error::Result;
use crate::speech::{AnnounceDone, AnnounceOutcome, AnnounceRequest, Announcer};

/// Prints each announcement and reports `Finished` synchronously.
#[derive(Debug, Default)]
pub struct StubAnnouncer {
    spoken: u64,
}

impl StubAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Announcer for StubAnnouncer {
    fn speak(&mut self, request: AnnounceRequest, done: AnnounceDone) -> Result<()> {
        self.spoken += 1;
        info!(
            step_index = request.step_index,
            phrase = %request.phrase,
            "announce"
        );
        done(AnnounceOutcome::Finished);
        Ok(())
    }

    fn cancel(&mut self) {
        // Completions are synchronous; nothing is ever in flight.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn completes_exactly_once_per_speak() {
        let mut announcer = StubAnnouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);

        announcer
            .speak(
                AnnounceRequest {
                    phrase: "Machine M01.".into(),
                    step_index: 1,
                    epoch: 0,
                },
                Box::new(move |outcome| {
                    assert_eq!(outcome, AnnounceOutcome::Finished);
                    fired_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("speak");
        announcer.cancel();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
