//! Blocking session loop.
//!
//! ## Message flow
//!
//! ```text
//! UI / remote actions ─┐
//! announcer callbacks ─┼─► SessionMsg queue ─► handle() ─► phase transition
//! listener events ─────┘        (single thread, no locks on state)
//! ```
//!
//! Every external callback is marshalled into one crossbeam channel and
//! processed on this thread, so `EngineState` needs no synchronization.
//! Announcement completions and listener events carry the epoch active at
//! dispatch time; anything from a superseded epoch is dropped here, which is
//! how a manual action racing a callback always wins.
//!
//! The whole loop runs in `spawn_blocking`, keeping the Tokio executor free
//! for the host's I/O.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    command::{parse_transcript, VoiceCommand},
    error::PacklineError,
    ipc::events::{
        HeardEvent, SessionFault, SessionPhase, SessionSnapshot, SessionStatusEvent, StepEvent,
    },
    listen::{ListenErrorKind, ListenEvent, ListenSink, ListenTurn, ListenerHandle},
    sequence::Step,
    speech::{AnnounceDone, AnnounceOutcome, AnnounceRequest, AnnouncerHandle},
    store::CompletionStoreHandle,
};

/// Manual / remote operations on a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Complete the current item (if any) and move to the next step.
    Advance,
    /// Announce the current step again.
    Repeat,
    /// Move back one step, un-marking its completion.
    StepBackward,
    /// Tear the session down.
    Stop,
}

/// Everything the loop can receive, funneled through one queue.
pub(crate) enum SessionMsg {
    Action(SessionAction),
    Announce {
        step_index: usize,
        epoch: u64,
        outcome: AnnounceOutcome,
    },
    Listen(ListenEvent),
}

pub struct SessionDiagnostics {
    pub announcements_dispatched: AtomicUsize,
    pub announcements_completed: AtomicUsize,
    pub announcement_failures: AtomicUsize,
    pub listen_turns: AtomicUsize,
    pub transcripts_heard: AtomicUsize,
    pub commands_recognized: AtomicUsize,
    pub stale_events_dropped: AtomicUsize,
    pub completion_writes: AtomicUsize,
    pub completion_write_failures: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            announcements_dispatched: AtomicUsize::new(0),
            announcements_completed: AtomicUsize::new(0),
            announcement_failures: AtomicUsize::new(0),
            listen_turns: AtomicUsize::new(0),
            transcripts_heard: AtomicUsize::new(0),
            commands_recognized: AtomicUsize::new(0),
            stale_events_dropped: AtomicUsize::new(0),
            completion_writes: AtomicUsize::new(0),
            completion_write_failures: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.announcements_dispatched.store(0, Ordering::Relaxed);
        self.announcements_completed.store(0, Ordering::Relaxed);
        self.announcement_failures.store(0, Ordering::Relaxed);
        self.listen_turns.store(0, Ordering::Relaxed);
        self.transcripts_heard.store(0, Ordering::Relaxed);
        self.commands_recognized.store(0, Ordering::Relaxed);
        self.stale_events_dropped.store(0, Ordering::Relaxed);
        self.completion_writes.store(0, Ordering::Relaxed);
        self.completion_write_failures.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            announcements_dispatched: self.announcements_dispatched.load(Ordering::Relaxed),
            announcements_completed: self.announcements_completed.load(Ordering::Relaxed),
            announcement_failures: self.announcement_failures.load(Ordering::Relaxed),
            listen_turns: self.listen_turns.load(Ordering::Relaxed),
            transcripts_heard: self.transcripts_heard.load(Ordering::Relaxed),
            commands_recognized: self.commands_recognized.load(Ordering::Relaxed),
            stale_events_dropped: self.stale_events_dropped.load(Ordering::Relaxed),
            completion_writes: self.completion_writes.load(Ordering::Relaxed),
            completion_write_failures: self.completion_write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub announcements_dispatched: usize,
    pub announcements_completed: usize,
    pub announcement_failures: usize,
    pub listen_turns: usize,
    pub transcripts_heard: usize,
    pub commands_recognized: usize,
    pub stale_events_dropped: usize,
    pub completion_writes: usize,
    pub completion_write_failures: usize,
}

/// All context the loop needs, passed as one struct so the closure stays tidy.
pub(crate) struct EngineCtx {
    pub steps: Vec<Step>,
    pub completion_phrase: String,
    pub listen_enabled: bool,
    pub announcer: AnnouncerHandle,
    pub listener: ListenerHandle,
    pub completion: CompletionStoreHandle,
    pub msg_tx: Sender<SessionMsg>,
    pub msg_rx: Receiver<SessionMsg>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub step_tx: broadcast::Sender<StepEvent>,
    pub heard_tx: broadcast::Sender<HeardEvent>,
    pub snapshot: Arc<Mutex<SessionSnapshot>>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<SessionDiagnostics>,
    pub running: Arc<AtomicBool>,
}

struct EngineState {
    current: usize,
    phase: SessionPhase,
    /// Bumped on every announcement dispatch or cancellation; completions
    /// from older epochs are stale.
    announce_epoch: u64,
    /// Bumped on every listening turn start or cancellation.
    listen_epoch: u64,
    /// True between announcement dispatch and its (non-stale) completion.
    announce_inflight: bool,
    /// True between `begin` and the turn's `Ready` event.
    listen_setup_inflight: bool,
    /// Set when listening is disabled or permission was denied; the session
    /// idle-waits in `Announcing` and moves on manual/remote controls only.
    listening_unavailable: bool,
    /// Advance honored at most once per visit to the current step.
    command_handled: bool,
    last_error: Option<String>,
    last_heard: Option<String>,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// Run the session loop until a stop action arrives or every controller
/// handle is dropped.
pub(crate) fn run(mut ctx: EngineCtx) {
    let mut st = EngineState {
        current: 0,
        phase: SessionPhase::Idle,
        announce_epoch: 0,
        listen_epoch: 0,
        announce_inflight: false,
        listen_setup_inflight: false,
        listening_unavailable: !ctx.listen_enabled,
        command_handled: false,
        last_error: None,
        last_heard: None,
    };

    info!(
        steps = ctx.steps.len(),
        voice = ctx.listen_enabled,
        "packing session started"
    );
    enter_announcing(&mut ctx, &mut st, true);

    loop {
        match ctx.msg_rx.recv() {
            Ok(msg) => {
                if handle(&mut ctx, &mut st, msg) == Flow::Stop {
                    break;
                }
                // Speech output and speech input share one audio device.
                debug_assert!(
                    !(st.announce_inflight && st.phase == SessionPhase::Listening),
                    "announcing and listening overlap"
                );
            }
            Err(_) => {
                // Controller dropped without an explicit stop.
                teardown(&mut ctx, &mut st);
                break;
            }
        }
    }

    ctx.running.store(false, Ordering::SeqCst);
    let snap = ctx.diagnostics.snapshot();
    info!(
        announcements = snap.announcements_dispatched,
        listen_turns = snap.listen_turns,
        commands = snap.commands_recognized,
        stale_dropped = snap.stale_events_dropped,
        completion_writes = snap.completion_writes,
        "session loop exited — diagnostics"
    );
}

fn handle(ctx: &mut EngineCtx, st: &mut EngineState, msg: SessionMsg) -> Flow {
    match msg {
        SessionMsg::Action(SessionAction::Advance) => do_advance(ctx, st),
        SessionMsg::Action(SessionAction::Repeat) => do_repeat(ctx, st),
        SessionMsg::Action(SessionAction::StepBackward) => do_step_backward(ctx, st),
        SessionMsg::Action(SessionAction::Stop) => {
            teardown(ctx, st);
            return Flow::Stop;
        }
        SessionMsg::Announce {
            step_index,
            epoch,
            outcome,
        } => on_announce(ctx, st, step_index, epoch, outcome),
        SessionMsg::Listen(event) => on_listen(ctx, st, event),
    }
    Flow::Continue
}

// ── Transitions ──────────────────────────────────────────────────────────

fn enter_announcing(ctx: &mut EngineCtx, st: &mut EngineState, new_visit: bool) {
    cancel_listening(ctx, st);
    if new_visit {
        st.command_handled = false;
    }
    st.phase = SessionPhase::Announcing;
    emit_step(ctx, st);
    publish_status(ctx, st, None, None);
    let phrase = ctx.steps[st.current].spoken_phrase();
    dispatch_announce(ctx, st, phrase);
}

fn enter_complete(ctx: &mut EngineCtx, st: &mut EngineState) {
    cancel_listening(ctx, st);
    st.phase = SessionPhase::Complete;
    info!("packing session complete");
    publish_status(ctx, st, None, None);
    let phrase = ctx.completion_phrase.clone();
    dispatch_announce(ctx, st, phrase);
}

fn do_advance(ctx: &mut EngineCtx, st: &mut EngineState) {
    if st.phase == SessionPhase::Complete {
        debug!("advance ignored — session already complete");
        return;
    }
    if st.announce_inflight {
        cancel_announcement(ctx, st);
    }
    let ids = ctx.steps[st.current].source_task_ids().to_vec();
    if !ids.is_empty() {
        write_completion(ctx, st, &ids, true);
    }
    st.current += 1;
    if st.current >= ctx.steps.len() {
        enter_complete(ctx, st);
    } else {
        enter_announcing(ctx, st, true);
    }
}

fn do_repeat(ctx: &mut EngineCtx, st: &mut EngineState) {
    cancel_announcement(ctx, st);
    if st.phase == SessionPhase::Complete {
        // Replay the completion phrase; position and completion untouched.
        cancel_listening(ctx, st);
        publish_status(ctx, st, None, None);
        let phrase = ctx.completion_phrase.clone();
        dispatch_announce(ctx, st, phrase);
        return;
    }
    // Same visit: the advance latch is deliberately left alone.
    enter_announcing(ctx, st, false);
}

fn do_step_backward(ctx: &mut EngineCtx, st: &mut EngineState) {
    if st.phase == SessionPhase::Complete {
        // Re-open the sequence on its last step.
        cancel_announcement(ctx, st);
        st.current = ctx.steps.len() - 1;
        let ids = ctx.steps[st.current].source_task_ids().to_vec();
        if !ids.is_empty() {
            write_completion(ctx, st, &ids, false);
        }
        enter_announcing(ctx, st, true);
        return;
    }
    if st.current == 0 {
        debug!("step backward at first step — no-op");
        return;
    }
    cancel_announcement(ctx, st);
    st.current -= 1;
    let ids = ctx.steps[st.current].source_task_ids().to_vec();
    if !ids.is_empty() {
        write_completion(ctx, st, &ids, false);
    }
    enter_announcing(ctx, st, true);
}

fn teardown(ctx: &mut EngineCtx, st: &mut EngineState) {
    cancel_announcement(ctx, st);
    cancel_listening(ctx, st);
    st.phase = SessionPhase::Idle;
    st.last_heard = None;
    st.last_error = None;
    publish_status(ctx, st, None, None);
    info!("packing session stopped");
}

// ── Announcement handling ────────────────────────────────────────────────

fn dispatch_announce(ctx: &mut EngineCtx, st: &mut EngineState, phrase: String) {
    st.announce_epoch += 1;
    st.announce_inflight = true;
    ctx.diagnostics
        .announcements_dispatched
        .fetch_add(1, Ordering::Relaxed);

    let tx = ctx.msg_tx.clone();
    let step_index = st.current;
    let epoch = st.announce_epoch;
    let done: AnnounceDone = Box::new(move |outcome| {
        let _ = tx.send(SessionMsg::Announce {
            step_index,
            epoch,
            outcome,
        });
    });

    let request = AnnounceRequest {
        phrase,
        step_index,
        epoch,
    };
    let result = ctx.announcer.0.lock().speak(request, done);
    if let Err(e) = result {
        // `done` was never invoked; route the failure through the queue so
        // the transition logic stays single-path.
        let _ = ctx.msg_tx.send(SessionMsg::Announce {
            step_index,
            epoch,
            outcome: AnnounceOutcome::Failed(e.to_string()),
        });
    }
}

fn cancel_announcement(ctx: &mut EngineCtx, st: &mut EngineState) {
    st.announce_epoch += 1;
    st.announce_inflight = false;
    ctx.announcer.0.lock().cancel();
}

fn on_announce(
    ctx: &mut EngineCtx,
    st: &mut EngineState,
    step_index: usize,
    epoch: u64,
    outcome: AnnounceOutcome,
) {
    if epoch != st.announce_epoch || step_index != st.current {
        ctx.diagnostics
            .stale_events_dropped
            .fetch_add(1, Ordering::Relaxed);
        debug!(step_index, epoch, "stale announcement completion dropped");
        return;
    }
    st.announce_inflight = false;

    match outcome {
        AnnounceOutcome::Failed(message) => {
            ctx.diagnostics
                .announcement_failures
                .fetch_add(1, Ordering::Relaxed);
            // Proceed as finished below so the user is never stuck.
            fault(ctx, st, SessionFault::AnnouncementFailure, message);
        }
        AnnounceOutcome::Finished | AnnounceOutcome::Cancelled => {
            ctx.diagnostics
                .announcements_completed
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    if st.phase == SessionPhase::Complete {
        // The completion phrase ended; nothing follows.
        return;
    }

    if ctx.steps[st.current].is_item() {
        begin_listening(ctx, st);
    } else {
        // Markers are pure narration — no listening phase.
        do_advance(ctx, st);
    }
}

// ── Listening handling ───────────────────────────────────────────────────

fn begin_listening(ctx: &mut EngineCtx, st: &mut EngineState) {
    if st.listening_unavailable {
        debug!("listening unavailable — holding for manual controls");
        return;
    }
    st.listen_epoch += 1;
    st.listen_setup_inflight = true;
    ctx.diagnostics.listen_turns.fetch_add(1, Ordering::Relaxed);

    let tx = ctx.msg_tx.clone();
    let sink: ListenSink = Arc::new(move |event| {
        let _ = tx.send(SessionMsg::Listen(event));
    });
    let turn = ListenTurn {
        epoch: st.listen_epoch,
    };
    let result = ctx.listener.0.lock().begin(turn, sink);
    if let Err(e) = result {
        st.listen_setup_inflight = false;
        match e {
            PacklineError::PermissionDenied(message) => {
                st.listening_unavailable = true;
                fault(ctx, st, SessionFault::PermissionDenied, message);
            }
            other => fault(ctx, st, SessionFault::FatalRecognition, other.to_string()),
        }
    }
}

fn cancel_listening(ctx: &mut EngineCtx, st: &mut EngineState) {
    st.listen_epoch += 1;
    st.listen_setup_inflight = false;
    ctx.listener.0.lock().cancel();
}

fn on_listen(ctx: &mut EngineCtx, st: &mut EngineState, event: ListenEvent) {
    if event.epoch() != st.listen_epoch {
        ctx.diagnostics
            .stale_events_dropped
            .fetch_add(1, Ordering::Relaxed);
        if matches!(event, ListenEvent::Ready { .. }) {
            // Setup completed for a superseded turn — unwind its resources
            // rather than letting it capture into the void.
            ctx.listener.0.lock().cancel();
        }
        debug!(epoch = event.epoch(), "stale listener event dropped");
        return;
    }

    match event {
        ListenEvent::Ready { .. } => {
            st.listen_setup_inflight = false;
            if !st.announce_inflight
                && matches!(
                    st.phase,
                    SessionPhase::Announcing | SessionPhase::Listening
                )
            {
                if st.phase != SessionPhase::Listening {
                    st.phase = SessionPhase::Listening;
                    publish_status(ctx, st, None, None);
                }
            } else {
                debug!(phase = ?st.phase, "listen ready arrived in a non-listening phase");
            }
        }

        ListenEvent::Transcript { text, is_final, .. } => {
            ctx.diagnostics
                .transcripts_heard
                .fetch_add(1, Ordering::Relaxed);
            st.last_heard = Some(text.clone());
            let _ = ctx.heard_tx.send(HeardEvent {
                seq: next_seq(ctx),
                text: text.clone(),
                is_final,
            });
            update_snapshot(ctx, st);

            match parse_transcript(&text) {
                Some(VoiceCommand::NextItem) => {
                    if st.command_handled {
                        debug!("advance already handled for this step visit");
                        return;
                    }
                    st.command_handled = true;
                    ctx.diagnostics
                        .commands_recognized
                        .fetch_add(1, Ordering::Relaxed);
                    info!(%text, "voice command: next item");
                    do_advance(ctx, st);
                }
                Some(VoiceCommand::RepeatItem) => {
                    ctx.diagnostics
                        .commands_recognized
                        .fetch_add(1, Ordering::Relaxed);
                    info!(%text, "voice command: repeat item");
                    do_repeat(ctx, st);
                }
                None => {
                    if is_final && st.phase == SessionPhase::Listening {
                        debug!("utterance ended without a command — reopening capture");
                        begin_listening(ctx, st);
                    }
                }
            }
        }

        ListenEvent::Error { kind, message, .. } => {
            st.listen_setup_inflight = false;
            match kind {
                ListenErrorKind::PermissionDenied => {
                    st.listening_unavailable = true;
                    if st.phase == SessionPhase::Listening {
                        st.phase = SessionPhase::Announcing;
                    }
                    fault(ctx, st, SessionFault::PermissionDenied, message);
                }
                ListenErrorKind::Transient => {
                    debug!(%message, "transient recognition error — restarting listening");
                    let on_item = ctx
                        .steps
                        .get(st.current)
                        .map(Step::is_item)
                        .unwrap_or(false);
                    if on_item
                        && !st.announce_inflight
                        && matches!(
                            st.phase,
                            SessionPhase::Announcing | SessionPhase::Listening
                        )
                    {
                        begin_listening(ctx, st);
                    }
                }
                ListenErrorKind::Fatal => {
                    if st.phase == SessionPhase::Listening {
                        st.phase = SessionPhase::Announcing;
                    }
                    fault(ctx, st, SessionFault::FatalRecognition, message);
                }
            }
        }
    }
}

// ── Bookkeeping ──────────────────────────────────────────────────────────

fn write_completion(ctx: &mut EngineCtx, st: &mut EngineState, ids: &[String], completed: bool) {
    ctx.diagnostics
        .completion_writes
        .fetch_add(1, Ordering::Relaxed);
    match ctx.completion.set_completed(ids, completed) {
        Ok(()) => debug!(count = ids.len(), completed, "completion write"),
        Err(e) => {
            ctx.diagnostics
                .completion_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, count = ids.len(), "completion write failed");
            st.last_error = Some(format!("completion write failed: {e}"));
            let detail = st.last_error.clone();
            publish_status(ctx, st, None, detail);
        }
    }
}

fn fault(ctx: &mut EngineCtx, st: &mut EngineState, fault: SessionFault, message: String) {
    warn!(?fault, %message, "session fault");
    st.last_error = Some(message.clone());
    publish_status(ctx, st, Some(fault), Some(message));
}

fn next_seq(ctx: &EngineCtx) -> u64 {
    ctx.seq.fetch_add(1, Ordering::Relaxed)
}

fn total_items(steps: &[Step]) -> usize {
    steps.iter().filter(|s| s.is_item()).count()
}

fn completed_items(steps: &[Step], current: usize) -> usize {
    steps[..current.min(steps.len())]
        .iter()
        .filter(|s| s.is_item())
        .count()
}

fn emit_step(ctx: &mut EngineCtx, st: &EngineState) {
    if let Some(step) = ctx.steps.get(st.current) {
        let _ = ctx.step_tx.send(StepEvent {
            seq: next_seq(ctx),
            index: st.current,
            total: ctx.steps.len(),
            completed_items: completed_items(&ctx.steps, st.current),
            total_items: total_items(&ctx.steps),
            step: step.clone(),
        });
    }
}

fn publish_status(
    ctx: &mut EngineCtx,
    st: &mut EngineState,
    fault: Option<SessionFault>,
    detail: Option<String>,
) {
    let _ = ctx.status_tx.send(SessionStatusEvent {
        seq: next_seq(ctx),
        phase: st.phase,
        fault,
        detail,
    });
    update_snapshot(ctx, st);
}

fn update_snapshot(ctx: &EngineCtx, st: &EngineState) {
    let mut snapshot = ctx.snapshot.lock();
    if st.phase == SessionPhase::Idle {
        *snapshot = SessionSnapshot::idle();
        return;
    }
    let total = total_items(&ctx.steps);
    let completed = completed_items(&ctx.steps, st.current);
    *snapshot = SessionSnapshot {
        phase: st.phase,
        current_index: (st.current < ctx.steps.len()).then_some(st.current),
        total_steps: ctx.steps.len(),
        completed_items: completed,
        total_items: total,
        progress: if total == 0 {
            0.0
        } else {
            completed as f32 / total as f32
        },
        last_error: st.last_error.clone(),
        last_heard: st.last_heard.clone(),
    };
}
