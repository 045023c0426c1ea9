//! `PackSession` — top-level session lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! PackSession::new()
//!     └─► start(tasks)   → steps built, resources acquired, loop spawned,
//!         │                first announcement dispatched
//!         └─► stop()     → loop drains, resources released, phase = Idle
//! ```
//!
//! A session is single-shot state: `start()` while one is active returns
//! `SessionActive`, `stop()` is safe to call at any time.
//!
//! ## Threading
//!
//! The session loop runs in `spawn_blocking`. Audio resources (keep-alive
//! stream) are acquired *inside* the closure — cpal streams are `!Send` — and
//! the resulting hold lives on the loop's stack, so every exit path releases
//! it exactly once. A sync oneshot channel propagates acquisition failures
//! back to the `start()` caller.

pub mod engine;
pub mod resources;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    error::{PacklineError, Result},
    ipc::events::{
        HeardEvent, SessionFault, SessionPhase, SessionSnapshot, SessionStatusEvent, StepEvent,
    },
    listen::ListenerHandle,
    sequence::build_steps,
    speech::AnnouncerHandle,
    store::CompletionStoreHandle,
    task::PickTask,
};

pub use engine::{DiagnosticsSnapshot, SessionAction, SessionDiagnostics};
pub use resources::{NullResources, ResourceFactory, SessionHold};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `PackSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Phrase announced when every step is consumed.
    pub completion_phrase: String,
    /// When false, no listening turns are started and the session runs on
    /// manual/remote controls only.
    pub listen_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            completion_phrase: "All items packed.".into(),
            listen_enabled: true,
        }
    }
}

/// Hardware remote / media-key signals, mapped onto session actions.
///
/// Previous-track and play/pause both repeat the current step: the worker's
/// hands are full and "say it again" is the overwhelmingly common need.
/// Stepping backward stays a manual (UI) control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSignal {
    NextTrack,
    PreviousTrack,
    PlayPause,
}

impl RemoteSignal {
    fn action(self) -> SessionAction {
        match self {
            RemoteSignal::NextTrack => SessionAction::Advance,
            RemoteSignal::PreviousTrack | RemoteSignal::PlayPause => SessionAction::Repeat,
        }
    }
}

/// The top-level session handle.
///
/// `PackSession` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<PackSession>` to share between the host's command surface
/// and event-forwarding async tasks.
pub struct PackSession {
    config: SessionConfig,
    announcer: AnnouncerHandle,
    listener: ListenerHandle,
    completion: CompletionStoreHandle,
    resources: Arc<Mutex<Box<dyn ResourceFactory>>>,
    /// `true` while the session loop is active.
    running: Arc<AtomicBool>,
    /// Queue sender into the active loop; `None` when no session runs.
    msg_tx: Mutex<Option<crossbeam_channel::Sender<engine::SessionMsg>>>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    step_tx: broadcast::Sender<StepEvent>,
    heard_tx: broadcast::Sender<HeardEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl PackSession {
    /// Create a controller. Does not start anything — call `start()` with a
    /// run's pending tasks.
    pub fn new(
        config: SessionConfig,
        announcer: AnnouncerHandle,
        listener: ListenerHandle,
        completion: CompletionStoreHandle,
        resources: impl ResourceFactory,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (step_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (heard_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            announcer,
            listener,
            completion,
            resources: Arc::new(Mutex::new(Box::new(resources))),
            running: Arc::new(AtomicBool::new(false)),
            msg_tx: Mutex::new(None),
            snapshot: Arc::new(Mutex::new(SessionSnapshot::idle())),
            status_tx,
            step_tx,
            heard_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    /// Build the step sequence for `tasks` and start guiding through it.
    ///
    /// Blocks until session resources are confirmed acquired (or fail), then
    /// returns; the loop continues in a background blocking thread. When the
    /// tasks yield no steps, the session reports `Complete` with a `NoTasks`
    /// fault immediately and no loop is spawned.
    ///
    /// # Errors
    /// - `PacklineError::SessionActive` if a session is already running.
    /// - Resource acquisition errors (audio device open failures).
    pub fn start(&self, tasks: &[PickTask], location_order_hint: &[String]) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(PacklineError::SessionActive);
        }

        let steps = build_steps(tasks, location_order_hint);
        self.diagnostics.reset();

        if steps.is_empty() {
            info!("no pending tasks — session completes immediately");
            *self.snapshot.lock() = SessionSnapshot {
                phase: SessionPhase::Complete,
                ..SessionSnapshot::idle()
            };
            let _ = self.status_tx.send(SessionStatusEvent {
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                phase: SessionPhase::Complete,
                fault: Some(SessionFault::NoTasks),
                detail: Some("no pending tasks".into()),
            });
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);

        let (msg_tx, msg_rx) = crossbeam_channel::unbounded();
        *self.msg_tx.lock() = Some(msg_tx.clone());

        let ctx = engine::EngineCtx {
            steps,
            completion_phrase: self.config.completion_phrase.clone(),
            listen_enabled: self.config.listen_enabled,
            announcer: self.announcer.clone(),
            listener: self.listener.clone(),
            completion: Arc::clone(&self.completion),
            msg_tx,
            msg_rx,
            status_tx: self.status_tx.clone(),
            step_tx: self.step_tx.clone(),
            heard_tx: self.heard_tx.clone(),
            snapshot: Arc::clone(&self.snapshot),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
            running: Arc::clone(&self.running),
        };

        let resources = Arc::clone(&self.resources);
        let running = Arc::clone(&self.running);

        // Sync oneshot: the loop thread confirms resource acquisition.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            // Acquire on THIS thread — the hold may wrap !Send audio streams
            // and must be dropped here too.
            let hold = match resources.lock().acquire() {
                Ok(hold) => {
                    let _ = open_tx.send(Ok(()));
                    hold
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            engine::run(ctx);

            // Hold drops here, releasing session resources on this thread.
            drop(hold);
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("session started");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "session resource acquisition failed");
                self.running.store(false, Ordering::SeqCst);
                *self.msg_tx.lock() = None;
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent.
                self.running.store(false, Ordering::SeqCst);
                *self.msg_tx.lock() = None;
                Err(PacklineError::Other(anyhow::anyhow!(
                    "session task died before acquiring resources"
                )))
            }
        }
    }

    /// Stop the session, if one is running. Idempotent: stopping an idle
    /// controller is a no-op. The loop drains asynchronously; `running`
    /// flips once it exits.
    pub fn stop(&self) -> Result<()> {
        if let Some(tx) = self.msg_tx.lock().take() {
            let _ = tx.send(engine::SessionMsg::Action(SessionAction::Stop));
            info!("session stop requested");
        }
        Ok(())
    }

    /// Manually complete the current item and move on. Equivalent to the
    /// "next item" voice command.
    pub fn advance(&self) -> Result<()> {
        self.send_action(SessionAction::Advance)
    }

    /// Announce the current step again.
    pub fn repeat(&self) -> Result<()> {
        self.send_action(SessionAction::Repeat)
    }

    /// Move back one step, un-marking its completion.
    pub fn step_backward(&self) -> Result<()> {
        self.send_action(SessionAction::StepBackward)
    }

    /// Route a hardware remote / media-key signal into the session.
    pub fn remote(&self, signal: RemoteSignal) -> Result<()> {
        self.send_action(signal.action())
    }

    /// Current phase (snapshot).
    pub fn phase(&self) -> SessionPhase {
        self.snapshot.lock().phase
    }

    /// Point-in-time view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.lock().clone()
    }

    /// Subscribe to phase / fault events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to current-step change events.
    pub fn subscribe_steps(&self) -> broadcast::Receiver<StepEvent> {
        self.step_tx.subscribe()
    }

    /// Subscribe to transcript echo events.
    pub fn subscribe_heard(&self) -> broadcast::Receiver<HeardEvent> {
        self.heard_tx.subscribe()
    }

    /// Snapshot of loop counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn send_action(&self, action: SessionAction) -> Result<()> {
        let guard = self.msg_tx.lock();
        match guard.as_ref() {
            Some(tx) if self.running.load(Ordering::SeqCst) => tx
                .send(engine::SessionMsg::Action(action))
                .map_err(|_| PacklineError::SessionNotActive),
            _ => Err(PacklineError::SessionNotActive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, Instant};

    use crate::listen::stub::{ScriptedListener, ScriptedUpdate};
    use crate::speech::stub::StubAnnouncer;
    use crate::store::NullCompletionStore;
    use crate::task::{MachineRef, PickTask, Quantities, SkuRef};
    use super::resources::CountingResources;

    fn task(id: &str, sku: &str, qty: i64) -> PickTask {
        PickTask {
            id: id.into(),
            location: None,
            machine: MachineRef {
                id: "m1".into(),
                code: "M01".into(),
            },
            coil_code: "A1".into(),
            sku: SkuRef {
                id: format!("sku-{sku}"),
                name: sku.into(),
                kind: None,
                count_source: Default::default(),
            },
            quantities: Quantities {
                base: qty,
                ..Default::default()
            },
            completed: false,
        }
    }

    fn session(listener: ScriptedListener, resources: CountingResources) -> PackSession {
        PackSession::new(
            SessionConfig::default(),
            AnnouncerHandle::new(StubAnnouncer::new()),
            ListenerHandle::new(listener),
            Arc::new(NullCompletionStore),
            resources,
        )
    }

    fn wait_until(session: &PackSession, what: &str, f: impl Fn(&SessionSnapshot) -> bool) {
        let start = Instant::now();
        loop {
            if f(&session.snapshot()) {
                return;
            }
            if start.elapsed() > Duration::from_secs(2) {
                panic!("timed out waiting for {what}: {:?}", session.snapshot());
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn voice_commands_drive_a_session_to_completion() {
        let listener = ScriptedListener::new(vec![vec![
            ScriptedUpdate::Ready,
            ScriptedUpdate::Transcript {
                text: "next item".into(),
                is_final: true,
            },
        ]]);
        let session = session(listener, CountingResources::new());

        session
            .start(&[task("t1", "Cola", 2)], &[])
            .expect("start");
        wait_until(&session, "completion", |s| s.phase == SessionPhase::Complete);
        assert_eq!(session.snapshot().completed_items, 1);

        session.stop().expect("stop");
        wait_until(&session, "idle after stop", |s| {
            s.phase == SessionPhase::Idle
        });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_start_is_rejected_while_a_session_runs() {
        let session = session(ScriptedListener::silent(), CountingResources::new());
        session
            .start(&[task("t1", "Cola", 1)], &[])
            .expect("first start");

        let err = session.start(&[task("t2", "Chips", 1)], &[]);
        assert!(matches!(err, Err(PacklineError::SessionActive)));

        session.stop().expect("stop");
        wait_until(&session, "idle", |s| s.phase == SessionPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_pending_tasks_completes_immediately_without_resources() {
        let resources = CountingResources::new();
        let (acquired, _released) = resources.counters();
        let session = session(ScriptedListener::silent(), resources);
        let mut status_rx = session.subscribe_status();

        session.start(&[], &[]).expect("start");
        assert_eq!(session.phase(), SessionPhase::Complete);
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        let event = status_rx.try_recv().expect("status event");
        assert_eq!(event.fault, Some(SessionFault::NoTasks));

        // Zero-quantity tasks count as nothing to do as well.
        let session2 = session2_for_zero_qty();
        session2.start(&[task("t1", "Cola", 0)], &[]).expect("start");
        assert_eq!(session2.phase(), SessionPhase::Complete);
    }

    fn session2_for_zero_qty() -> PackSession {
        session(ScriptedListener::silent(), CountingResources::new())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resources_are_released_exactly_once_on_stop() {
        let resources = CountingResources::new();
        let (acquired, released) = resources.counters();
        let session = session(ScriptedListener::silent(), resources);

        session
            .start(&[task("t1", "Cola", 1)], &[])
            .expect("start");
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        session.stop().expect("stop");
        let start = Instant::now();
        while released.load(Ordering::SeqCst) == 0 {
            if start.elapsed() > Duration::from_secs(2) {
                panic!("resources never released");
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // Stop again: idempotent, no second release.
        session.stop().expect("second stop");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn actions_without_a_session_are_rejected() {
        let session = session(ScriptedListener::silent(), CountingResources::new());
        assert!(matches!(
            session.advance(),
            Err(PacklineError::SessionNotActive)
        ));
        assert!(matches!(
            session.repeat(),
            Err(PacklineError::SessionNotActive)
        ));
        assert!(matches!(
            session.step_backward(),
            Err(PacklineError::SessionNotActive)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_signals_map_onto_session_actions() {
        let session = session(ScriptedListener::silent(), CountingResources::new());
        // Location-less tasks yield [Unassigned marker, machine marker,
        // item, item]; markers auto-advance to the first item at index 2.
        session
            .start(&[task("t1", "Cola", 1), task("t2", "Chips", 1)], &[])
            .expect("start");
        wait_until(&session, "first item current", |s| {
            s.current_index == Some(2)
        });

        session.remote(RemoteSignal::NextTrack).expect("next");
        wait_until(&session, "advanced", |s| s.current_index == Some(3));

        // Previous-track and play/pause both repeat: position unchanged.
        session.remote(RemoteSignal::PreviousTrack).expect("repeat");
        session.remote(RemoteSignal::PlayPause).expect("repeat");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(session.snapshot().current_index, Some(3));

        // Stepping backward stays a manual control.
        session.step_backward().expect("back");
        wait_until(&session, "stepped back", |s| s.current_index == Some(2));

        session.stop().expect("stop");
        wait_until(&session, "idle", |s| s.phase == SessionPhase::Idle);
    }
}
