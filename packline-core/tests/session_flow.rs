//! End-to-end session flow over the public API: a two-location run driven
//! entirely by scripted voice commands, from first announcement to the
//! completion phrase.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;

use packline_core::listen::stub::{ScriptedListener, ScriptedUpdate};
use packline_core::session::resources::CountingResources;
use packline_core::speech::stub::StubAnnouncer;
use packline_core::{
    AnnouncerHandle, CompletionStore, CompletionStoreHandle, CountSource, ListenerHandle,
    LocationRef, MachineRef, PackSession, PickTask, Quantities, SessionConfig, SessionPhase,
    SkuRef, StepEvent,
};

#[derive(Default)]
struct RecordingStore {
    writes: Mutex<Vec<(Vec<String>, bool)>>,
}

impl CompletionStore for RecordingStore {
    fn set_completed(&self, task_ids: &[String], completed: bool) -> packline_core::error::Result<()> {
        self.writes.lock().push((task_ids.to_vec(), completed));
        Ok(())
    }
}

fn pick_task(id: &str, location: (&str, &str), machine: &str, coil: &str, sku: &str, qty: i64) -> PickTask {
    PickTask {
        id: id.into(),
        location: Some(LocationRef {
            id: location.0.into(),
            name: location.1.into(),
        }),
        machine: MachineRef {
            id: format!("machine-{machine}"),
            code: machine.into(),
        },
        coil_code: coil.into(),
        sku: SkuRef {
            id: format!("sku-{sku}"),
            name: sku.into(),
            kind: None,
            count_source: CountSource::Total,
        },
        quantities: Quantities {
            total: Some(qty),
            base: 1,
            ..Default::default()
        },
        completed: false,
    }
}

fn next_item_turn() -> Vec<ScriptedUpdate> {
    vec![
        ScriptedUpdate::Ready,
        ScriptedUpdate::Transcript {
            text: "next item".into(),
            is_final: true,
        },
    ]
}

fn wait_until(session: &PackSession, what: &str, f: impl Fn() -> bool) {
    let start = Instant::now();
    loop {
        if f() {
            return;
        }
        if start.elapsed() > Duration::from_secs(3) {
            panic!("timed out waiting for {what}: {:?}", session.snapshot());
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn voice_driven_run_walks_both_locations_and_completes_every_task() {
    // Two locations, one machine each, two SKUs each: 8 steps total
    // (2 × location marker + 2 × machine marker + 4 × item).
    let tasks = vec![
        pick_task("t1", ("loc-a", "Airport"), "M01", "E7", "Cola", 2),
        pick_task("t2", ("loc-a", "Airport"), "M01", "B2", "Chips", 1),
        pick_task("t3", ("loc-b", "Riverside"), "M02", "C4", "Water", 3),
        pick_task("t4", ("loc-b", "Riverside"), "M02", "A1", "Gum", 1),
    ];

    // One "next item" per item step; markers advance on their own.
    let listener = ScriptedListener::new(vec![
        next_item_turn(),
        next_item_turn(),
        next_item_turn(),
        next_item_turn(),
    ]);

    let resources = CountingResources::new();
    let (acquired, released) = resources.counters();
    let store = Arc::new(RecordingStore::default());

    let session = PackSession::new(
        SessionConfig::default(),
        AnnouncerHandle::new(StubAnnouncer::new()),
        ListenerHandle::new(listener),
        Arc::clone(&store) as CompletionStoreHandle,
        resources,
    );
    let mut step_rx = session.subscribe_steps();

    session.start(&tasks, &[]).expect("start");
    assert_eq!(acquired.load(Ordering::SeqCst), 1);

    wait_until(&session, "session completion", || {
        session.phase() == SessionPhase::Complete
    });

    let snap = session.snapshot();
    assert_eq!(snap.total_steps, 8);
    assert_eq!(snap.completed_items, 4);
    assert_eq!(snap.total_items, 4);
    assert!((snap.progress - 1.0).abs() < f32::EPSILON);

    // Every item's tasks were marked completed, none un-marked.
    let writes = store.writes.lock().clone();
    assert_eq!(writes.len(), 4);
    assert!(writes.iter().all(|(_, completed)| *completed));
    let mut written_ids: Vec<String> = writes.into_iter().flat_map(|(ids, _)| ids).collect();
    written_ids.sort();
    assert_eq!(written_ids, vec!["t1", "t2", "t3", "t4"]);

    // The step stream visited all 8 steps in order.
    let mut indices = Vec::new();
    loop {
        match step_rx.try_recv() {
            Ok(StepEvent { index, total, .. }) => {
                assert_eq!(total, 8);
                indices.push(index);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7]);

    // Stop releases the session resources exactly once.
    session.stop().expect("stop");
    wait_until(&session, "resource release", || {
        released.load(Ordering::SeqCst) == 1
    });
    assert_eq!(session.phase(), SessionPhase::Idle);
}
