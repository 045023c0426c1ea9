//! SQLite-backed route store.
//!
//! Holds the runs, locations, machines, SKUs and pick tasks the session
//! reads, and receives completion write-backs from the session loop. A
//! connection is opened per call; the store itself is just a path, which
//! keeps it `Send + Sync` for the [`CompletionStore`] seam.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

use packline_core::{
    CompletionStore, CountSource, LocationRef, MachineRef, PacklineError, PickTask, Quantities,
    SkuRef,
};

#[derive(Debug, Clone)]
pub struct RouteStore {
    db_path: PathBuf,
}

impl RouteStore {
    pub fn default_db_path() -> PathBuf {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("packline")
            .join("packline.db")
    }

    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("opening {}", self.db_path.display()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS runs (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              location_order_json TEXT NOT NULL DEFAULT '[]',
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locations (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS machines (
              id TEXT PRIMARY KEY,
              code TEXT NOT NULL,
              location_id TEXT REFERENCES locations(id)
            );

            CREATE TABLE IF NOT EXISTS skus (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              kind TEXT,
              count_source TEXT NOT NULL DEFAULT 'total'
            );

            CREATE TABLE IF NOT EXISTS pick_tasks (
              id TEXT PRIMARY KEY,
              run_id TEXT NOT NULL REFERENCES runs(id),
              machine_id TEXT NOT NULL REFERENCES machines(id),
              sku_id TEXT NOT NULL REFERENCES skus(id),
              coil_code TEXT NOT NULL,
              qty_current INTEGER,
              qty_par INTEGER,
              qty_need INTEGER,
              qty_forecast INTEGER,
              qty_total INTEGER,
              qty_base INTEGER NOT NULL DEFAULT 0,
              completed INTEGER NOT NULL DEFAULT 0,
              completed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_pick_tasks_run ON pick_tasks(run_id, completed);
            CREATE INDEX IF NOT EXISTS idx_machines_location ON machines(location_id);
            "#,
        )?;
        Ok(())
    }

    /// Pending (not-yet-completed) tasks for a run, joined with their
    /// machine, location and SKU rows.
    pub fn pending_pick_tasks(&self, run_id: &str) -> Result<Vec<PickTask>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.coil_code,
                   t.qty_current, t.qty_par, t.qty_need, t.qty_forecast, t.qty_total, t.qty_base,
                   m.id, m.code,
                   l.id, l.name,
                   s.id, s.name, s.kind, s.count_source
            FROM pick_tasks t
            JOIN machines m ON m.id = t.machine_id
            LEFT JOIN locations l ON l.id = m.location_id
            JOIN skus s ON s.id = t.sku_id
            WHERE t.run_id = ?1 AND t.completed = 0
            ORDER BY t.id
            "#,
        )?;
        let mut rows = stmt.query(params![run_id])?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            let location = match (
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Option<String>>(11)?,
            ) {
                (Some(id), Some(name)) => Some(LocationRef { id, name }),
                _ => None,
            };
            tasks.push(PickTask {
                id: row.get(0)?,
                coil_code: row.get(1)?,
                quantities: Quantities {
                    current: row.get(2)?,
                    par: row.get(3)?,
                    need: row.get(4)?,
                    forecast: row.get(5)?,
                    total: row.get(6)?,
                    base: row.get(7)?,
                },
                machine: MachineRef {
                    id: row.get(8)?,
                    code: row.get(9)?,
                },
                location,
                sku: SkuRef {
                    id: row.get(12)?,
                    name: row.get(13)?,
                    kind: row.get(14)?,
                    count_source: parse_count_source(&row.get::<_, String>(15)?),
                },
                completed: false,
            });
        }
        Ok(tasks)
    }

    /// The run's configured location walking order (location ids). Empty
    /// means alphabetical.
    pub fn location_order_hint(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.open()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT location_order_json FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        Ok(json
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }

    /// Seed a small demo route so the binary is usable out of the box.
    /// Idempotent: re-seeding an existing run changes nothing.
    pub fn seed_demo_run(&self, run_id: &str) -> Result<()> {
        let conn = self.open()?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT OR IGNORE INTO runs (id, name, location_order_json, created_at)
             VALUES (?1, 'Demo route', '[\"loc-riverside\",\"loc-airport\"]', ?2)",
            params![run_id, now],
        )?;

        conn.execute_batch(
            r#"
            INSERT OR IGNORE INTO locations (id, name) VALUES
              ('loc-airport', 'Airport Terminal'),
              ('loc-riverside', 'Riverside Mall');

            INSERT OR IGNORE INTO machines (id, code, location_id) VALUES
              ('mach-01', 'M01', 'loc-riverside'),
              ('mach-02', 'M02', 'loc-airport'),
              ('mach-03', 'M03', NULL);

            INSERT OR IGNORE INTO skus (id, name, kind, count_source) VALUES
              ('sku-cola', 'Cola', 'soda', 'total'),
              ('sku-chips', 'Chips', 'snack', 'total'),
              ('sku-water', 'Water', NULL, 'need'),
              ('sku-gum', 'Gum', NULL, 'total');
            "#,
        )?;

        let demo_tasks: &[(&str, &str, &str, &str, Option<i64>, Option<i64>, i64)] = &[
            // (id, machine, sku, coil, qty_total, qty_need, qty_base)
            ("task-1", "mach-01", "sku-cola", "E7", Some(3), None, 1),
            ("task-2", "mach-01", "sku-cola", "E6", Some(4), None, 1),
            ("task-3", "mach-01", "sku-chips", "D1", Some(2), None, 1),
            ("task-4", "mach-02", "sku-water", "A2", None, Some(6), 1),
            ("task-5", "mach-02", "sku-gum", "B4", Some(1), None, 1),
            ("task-6", "mach-03", "sku-water", "C1", None, Some(2), 1),
        ];
        for (id, machine, sku, coil, total, need, base) in demo_tasks {
            conn.execute(
                "INSERT OR IGNORE INTO pick_tasks
                 (id, run_id, machine_id, sku_id, coil_code, qty_total, qty_need, qty_base)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id, run_id, machine, sku, coil, total, need, base],
            )?;
        }

        info!(run_id, "demo route seeded");
        Ok(())
    }
}

impl CompletionStore for RouteStore {
    fn set_completed(&self, task_ids: &[String], completed: bool) -> packline_core::error::Result<()> {
        let mut conn = self.open().map_err(|e| PacklineError::Store(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| PacklineError::Store(e.to_string()))?;
        let completed_at = completed.then(|| Utc::now().timestamp());
        for id in task_ids {
            tx.execute(
                "UPDATE pick_tasks SET completed = ?1, completed_at = ?2 WHERE id = ?3",
                params![completed as i64, completed_at, id],
            )
            .map_err(|e| PacklineError::Store(e.to_string()))?;
        }
        tx.commit().map_err(|e| PacklineError::Store(e.to_string()))?;
        Ok(())
    }
}

fn parse_count_source(raw: &str) -> CountSource {
    match raw.trim().to_ascii_lowercase().as_str() {
        "current" => CountSource::Current,
        "par" => CountSource::Par,
        "need" => CountSource::Need,
        "forecast" => CountSource::Forecast,
        _ => CountSource::Total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, RouteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RouteStore::new(dir.path().join("test.db")).expect("store");
        (dir, store)
    }

    #[test]
    fn seeded_run_yields_pending_tasks_with_joined_refs() {
        let (_dir, store) = temp_store();
        store.seed_demo_run("run-1").expect("seed");

        let tasks = store.pending_pick_tasks("run-1").expect("pending");
        assert_eq!(tasks.len(), 6);

        let cola = tasks
            .iter()
            .find(|t| t.id == "task-1")
            .expect("task-1 present");
        assert_eq!(cola.sku.name, "Cola");
        assert_eq!(cola.sku.kind.as_deref(), Some("soda"));
        assert_eq!(cola.machine.code, "M01");
        assert_eq!(
            cola.location.as_ref().map(|l| l.name.as_str()),
            Some("Riverside Mall")
        );
        assert_eq!(cola.needed_quantity(), 3);

        let water = tasks
            .iter()
            .find(|t| t.id == "task-4")
            .expect("task-4 present");
        assert_eq!(water.sku.count_source, CountSource::Need);
        assert_eq!(water.needed_quantity(), 6);

        // Machine without a location yields an unassigned task.
        let unassigned = tasks.iter().find(|t| t.id == "task-6").expect("task-6");
        assert!(unassigned.location.is_none());
    }

    #[test]
    fn completed_tasks_drop_out_of_pending_and_come_back_on_unmark() {
        let (_dir, store) = temp_store();
        store.seed_demo_run("run-1").expect("seed");

        store
            .set_completed(&["task-1".into(), "task-2".into()], true)
            .expect("mark");
        let pending = store.pending_pick_tasks("run-1").expect("pending");
        assert_eq!(pending.len(), 4);
        assert!(pending.iter().all(|t| t.id != "task-1" && t.id != "task-2"));

        // Idempotent re-mark.
        store.set_completed(&["task-1".into()], true).expect("re-mark");
        assert_eq!(store.pending_pick_tasks("run-1").expect("pending").len(), 4);

        store.set_completed(&["task-1".into()], false).expect("unmark");
        let pending = store.pending_pick_tasks("run-1").expect("pending");
        assert!(pending.iter().any(|t| t.id == "task-1"));
    }

    #[test]
    fn location_order_hint_round_trips_and_defaults_empty() {
        let (_dir, store) = temp_store();
        store.seed_demo_run("run-1").expect("seed");

        assert_eq!(
            store.location_order_hint("run-1").expect("hint"),
            vec!["loc-riverside".to_string(), "loc-airport".to_string()]
        );
        assert!(store
            .location_order_hint("missing-run")
            .expect("hint")
            .is_empty());
    }

    #[test]
    fn seeding_twice_does_not_duplicate() {
        let (_dir, store) = temp_store();
        store.seed_demo_run("run-1").expect("seed");
        store.seed_demo_run("run-1").expect("re-seed");
        assert_eq!(store.pending_pick_tasks("run-1").expect("pending").len(), 6);
    }
}
