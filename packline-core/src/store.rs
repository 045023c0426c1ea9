//! Completion write-back seam.
//!
//! The controller is authoritative for completion state while a session
//! runs; writes through this trait are idempotent, fire-and-forget mirrors
//! into the persistence layer. A failed write is logged and surfaced but
//! never blocks local progression.

use std::sync::Arc;

use crate::error::Result;

/// Persistence-layer sink for task completion flags.
pub trait CompletionStore: Send + Sync + 'static {
    /// Set the completion flag on every task in `task_ids`. Must be
    /// idempotent — re-marking an already-completed task is a no-op.
    fn set_completed(&self, task_ids: &[String], completed: bool) -> Result<()>;
}

/// Shared handle to a completion store.
pub type CompletionStoreHandle = Arc<dyn CompletionStore>;

/// Discards all writes. For demos and announce-only experiments.
#[derive(Debug, Default)]
pub struct NullCompletionStore;

impl CompletionStore for NullCompletionStore {
    fn set_completed(&self, _task_ids: &[String], _completed: bool) -> Result<()> {
        Ok(())
    }
}
