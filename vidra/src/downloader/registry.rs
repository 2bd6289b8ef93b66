//! Registry of live download tasks.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::progress::{ProgressSnapshot, ProgressState};
use crate::{Error, Result};

/// Handle to one registered task.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub progress: Arc<ProgressState>,
    pub cancel: CancellationToken,
    /// Tracks the task's tokio task; `wait` returns once it has ended.
    pub tracker: TaskTracker,
}

/// Concurrent map from task id to its progress.
///
/// Entries stay after the task finishes so that late observers can still read
/// the terminal state; they are only dropped when the video is deleted.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<Uuid, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task. Fails if `id` is already known.
    pub fn register(&self, id: Uuid, progress: Arc<ProgressState>) -> Result<TaskEntry> {
        match self.tasks.entry(id) {
            Entry::Occupied(_) => Err(Error::already_exists("download task", id.to_string())),
            Entry::Vacant(slot) => {
                let entry = TaskEntry {
                    progress,
                    cancel: CancellationToken::new(),
                    tracker: TaskTracker::new(),
                };
                slot.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<ProgressState>> {
        self.tasks.get(id).map(|entry| entry.progress.clone())
    }

    pub fn snapshot(&self, id: &Uuid) -> Option<ProgressSnapshot> {
        // Clone the Arc first so the shard lock is not held while reading.
        self.get(id).map(|progress| progress.snapshot())
    }

    /// Snapshot of every task. Each entry is consistent on its own; the map
    /// as a whole is not a single point in time.
    pub fn list_all(&self) -> HashMap<Uuid, ProgressSnapshot> {
        let entries: Vec<(Uuid, Arc<ProgressState>)> = self
            .tasks
            .iter()
            .map(|entry| (*entry.key(), entry.progress.clone()))
            .collect();

        entries
            .into_iter()
            .map(|(id, progress)| (id, progress.snapshot()))
            .collect()
    }

    /// Trip the task's cancellation token. Returns `false` for unknown ids.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.tasks.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &Uuid) -> Option<TaskEntry> {
        self.tasks.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
