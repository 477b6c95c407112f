//! # Task Monitor
//!
//! Named-task registry shared by the orchestrator (writer) and status
//! reporting (reader). Progress is an atomic counter per task so concurrent
//! shards can increment without taking the registry lock for writing.
//!
//! ```text
//! Pending ──start──► Running ──complete──► Complete
//!                       └──────fail──────► Failed
//! ```
//!
//! `start` may be called again on a finished task to begin a new run.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub const TASK_LOAD_DATASET: &str = "Load dataset";
pub const TASK_FIND_ITEM_NEIGHBORS: &str = "Find neighbors of items";
pub const TASK_FIND_USER_NEIGHBORS: &str = "Find neighbors of users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TaskStatus::Running,
            2 => TaskStatus::Complete,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Complete => 2,
            TaskStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub status: TaskStatus,
    pub done: usize,
    pub total: usize,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TaskTimes {
    error: Option<String>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct TaskEntry {
    status: AtomicU8,
    done: AtomicUsize,
    total: AtomicUsize,
    times: Mutex<TaskTimes>,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(TaskStatus::Pending.as_u8()),
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            times: Mutex::new(TaskTimes::default()),
        }
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: TaskStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }
}

/// Registry of named tasks.
#[derive(Debug, Default)]
pub struct TaskMonitor {
    tasks: RwLock<BTreeMap<String, Arc<TaskEntry>>>,
}

impl TaskMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Option<Arc<TaskEntry>> {
        self.tasks.read().get(name).cloned()
    }

    fn entry_or_insert(&self, name: &str) -> Arc<TaskEntry> {
        if let Some(entry) = self.entry(name) {
            return entry;
        }
        self.tasks
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TaskEntry::new()))
            .clone()
    }

    /// Make a task visible as Pending without starting it.
    pub fn register(&self, name: &str) {
        self.entry_or_insert(name);
    }

    /// Begin a run: Running, `done = 0`, `total` scheduled.
    pub fn start(&self, name: &str, total: usize) {
        let entry = self.entry_or_insert(name);
        let mut times = entry.times.lock();
        times.error = None;
        times.start_time = Some(Utc::now());
        times.finish_time = None;
        entry.done.store(0, Ordering::Release);
        entry.total.store(total, Ordering::Release);
        entry.set_status(TaskStatus::Running);
        info!(task = name, total, "task started");
    }

    /// Add `delta` to the done counter, capped at the total. A no-op unless the task is running.
    pub fn increment(&self, name: &str, delta: usize) {
        let Some(entry) = self.entry(name) else {
            return;
        };
        if entry.status() != TaskStatus::Running {
            return;
        }
        let total = entry.total.load(Ordering::Acquire);
        let _ = entry
            .done
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |done| {
                Some(done.saturating_add(delta).min(total))
            });
    }

    /// Mark a running task Failed. Terminal tasks are left alone.
    pub fn fail(&self, name: &str, err: impl std::fmt::Display) {
        let Some(entry) = self.entry(name) else {
            return;
        };
        let mut times = entry.times.lock();
        if entry.status() != TaskStatus::Running {
            return;
        }
        entry.set_status(TaskStatus::Failed);
        times.error = Some(err.to_string());
        times.finish_time = Some(Utc::now());
        warn!(task = name, error = %err, "task failed");
    }

    /// Mark a running task Complete; its done counter is brought to the total.
    pub fn complete(&self, name: &str) {
        let Some(entry) = self.entry(name) else {
            return;
        };
        let mut times = entry.times.lock();
        if entry.status() != TaskStatus::Running {
            return;
        }
        entry
            .done
            .store(entry.total.load(Ordering::Acquire), Ordering::Release);
        entry.set_status(TaskStatus::Complete);
        times.finish_time = Some(Utc::now());
        info!(task = name, "task complete");
    }

    pub fn get(&self, name: &str) -> Option<TaskRecord> {
        self.entry(name).map(|entry| snapshot(name, &entry))
    }

    /// Snapshot of every task, ordered by name.
    pub fn list(&self) -> Vec<TaskRecord> {
        self.tasks
            .read()
            .iter()
            .map(|(name, entry)| snapshot(name, entry))
            .collect()
    }
}

fn snapshot(name: &str, entry: &TaskEntry) -> TaskRecord {
    let times = entry.times.lock();
    TaskRecord {
        name: name.to_string(),
        status: entry.status(),
        done: entry.done.load(Ordering::Acquire),
        total: entry.total.load(Ordering::Acquire),
        error: times.error.clone(),
        start_time: times.start_time,
        finish_time: times.finish_time,
    }
}
