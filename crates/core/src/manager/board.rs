use crate::task::{Stage, Task};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

const RECENT_OUTCOMES_CAP: usize = 32;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("task '{0}' is not tracked")]
    NotTracked(String),

    #[error("task '{task_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: Stage,
        to: Stage,
    },
}

/// Terminal record kept for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Per-stage task counts for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub pending: usize,
    pub imaging: usize,
    pub processing: usize,
    pub uploading: usize,
}

/// Result of one admission check.
#[derive(Debug, Default)]
pub struct Admission {
    /// Task whose start time has arrived, now marked Imaging.
    pub admitted: Option<Task>,
    /// Tasks whose observation window closed before they ever started.
    pub expired: Vec<Task>,
}

struct ScheduledEntry {
    start_at: DateTime<Utc>,
    task: Task,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.start_at == other.start_at && self.task.id == other.task.id
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start_at
            .cmp(&other.start_at)
            .then_with(|| self.task.id.cmp(&other.task.id))
    }
}

struct StageRegistry {
    stages: HashMap<String, Stage>,
    current_task_id: Option<String>,
    recent: VecDeque<TaskOutcome>,
}

struct ScheduleHeap {
    heap: BinaryHeap<Reverse<ScheduledEntry>>,
    ids: HashSet<String>,
}

/// Coordinator for the two pieces of shared task state: the stage
/// registry (which stage every tracked task is in) and the schedule heap
/// (tasks waiting for their start time, ordered soonest-first).
///
/// Every operation that needs both takes the stage lock first, then the
/// heap lock. No lock is ever held across an await point; all methods
/// here are synchronous.
pub struct TaskBoard {
    stage: Mutex<StageRegistry>,
    heap: Mutex<ScheduleHeap>,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBoard {
    pub fn new() -> Self {
        Self {
            stage: Mutex::new(StageRegistry {
                stages: HashMap::new(),
                current_task_id: None,
                recent: VecDeque::new(),
            }),
            heap: Mutex::new(ScheduleHeap {
                heap: BinaryHeap::new(),
                ids: HashSet::new(),
            }),
        }
    }

    /// Reconciles the backend's task list against local state.
    ///
    /// New tasks are registered Pending and scheduled. Pending tasks the
    /// backend no longer lists are dropped. Tasks already past Pending are
    /// left alone regardless of the remote list; their stage worker owns
    /// them until a terminal outcome. Tasks in the recent-outcome history
    /// are skipped too: the feed is eventually consistent and can keep
    /// listing a task after it finished here.
    pub fn sync_remote(&self, remote: Vec<Task>) -> usize {
        let now = Utc::now();
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());

        let remote_ids: HashSet<&str> = remote.iter().map(|t| t.id.as_str()).collect();

        // Drop pending tasks the backend withdrew.
        let withdrawn: Vec<String> = stage
            .stages
            .iter()
            .filter(|(id, s)| **s == Stage::Pending && !remote_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();
        for id in withdrawn {
            info!(task_id = %id, "Pending task withdrawn by backend");
            stage.stages.remove(&id);
            heap.ids.remove(&id);
            heap.heap.retain(|Reverse(e)| e.task.id != id);
        }

        let mut added = 0;
        for task in remote {
            if stage.stages.contains_key(&task.id) {
                continue;
            }
            if stage.recent.iter().any(|o| o.task_id == task.id) {
                debug!(task_id = %task.id, "Skipping finished task still listed by backend");
                continue;
            }
            if task.window_closed(now) {
                debug!(task_id = %task.id, "Skipping task with closed window");
                continue;
            }
            stage.stages.insert(task.id.clone(), Stage::Pending);
            heap.ids.insert(task.id.clone());
            heap.heap.push(Reverse(ScheduledEntry {
                start_at: task.start_at,
                task,
            }));
            added += 1;
        }
        added
    }

    /// Pops at most one due task and marks it Imaging. Tasks found with a
    /// closed window on the way are evicted and returned as expired; the
    /// caller reports them to the backend.
    pub fn admit_due(&self, now: DateTime<Utc>) -> Admission {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());

        let mut admission = Admission::default();

        while let Some(Reverse(entry)) = heap.heap.peek() {
            if entry.start_at > now {
                break;
            }
            let Some(Reverse(entry)) = heap.heap.pop() else {
                break;
            };
            heap.ids.remove(&entry.task.id);

            // The heap can lag the registry after a removal.
            if !stage.stages.contains_key(&entry.task.id) {
                continue;
            }

            if entry.task.window_closed(now) {
                warn!(task_id = %entry.task.id, "Observation window closed before start");
                record_outcome(
                    &mut stage,
                    &entry.task.id,
                    Stage::Failed,
                    Some("observation window expired"),
                );
                admission.expired.push(entry.task);
                continue;
            }

            stage.stages.insert(entry.task.id.clone(), Stage::Imaging);
            stage.current_task_id = Some(entry.task.id.clone());
            admission.admitted = Some(entry.task);
            break;
        }

        admission
    }

    /// Moves a task one stage forward. Only the progression the pipeline
    /// performs is legal; anything else is a bug surfaced as an error.
    pub fn advance(&self, task_id: &str, to: Stage) -> Result<(), BoardError> {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let current = *stage
            .stages
            .get(task_id)
            .ok_or_else(|| BoardError::NotTracked(task_id.to_string()))?;

        if current.next() != Some(to) {
            return Err(BoardError::InvalidTransition {
                task_id: task_id.to_string(),
                from: current,
                to,
            });
        }
        stage.stages.insert(task_id.to_string(), to);
        debug!(task_id = %task_id, from = %current, to = %to, "Stage advanced");
        Ok(())
    }

    /// Records a terminal outcome and evicts the task.
    pub fn finish(&self, task_id: &str, outcome: Stage, reason: Option<&str>) {
        debug_assert!(outcome.is_terminal());
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        if !stage.stages.contains_key(task_id) {
            return;
        }
        record_outcome(&mut stage, task_id, outcome, reason);
        crate::metrics::record_task_outcome(outcome);
    }

    /// Purges a task from every stage: the registry, the schedule heap
    /// and the current-task marker. Returns false for unknown tasks.
    pub fn remove_from_all_stages(&self, task_id: &str) -> bool {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());

        let known = stage.stages.remove(task_id).is_some();
        if stage.current_task_id.as_deref() == Some(task_id) {
            stage.current_task_id = None;
        }
        if heap.ids.remove(task_id) {
            heap.heap.retain(|Reverse(e)| e.task.id != task_id);
        }
        if known {
            info!(task_id = %task_id, "Task removed from all stages");
        }
        known
    }

    pub fn stage_of(&self, task_id: &str) -> Option<Stage> {
        self.stage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stages
            .get(task_id)
            .copied()
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.stage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current_task_id
            .clone()
    }

    pub fn counts(&self) -> StageCounts {
        let stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = StageCounts::default();
        for s in stage.stages.values() {
            match s {
                Stage::Pending => counts.pending += 1,
                Stage::Imaging => counts.imaging += 1,
                Stage::Processing => counts.processing += 1,
                Stage::Uploading => counts.uploading += 1,
                Stage::Completed | Stage::Failed => {}
            }
        }
        counts
    }

    pub fn recent_outcomes(&self) -> Vec<TaskOutcome> {
        self.stage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent
            .iter()
            .cloned()
            .collect()
    }
}

fn record_outcome(stage: &mut StageRegistry, task_id: &str, outcome: Stage, reason: Option<&str>) {
    stage.stages.remove(task_id);
    if stage.current_task_id.as_deref() == Some(task_id) {
        stage.current_task_id = None;
    }
    if stage.recent.len() == RECENT_OUTCOMES_CAP {
        stage.recent.pop_front();
    }
    stage.recent.push_back(TaskOutcome {
        task_id: task_id.to_string(),
        stage: outcome,
        reason: reason.map(str::to_string),
        at: Utc::now(),
    });
}
