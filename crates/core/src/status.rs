//! Daemon status assembly and publishing.

use crate::autofocus::AutofocusPhase;
use crate::manager::{StageCounts, TaskManager, TaskOutcome};
use crate::task::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutofocusStatus {
    pub state: AutofocusPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Latest progress message while a run is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

/// Point-in-time view of the whole pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub stages: StageCounts,
    pub queue_imaging: usize,
    pub queue_processing: usize,
    pub queue_uploading: usize,
    pub autofocus: AutofocusStatus,
    pub admission_paused: bool,
    pub recent_outcomes: Vec<TaskOutcome>,
    pub generated_at: DateTime<Utc>,
}

/// Builds snapshots from the manager and publishes them on a watch
/// channel. The HTTP server reads the latest value for `/status` and
/// streams changes over the websocket.
pub struct StatusHub {
    manager: Arc<TaskManager>,
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusHub {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        let initial = Self::assemble(&manager);
        let (tx, _) = watch::channel(initial);
        Self { manager, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        Self::assemble(&self.manager)
    }

    fn assemble(manager: &Arc<TaskManager>) -> StatusSnapshot {
        let board = manager.board();
        let counts = board.counts();
        let depths = manager.queue_depths();
        let focus = manager.autofocus().state();

        update_stage_gauges(counts);

        StatusSnapshot {
            current_task: board.current_task_id(),
            stages: counts,
            queue_imaging: depths.imaging,
            queue_processing: depths.processing,
            queue_uploading: depths.uploading,
            autofocus: AutofocusStatus {
                state: focus.phase(),
                last_run: focus.last_run(),
                progress: focus.progress(),
            },
            admission_paused: manager.is_paused(),
            recent_outcomes: board.recent_outcomes(),
            generated_at: Utc::now(),
        }
    }

    /// Spawns the publisher loop. The pipeline state is sampled on every
    /// interval until the shutdown channel fires, but a snapshot is only
    /// broadcast when something other than its timestamp changed, so
    /// websocket subscribers see state transitions rather than a clock.
    pub fn spawn_publisher(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            info!("Status publisher started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Status publisher received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let snapshot = Self::assemble(&hub.manager);
                        hub.tx.send_if_modified(|current| {
                            if same_state(current, &snapshot) {
                                return false;
                            }
                            *current = snapshot;
                            true
                        });
                    }
                }
            }
            info!("Status publisher stopped");
        });
    }
}

/// Snapshot equality ignoring `generated_at`.
fn same_state(a: &StatusSnapshot, b: &StatusSnapshot) -> bool {
    a.current_task == b.current_task
        && a.stages == b.stages
        && a.queue_imaging == b.queue_imaging
        && a.queue_processing == b.queue_processing
        && a.queue_uploading == b.queue_uploading
        && a.autofocus == b.autofocus
        && a.admission_paused == b.admission_paused
        && a.recent_outcomes == b.recent_outcomes
}

fn update_stage_gauges(counts: StageCounts) {
    let set = |stage: Stage, value: usize| {
        crate::metrics::TASKS_BY_STAGE
            .with_label_values(&[&stage.to_string()])
            .set(value as i64);
    };
    set(Stage::Pending, counts.pending);
    set(Stage::Imaging, counts.imaging);
    set(Stage::Processing, counts.processing);
    set(Stage::Uploading, counts.uploading);
}
