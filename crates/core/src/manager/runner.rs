//! Task lifecycle manager.
//!
//! Drives tasks through the staged pipeline:
//! - Poll loop: fetches the backend task list and reconciles the board
//! - Runner loop: admits due tasks into imaging, then services autofocus
//!
//! Admission and autofocus run sequentially on one loop; autofocus can
//! therefore wait for the imaging queue without an admitted task waiting
//! on autofocus in return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::autofocus::{AutofocusError, AutofocusManager, AutofocusPhase};
use crate::backend::TaskBackend;
use crate::config::TasksConfig;
use crate::hardware::HardwareAdapter;
use crate::pipeline::{
    ImagingItem, ImagingWorker, ProcessingWorker, RetryPolicy, UploadWorker, WorkQueue,
};
use crate::processors::ProcessorChain;
use crate::task::Task;

use super::board::TaskBoard;

/// Snapshot of the pipeline queues, for the status surface.
#[derive(Debug, Clone, Copy)]
pub struct QueueDepths {
    pub imaging: usize,
    pub processing: usize,
    pub uploading: usize,
}

/// The task manager - owns the board, the stage queues and the loops.
pub struct TaskManager {
    config: TasksConfig,
    board: Arc<TaskBoard>,
    backend: Arc<dyn TaskBackend>,
    autofocus: Arc<AutofocusManager>,
    imaging: WorkQueue<ImagingWorker>,
    processing: WorkQueue<ProcessingWorker>,
    uploading: WorkQueue<UploadWorker>,

    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    queue_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    /// Builds the manager and its three stage queues. Queues start
    /// consuming immediately; the poll and runner loops start on
    /// [`TaskManager::start`].
    pub fn new(
        config: TasksConfig,
        backend: Arc<dyn TaskBackend>,
        hardware: Arc<dyn HardwareAdapter>,
        chain: ProcessorChain,
        autofocus: Arc<AutofocusManager>,
    ) -> Self {
        let board = Arc::new(TaskBoard::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let upload_policy = RetryPolicy::from_config(&config);
        let (uploading, upload_handle) = WorkQueue::spawn(
            "upload",
            UploadWorker::new(board.clone(), backend.clone(), config.keep_images),
            upload_policy,
        );

        let (processing, processing_handle) = WorkQueue::spawn(
            "processing",
            ProcessingWorker::new(board.clone(), backend.clone(), chain, uploading.clone()),
            RetryPolicy::none(),
        );

        let (imaging, imaging_handle) = WorkQueue::spawn(
            "imaging",
            ImagingWorker::new(
                board.clone(),
                hardware,
                backend.clone(),
                autofocus.state().clone(),
                processing.clone(),
            ),
            RetryPolicy::none(),
        );

        Self {
            config,
            board,
            backend,
            autofocus,
            imaging,
            processing,
            uploading,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            queue_handles: Mutex::new(vec![upload_handle, processing_handle, imaging_handle]),
        }
    }

    /// Start the manager (spawns the poll and runner loops).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Task manager already running");
            return;
        }

        info!("Starting task manager");
        self.spawn_poll_loop();
        self.spawn_runner_loop();
        info!("Task manager started");
    }

    /// Stop the manager gracefully. The poll and runner loops exit at
    /// their next tick; each stage queue finishes the item it is
    /// executing before its loop stops.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Task manager not running");
            return;
        }

        info!("Stopping task manager");
        let _ = self.shutdown_tx.send(());
        self.imaging.shutdown();
        self.processing.shutdown();
        self.uploading.shutdown();

        let handles = {
            let mut guard = self.queue_handles.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("Task manager stopped");
    }

    pub fn board(&self) -> &Arc<TaskBoard> {
        &self.board
    }

    pub fn autofocus(&self) -> &Arc<AutofocusManager> {
        &self.autofocus
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            imaging: self.imaging.inflight(),
            processing: self.processing.inflight(),
            uploading: self.uploading.inflight(),
        }
    }

    /// Pause task admission. In-flight tasks run to completion; pending
    /// tasks stay scheduled.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Task admission paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Task admission resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn request_autofocus(&self) -> Result<AutofocusPhase, AutofocusError> {
        self.autofocus.request()
    }

    pub fn cancel_autofocus(&self) -> bool {
        self.autofocus.cancel()
    }

    /// Purges a task from every stage it could be waiting in.
    pub fn remove_task(&self, task_id: &str) -> bool {
        self.board.remove_from_all_stages(task_id)
    }

    /// Fetches the task list once and reconciles the board. The poll loop
    /// calls this on its interval; tests call it directly.
    pub async fn poll_once(&self) {
        Self::poll_backend(&self.backend, &self.board).await;
    }

    /// Runs one admission + autofocus check. The runner loop calls this
    /// on its tick; tests call it directly.
    pub async fn tick_once(&self) {
        Self::tick(
            &self.board,
            &self.backend,
            &self.imaging,
            &self.autofocus,
            &self.paused,
        )
        .await;
    }

    async fn poll_backend(backend: &Arc<dyn TaskBackend>, board: &Arc<TaskBoard>) {
        // Heartbeat first, best-effort, so the backend keeps seeing this
        // telescope online even when the task fetch fails.
        if let Err(e) = backend.report_online().await {
            debug!(error = %e, "Online report failed");
        }

        match backend.fetch_tasks().await {
            Ok(tasks) => {
                let total = tasks.len();
                let added = board.sync_remote(tasks);
                if added > 0 {
                    info!(added, total, "Task list synced");
                } else {
                    debug!(total, "Task list synced, nothing new");
                }
            }
            Err(e) => {
                warn!(error = %e, "Task poll failed");
            }
        }
    }

    async fn tick(
        board: &Arc<TaskBoard>,
        backend: &Arc<dyn TaskBackend>,
        imaging: &WorkQueue<ImagingWorker>,
        autofocus: &Arc<AutofocusManager>,
        paused: &Arc<AtomicBool>,
    ) {
        // Admission first. Gated on an idle imaging queue so autofocus,
        // checked right after, can never be starved by a steady stream
        // of due tasks piling into imaging.
        let admission_open = !paused.load(Ordering::SeqCst)
            && !autofocus.state().engaged()
            && imaging.is_idle();

        if admission_open {
            let admission = board.admit_due(Utc::now());
            for expired in admission.expired {
                Self::report_expired(backend, &expired).await;
            }
            if let Some(task) = admission.admitted {
                info!(task_id = %task.id, "Task admitted to imaging");
                crate::metrics::TASKS_ADMITTED.inc();
                let task_id = task.id.clone();
                if imaging.submit(ImagingItem { task }).is_err() {
                    error!(task_id = %task_id, "Imaging queue closed, task lost");
                    board.finish(&task_id, crate::task::Stage::Failed, Some("imaging queue closed"));
                }
            }
        }

        autofocus.maybe_schedule();
        autofocus.check_and_run(imaging.is_idle()).await;
    }

    async fn report_expired(backend: &Arc<dyn TaskBackend>, task: &Task) {
        if let Err(e) = backend
            .mark_task_failed(&task.id, "observation window expired")
            .await
        {
            warn!(task_id = %task.id, error = %e, "Could not report expired task");
        }
    }

    fn spawn_poll_loop(&self) {
        let running = Arc::clone(&self.running);
        let board = Arc::clone(&self.board);
        let backend = Arc::clone(&self.backend);
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Poll loop started");
            // First poll right away, not an interval later.
            Self::poll_backend(&backend, &board).await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Poll loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::poll_backend(&backend, &board).await;
                    }
                }
            }
            info!("Poll loop stopped");
        });
    }

    fn spawn_runner_loop(&self) {
        let running = Arc::clone(&self.running);
        let board = Arc::clone(&self.board);
        let backend = Arc::clone(&self.backend);
        let imaging = self.imaging.clone();
        let autofocus = Arc::clone(&self.autofocus);
        let paused = Arc::clone(&self.paused);
        let tick = Duration::from_secs(self.config.admission_tick_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Runner loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Runner loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(tick) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::tick(&board, &backend, &imaging, &autofocus, &paused).await;
                    }
                }
            }
            info!("Runner loop stopped");
        });
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        // Queues that stop() already joined leave nothing to abort.
        let handles = self.queue_handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.iter() {
            handle.abort();
        }
    }
}
