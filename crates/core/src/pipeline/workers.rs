use super::{StageError, StageWorker, WorkItem, WorkQueue};
use crate::autofocus::FocusState;
use crate::backend::TaskBackend;
use crate::hardware::HardwareAdapter;
use crate::manager::TaskBoard;
use crate::processors::{Artifact, ProcessorChain};
use crate::task::{Stage, Task};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A task admitted into the imaging stage.
pub struct ImagingItem {
    pub task: Task,
}

impl WorkItem for ImagingItem {
    fn task_id(&self) -> &str {
        &self.task.id
    }
}

/// A task with captured frames awaiting processing.
pub struct ProcessingItem {
    pub task: Task,
    pub frames: Vec<PathBuf>,
}

impl WorkItem for ProcessingItem {
    fn task_id(&self) -> &str {
        &self.task.id
    }
}

/// A task with processed artifacts awaiting upload.
pub struct UploadItem {
    pub task: Task,
    pub artifacts: Vec<Artifact>,
    /// Artifacts already transmitted, so a retried upload resumes after
    /// the last one that went through instead of re-sending them.
    uploaded: AtomicUsize,
}

impl UploadItem {
    pub fn new(task: Task, artifacts: Vec<Artifact>) -> Self {
        Self {
            task,
            artifacts,
            uploaded: AtomicUsize::new(0),
        }
    }
}

impl WorkItem for UploadItem {
    fn task_id(&self) -> &str {
        &self.task.id
    }
}

async fn fail_task(
    board: &TaskBoard,
    backend: &dyn TaskBackend,
    task_id: &str,
    error: &StageError,
) {
    board.finish(task_id, Stage::Failed, Some(&error.to_string()));
    if let Err(e) = backend.mark_task_failed(task_id, &error.to_string()).await {
        warn!(task_id = %task_id, error = %e, "Could not report task failure to backend");
    }
}

/// Imaging stage: slew, observe, hand frames to processing.
pub struct ImagingWorker {
    board: Arc<TaskBoard>,
    hardware: Arc<dyn HardwareAdapter>,
    backend: Arc<dyn TaskBackend>,
    focus: Arc<FocusState>,
    processing: WorkQueue<ProcessingWorker>,
}

impl ImagingWorker {
    pub fn new(
        board: Arc<TaskBoard>,
        hardware: Arc<dyn HardwareAdapter>,
        backend: Arc<dyn TaskBackend>,
        focus: Arc<FocusState>,
        processing: WorkQueue<ProcessingWorker>,
    ) -> Self {
        Self {
            board,
            hardware,
            backend,
            focus,
            processing,
        }
    }
}

#[async_trait]
impl StageWorker for ImagingWorker {
    type Item = ImagingItem;
    type Output = Vec<PathBuf>;

    fn stage(&self) -> Stage {
        Stage::Imaging
    }

    async fn execute(&self, item: &ImagingItem) -> Result<Vec<PathBuf>, StageError> {
        // Admission already avoids starting during autofocus; this wait
        // covers items that were enqueued directly.
        self.focus.wait_while_running().await;

        let task = &item.task;
        info!(task_id = %task.id, ra = task.target_ra_deg, dec = task.target_dec_deg, "Imaging task");

        self.hardware
            .point_telescope(task.target_ra_deg, task.target_dec_deg)
            .await?;
        let frames = self.hardware.perform_observation_sequence(task).await?;
        debug!(task_id = %task.id, frames = frames.len(), "Observation sequence complete");
        Ok(frames)
    }

    async fn on_success(&self, item: ImagingItem, frames: Vec<PathBuf>) {
        let task_id = item.task.id.clone();
        if let Err(e) = self.board.advance(&task_id, Stage::Processing) {
            warn!(task_id = %task_id, error = %e, "Dropping imaged task no longer tracked");
            return;
        }
        if self
            .processing
            .submit(ProcessingItem {
                task: item.task,
                frames,
            })
            .is_err()
        {
            error!(task_id = %task_id, "Processing queue closed, task lost");
            self.board.finish(&task_id, Stage::Failed, Some("processing queue closed"));
        }
    }

    async fn on_terminal_failure(&self, item: ImagingItem, error: StageError) {
        fail_task(&self.board, self.backend.as_ref(), &item.task.id, &error).await;
    }
}

/// Processing stage: run the processor chain over captured frames.
pub struct ProcessingWorker {
    board: Arc<TaskBoard>,
    backend: Arc<dyn TaskBackend>,
    chain: ProcessorChain,
    upload: WorkQueue<UploadWorker>,
}

impl ProcessingWorker {
    pub fn new(
        board: Arc<TaskBoard>,
        backend: Arc<dyn TaskBackend>,
        chain: ProcessorChain,
        upload: WorkQueue<UploadWorker>,
    ) -> Self {
        Self {
            board,
            backend,
            chain,
            upload,
        }
    }
}

#[async_trait]
impl StageWorker for ProcessingWorker {
    type Item = ProcessingItem;
    type Output = Vec<Artifact>;

    fn stage(&self) -> Stage {
        Stage::Processing
    }

    async fn execute(&self, item: &ProcessingItem) -> Result<Vec<Artifact>, StageError> {
        let artifacts = self
            .chain
            .process_frames(&item.task, item.frames.clone())
            .await?;
        Ok(artifacts)
    }

    async fn on_success(&self, item: ProcessingItem, artifacts: Vec<Artifact>) {
        let task_id = item.task.id.clone();
        if let Err(e) = self.board.advance(&task_id, Stage::Uploading) {
            warn!(task_id = %task_id, error = %e, "Dropping processed task no longer tracked");
            return;
        }
        if self
            .upload
            .submit(UploadItem::new(item.task, artifacts))
            .is_err()
        {
            error!(task_id = %task_id, "Upload queue closed, task lost");
            self.board.finish(&task_id, Stage::Failed, Some("upload queue closed"));
        }
    }

    async fn on_terminal_failure(&self, item: ProcessingItem, error: StageError) {
        fail_task(&self.board, self.backend.as_ref(), &item.task.id, &error).await;
    }
}

/// Upload stage: push artifacts to the backend and confirm completion.
pub struct UploadWorker {
    board: Arc<TaskBoard>,
    backend: Arc<dyn TaskBackend>,
    keep_images: bool,
}

impl UploadWorker {
    pub fn new(board: Arc<TaskBoard>, backend: Arc<dyn TaskBackend>, keep_images: bool) -> Self {
        Self {
            board,
            backend,
            keep_images,
        }
    }
}

#[async_trait]
impl StageWorker for UploadWorker {
    type Item = UploadItem;
    type Output = ();

    fn stage(&self) -> Stage {
        Stage::Uploading
    }

    async fn execute(&self, item: &UploadItem) -> Result<(), StageError> {
        // Resumes from the first artifact the backend has not confirmed.
        while let Some(artifact) = item.artifacts.get(item.uploaded.load(Ordering::SeqCst)) {
            self.backend.upload_artifact(artifact).await?;
            item.uploaded.fetch_add(1, Ordering::SeqCst);
        }
        self.backend.mark_task_complete(&item.task.id).await?;
        Ok(())
    }

    async fn on_success(&self, item: UploadItem, _output: ()) {
        info!(task_id = %item.task.id, artifacts = item.artifacts.len(), "Task completed");
        self.board.finish(&item.task.id, Stage::Completed, None);

        if !self.keep_images {
            for path in item.artifacts.iter().flat_map(|a| a.files()) {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    debug!(path = %path.display(), error = %e, "Frame cleanup failed");
                }
            }
        }
    }

    async fn on_terminal_failure(&self, item: UploadItem, error: StageError) {
        fail_task(&self.board, self.backend.as_ref(), &item.task.id, &error).await;
    }
}
