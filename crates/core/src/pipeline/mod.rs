//! Staged work-queue pipeline: imaging, processing, upload.
//!
//! Each stage is a [`WorkQueue`] driving a [`StageWorker`]. Items flow
//! forward only; a worker's `on_success` hands the task to the next stage,
//! `on_terminal_failure` evicts it. Only failures classified as retryable
//! by [`StageError::is_retryable`] are retried, and only within the
//! queue's [`RetryPolicy`].

use crate::backend::BackendError;
use crate::hardware::HardwareError;
use crate::processors::ProcessorError;
use crate::task::Stage;
use async_trait::async_trait;
use thiserror::Error;

mod queue;
mod retry;
mod workers;

pub use queue::{QueueClosed, WorkQueue};
pub use retry::RetryPolicy;
pub use workers::{ImagingItem, ImagingWorker, ProcessingItem, ProcessingWorker, UploadItem, UploadWorker};

/// Union of everything that can go wrong inside a stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Network(#[from] BackendError),
}

impl StageError {
    /// Only network failures are worth retrying. A hardware or processor
    /// failure will not resolve by waiting; the sky has moved on by the
    /// time it would.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Network(_))
    }
}

/// An item flowing through a stage queue.
pub trait WorkItem: Send + 'static {
    fn task_id(&self) -> &str;
}

/// Stage-specific behaviour plugged into a [`WorkQueue`].
#[async_trait]
pub trait StageWorker: Send + Sync + 'static {
    type Item: WorkItem;
    type Output: Send;

    /// The lifecycle stage this worker services.
    fn stage(&self) -> Stage;

    /// Performs the stage's work. Called again with the same item on a
    /// retryable failure, so it must be safe to repeat.
    async fn execute(&self, item: &Self::Item) -> Result<Self::Output, StageError>;

    /// Called once execute succeeds. Typically advances the task and
    /// enqueues it on the next stage.
    async fn on_success(&self, item: Self::Item, output: Self::Output);

    /// Called when the failure is non-retryable or retries are exhausted.
    async fn on_terminal_failure(&self, item: Self::Item, error: StageError);
}
