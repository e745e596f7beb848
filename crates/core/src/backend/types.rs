use crate::processors::Artifact;
use crate::task::Task;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response payload: {0}")]
    InvalidPayload(String),

    #[error("artifact file error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Request(e.to_string())
    }
}

/// Remote task service. The daemon polls it for scheduled tasks, pushes
/// observation artifacts back and reports terminal task outcomes.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Fetches the current task list for this telescope. The returned list
    /// is the backend's full view; reconciliation against local state is the
    /// caller's job.
    async fn fetch_tasks(&self) -> Result<Vec<Task>, BackendError>;

    /// Uploads one processed artifact (primary frame plus any extras).
    async fn upload_artifact(&self, artifact: &Artifact) -> Result<(), BackendError>;

    /// Reports a task as successfully completed.
    async fn mark_task_complete(&self, task_id: &str) -> Result<(), BackendError>;

    /// Reports a task as failed, with a short reason.
    async fn mark_task_failed(&self, task_id: &str, reason: &str) -> Result<(), BackendError>;

    /// Heartbeat telling the backend this telescope is online.
    async fn report_online(&self) -> Result<(), BackendError>;
}
