//! Mock task backend for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::backend::{BackendError, TaskBackend};
use crate::processors::Artifact;
use crate::task::Task;

/// Mock implementation of the TaskBackend trait.
///
/// Provides controllable behavior for testing:
/// - Set the task list returned by fetch_tasks
/// - Fail the next N uploads to exercise the retry path
/// - Record uploads and terminal reports for assertions
pub struct MockBackend {
    tasks: Mutex<Vec<Task>>,
    upload_failures_remaining: AtomicU32,
    upload_calls: AtomicU32,
    /// 1-based upload call index that fails once, 0 when disarmed.
    fail_upload_call: AtomicU32,
    fetch_failures_remaining: AtomicU32,
    uploads: Mutex<Vec<String>>,
    uploaded_files: Mutex<Vec<std::path::PathBuf>>,
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
    online_reports: AtomicU32,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            upload_failures_remaining: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
            fail_upload_call: AtomicU32::new(0),
            fetch_failures_remaining: AtomicU32::new(0),
            uploads: Mutex::new(Vec::new()),
            uploaded_files: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            online_reports: AtomicU32::new(0),
        }
    }

    /// Replace the task list served to the next fetch.
    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    /// Fail the next `count` uploads with a network error.
    pub fn fail_next_uploads(&self, count: u32) {
        self.upload_failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail the `n`th upload call (1-based, counted across the backend's
    /// lifetime) with a network error, once.
    pub fn fail_upload_call(&self, n: u32) {
        self.fail_upload_call.store(n, Ordering::SeqCst);
    }

    /// Fail the next `count` fetches with a network error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.fetch_failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Task ids whose artifacts were uploaded, in order (one entry per
    /// artifact).
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Primary frame path of every successfully uploaded artifact, in
    /// order.
    pub fn uploaded_files(&self) -> Vec<std::path::PathBuf> {
        self.uploaded_files.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().unwrap().clone()
    }

    pub fn online_reports(&self) -> u32 {
        self.online_reports.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskBackend for MockBackend {
    async fn fetch_tasks(&self) -> Result<Vec<Task>, BackendError> {
        if Self::take_failure(&self.fetch_failures_remaining) {
            return Err(BackendError::Request("mock fetch failure".to_string()));
        }
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn upload_artifact(&self, artifact: &Artifact) -> Result<(), BackendError> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .fail_upload_call
            .compare_exchange(call, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(BackendError::Request("mock upload failure".to_string()));
        }
        if Self::take_failure(&self.upload_failures_remaining) {
            return Err(BackendError::Request("mock upload failure".to_string()));
        }
        self.uploads.lock().unwrap().push(artifact.task_id.clone());
        self.uploaded_files
            .lock()
            .unwrap()
            .push(artifact.primary.clone());
        Ok(())
    }

    async fn mark_task_complete(&self, task_id: &str) -> Result<(), BackendError> {
        self.completed.lock().unwrap().push(task_id.to_string());
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: &str, reason: &str) -> Result<(), BackendError> {
        self.failed
            .lock()
            .unwrap()
            .push((task_id.to_string(), reason.to_string()));
        Ok(())
    }

    async fn report_online(&self) -> Result<(), BackendError> {
        self.online_reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
