use super::types::{HardwareAdapter, HardwareError};
use crate::task::Task;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Simulated hardware adapter.
///
/// Slews instantly, writes small placeholder frames under `images_dir` and
/// reports autofocus support. Used by the `sim` adapter backend and as the
/// default for local development.
pub struct SimAdapter {
    images_dir: PathBuf,
    frames_per_task: usize,
    exposure: Duration,
    position: Mutex<(f64, f64)>,
}

impl SimAdapter {
    pub fn new(images_dir: PathBuf) -> Self {
        Self {
            images_dir,
            frames_per_task: 2,
            exposure: Duration::from_millis(200),
            position: Mutex::new((0.0, 0.0)),
        }
    }

    /// Current mount position, for tests and the status surface.
    pub fn position(&self) -> (f64, f64) {
        *self.position.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HardwareAdapter for SimAdapter {
    async fn connect(&self) -> Result<(), HardwareError> {
        info!("sim adapter connected");
        Ok(())
    }

    async fn disconnect(&self) {
        info!("sim adapter disconnected");
    }

    async fn point_telescope(&self, ra_deg: f64, dec_deg: f64) -> Result<(), HardwareError> {
        debug!(ra_deg, dec_deg, "sim slew");
        *self.position.lock().unwrap_or_else(|e| e.into_inner()) = (ra_deg, dec_deg);
        Ok(())
    }

    async fn perform_observation_sequence(
        &self,
        task: &Task,
    ) -> Result<Vec<PathBuf>, HardwareError> {
        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|e| HardwareError::CaptureFailed(e.to_string()))?;

        let mut frames = Vec::with_capacity(self.frames_per_task);
        for seq in 0..self.frames_per_task {
            tokio::time::sleep(self.exposure).await;
            let path = self.images_dir.join(format!("{}_{:03}.fits", task.id, seq));
            tokio::fs::write(&path, b"SIMPLE  =                    T")
                .await
                .map_err(|e| HardwareError::CaptureFailed(e.to_string()))?;
            debug!(task_id = %task.id, frame = %path.display(), "sim frame captured");
            frames.push(path);
        }
        Ok(frames)
    }

    fn supports_autofocus(&self) -> bool {
        true
    }

    async fn do_autofocus(
        &self,
        target_ra_deg: f64,
        target_dec_deg: f64,
        progress: watch::Sender<String>,
    ) -> Result<(), HardwareError> {
        self.point_telescope(target_ra_deg, target_dec_deg).await?;
        let _ = progress.send("measuring focus curve".to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = progress.send("focus position set".to_string());
        info!(target_ra_deg, target_dec_deg, "sim autofocus complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_sim_slew_updates_position() {
        let adapter = SimAdapter::new(std::env::temp_dir());
        adapter.point_telescope(10.5, -42.0).await.unwrap();
        assert_eq!(adapter.position(), (10.5, -42.0));
    }

    #[tokio::test]
    async fn test_sim_observation_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SimAdapter::new(dir.path().to_path_buf());
        let task = fixtures::task("t-sim");
        let frames = adapter.perform_observation_sequence(&task).await.unwrap();
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert!(frame.exists());
        }
    }

    #[tokio::test]
    async fn test_sim_autofocus_slews_and_reports_progress() {
        let adapter = SimAdapter::new(std::env::temp_dir());
        assert!(adapter.supports_autofocus());

        let (tx, rx) = watch::channel(String::new());
        adapter.do_autofocus(17.43, 35.62, tx).await.unwrap();
        assert_eq!(adapter.position(), (17.43, 35.62));
        assert_eq!(*rx.borrow(), "focus position set");
    }
}
