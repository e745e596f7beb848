//! Mock hardware adapter for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::hardware::{HardwareAdapter, HardwareError};
use crate::task::Task;

enum AutofocusBehaviour {
    Succeed,
    Fail(String),
    /// Sleep for the given duration before succeeding.
    Delay(Duration),
    /// Never return; exercises the timeout path.
    Hang,
}

/// Mock implementation of the HardwareAdapter trait.
///
/// Provides controllable behavior for testing:
/// - Record slews and observed tasks for assertions
/// - Configure frames returned per observation
/// - Simulate observation and autofocus failures
pub struct MockHardware {
    supports_autofocus: bool,
    autofocus: AutofocusBehaviour,
    frames_per_task: usize,
    observation_error: Option<String>,
    observation_delay: Option<Duration>,
    slews: Mutex<Vec<(f64, f64)>>,
    observed: Mutex<Vec<String>>,
    autofocus_calls: Mutex<u32>,
    autofocus_targets: Mutex<Vec<(f64, f64)>>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            supports_autofocus: true,
            autofocus: AutofocusBehaviour::Succeed,
            frames_per_task: 2,
            observation_error: None,
            observation_delay: None,
            slews: Mutex::new(Vec::new()),
            observed: Mutex::new(Vec::new()),
            autofocus_calls: Mutex::new(0),
            autofocus_targets: Mutex::new(Vec::new()),
        }
    }

    pub fn without_autofocus(mut self) -> Self {
        self.supports_autofocus = false;
        self
    }

    pub fn with_autofocus_error(mut self, message: &str) -> Self {
        self.autofocus = AutofocusBehaviour::Fail(message.to_string());
        self
    }

    pub fn with_autofocus_delay(mut self, delay: Duration) -> Self {
        self.autofocus = AutofocusBehaviour::Delay(delay);
        self
    }

    pub fn with_autofocus_hang(mut self) -> Self {
        self.autofocus = AutofocusBehaviour::Hang;
        self
    }

    pub fn with_frames_per_task(mut self, frames: usize) -> Self {
        self.frames_per_task = frames;
        self
    }

    pub fn with_observation_error(mut self, message: &str) -> Self {
        self.observation_error = Some(message.to_string());
        self
    }

    pub fn with_observation_delay(mut self, delay: Duration) -> Self {
        self.observation_delay = Some(delay);
        self
    }

    /// Slews recorded so far, in order.
    pub fn slews(&self) -> Vec<(f64, f64)> {
        self.slews.lock().unwrap().clone()
    }

    /// Task ids passed to perform_observation_sequence, in order.
    pub fn observed_tasks(&self) -> Vec<String> {
        self.observed.lock().unwrap().clone()
    }

    pub fn autofocus_calls(&self) -> u32 {
        *self.autofocus_calls.lock().unwrap()
    }

    /// Focus-star coordinates passed to do_autofocus, in order.
    pub fn autofocus_targets(&self) -> Vec<(f64, f64)> {
        self.autofocus_targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl HardwareAdapter for MockHardware {
    async fn connect(&self) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn point_telescope(&self, ra_deg: f64, dec_deg: f64) -> Result<(), HardwareError> {
        self.slews.lock().unwrap().push((ra_deg, dec_deg));
        Ok(())
    }

    async fn perform_observation_sequence(
        &self,
        task: &Task,
    ) -> Result<Vec<PathBuf>, HardwareError> {
        self.observed.lock().unwrap().push(task.id.clone());
        if let Some(delay) = self.observation_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.observation_error {
            return Err(HardwareError::CaptureFailed(message.clone()));
        }
        Ok((0..self.frames_per_task)
            .map(|seq| PathBuf::from(format!("/tmp/mock/{}_{:03}.fits", task.id, seq)))
            .collect())
    }

    fn supports_autofocus(&self) -> bool {
        self.supports_autofocus
    }

    async fn do_autofocus(
        &self,
        target_ra_deg: f64,
        target_dec_deg: f64,
        progress: watch::Sender<String>,
    ) -> Result<(), HardwareError> {
        *self.autofocus_calls.lock().unwrap() += 1;
        self.autofocus_targets
            .lock()
            .unwrap()
            .push((target_ra_deg, target_dec_deg));
        let _ = progress.send("running".to_string());
        match &self.autofocus {
            AutofocusBehaviour::Succeed => Ok(()),
            AutofocusBehaviour::Fail(message) => {
                Err(HardwareError::AutofocusFailed(message.clone()))
            }
            AutofocusBehaviour::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            AutofocusBehaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
