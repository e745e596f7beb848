use super::journal::AutofocusJournal;
use super::{AutofocusPhase, FocusState};
use crate::config::AutofocusConfig;
use crate::hardware::HardwareAdapter;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AutofocusError {
    #[error("hardware adapter does not support autofocus")]
    Unsupported,
}

/// Outcome of a single autofocus run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutofocusOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Drives the autofocus lifecycle: Idle -> Requested -> Running -> Idle.
///
/// `check_and_run` is called from the runner loop; a request only becomes
/// a run when the caller reports the imaging queue idle. Every outcome,
/// including failures and timeouts, journals a fresh timestamp.
pub struct AutofocusManager {
    state: Arc<FocusState>,
    hardware: Arc<dyn HardwareAdapter>,
    journal: Arc<dyn AutofocusJournal>,
    config: AutofocusConfig,
}

impl AutofocusManager {
    pub fn new(
        state: Arc<FocusState>,
        hardware: Arc<dyn HardwareAdapter>,
        journal: Arc<dyn AutofocusJournal>,
        config: AutofocusConfig,
    ) -> Self {
        Self {
            state,
            hardware,
            journal,
            config,
        }
    }

    pub fn state(&self) -> &Arc<FocusState> {
        &self.state
    }

    /// Requests an autofocus run. The run starts on the next runner tick
    /// that finds the imaging queue idle.
    pub fn request(&self) -> Result<AutofocusPhase, AutofocusError> {
        if !self.hardware.supports_autofocus() {
            return Err(AutofocusError::Unsupported);
        }
        let phase = self.state.request();
        info!(?phase, "Autofocus requested");
        Ok(phase)
    }

    /// Cancels a pending request or interrupts an active run.
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.cancel();
        if cancelled {
            info!("Autofocus cancelled");
        }
        cancelled
    }

    /// Files a request when scheduled autofocus is enabled and the last
    /// run is older than the configured interval.
    pub fn maybe_schedule(&self) {
        if !self.config.scheduled_enabled || !self.hardware.supports_autofocus() {
            return;
        }
        if self.state.engaged() {
            return;
        }
        let due = match self.state.last_run() {
            None => true,
            Some(last) => {
                Utc::now() - last >= ChronoDuration::minutes(self.config.interval_minutes as i64)
            }
        };
        if due {
            debug!("Scheduled autofocus due");
            self.state.request();
        }
    }

    /// Runs a pending request if the imaging queue is idle. Returns the
    /// outcome, or None when there was nothing to do or imaging is busy
    /// (the request stays pending).
    pub async fn check_and_run(&self, imaging_idle: bool) -> Option<AutofocusOutcome> {
        if self.state.phase() != AutofocusPhase::Requested {
            return None;
        }
        if !imaging_idle {
            debug!("Autofocus deferred, imaging queue busy");
            return None;
        }

        self.state.take_cancel();
        self.state.set_phase(AutofocusPhase::Running);
        info!("Autofocus starting");

        let outcome = self.run_once().await;

        // Journal on every outcome so a flaky focuser does not retrigger
        // scheduled runs back to back.
        let now = Utc::now();
        self.state.record_run(now);
        self.journal.record(now);
        self.state.set_phase(AutofocusPhase::Idle);

        let label = match &outcome {
            AutofocusOutcome::Completed => {
                info!("Autofocus complete");
                "completed"
            }
            AutofocusOutcome::Failed(e) => {
                warn!(error = %e, "Autofocus failed");
                "failed"
            }
            AutofocusOutcome::TimedOut => {
                warn!(timeout_secs = self.config.timeout_secs, "Autofocus timed out");
                "timed_out"
            }
            AutofocusOutcome::Cancelled => {
                info!("Autofocus run interrupted");
                "cancelled"
            }
        };
        crate::metrics::AUTOFOCUS_RUNS.with_label_values(&[label]).inc();
        Some(outcome)
    }

    async fn run_once(&self) -> AutofocusOutcome {
        let cancelled = self.state.cancel_notified();
        tokio::pin!(cancelled);

        // A cancel that raced the Requested -> Running transition.
        if self.state.take_cancel() {
            return AutofocusOutcome::Cancelled;
        }

        let (progress_tx, progress_rx) = watch::channel("starting".to_string());
        self.state.set_progress(Some(progress_rx));

        let run = self.hardware.do_autofocus(
            self.config.target_ra_deg,
            self.config.target_dec_deg,
            progress_tx,
        );

        let outcome = tokio::select! {
            result = run => match result {
                Ok(()) => AutofocusOutcome::Completed,
                Err(e) => AutofocusOutcome::Failed(e.to_string()),
            },
            _ = &mut cancelled => AutofocusOutcome::Cancelled,
            _ = tokio::time::sleep(self.config.timeout()) => AutofocusOutcome::TimedOut,
        };

        self.state.set_progress(None);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofocus::NullJournal;
    use crate::testing::MockHardware;
    use std::time::Duration;

    fn manager_with(hardware: MockHardware, config: AutofocusConfig) -> AutofocusManager {
        AutofocusManager::new(
            Arc::new(FocusState::new(None)),
            Arc::new(hardware),
            Arc::new(NullJournal),
            config,
        )
    }

    #[tokio::test]
    async fn test_request_requires_support() {
        let hardware = MockHardware::new().without_autofocus();
        let manager = manager_with(hardware, AutofocusConfig::default());
        assert!(matches!(manager.request(), Err(AutofocusError::Unsupported)));
    }

    #[tokio::test]
    async fn test_run_completes_and_journals() {
        let manager = manager_with(MockHardware::new(), AutofocusConfig::default());
        manager.request().unwrap();

        let outcome = manager.check_and_run(true).await;
        assert_eq!(outcome, Some(AutofocusOutcome::Completed));
        assert_eq!(manager.state().phase(), AutofocusPhase::Idle);
        assert!(manager.state().last_run().is_some());
    }

    #[tokio::test]
    async fn test_run_slews_to_configured_focus_star() {
        let hardware = Arc::new(MockHardware::new());
        let config = AutofocusConfig {
            target_ra_deg: 10.0,
            target_dec_deg: -5.0,
            ..AutofocusConfig::default()
        };
        let manager = AutofocusManager::new(
            Arc::new(FocusState::new(None)),
            hardware.clone(),
            Arc::new(NullJournal),
            config,
        );
        manager.request().unwrap();
        manager.check_and_run(true).await;
        assert_eq!(hardware.autofocus_targets(), vec![(10.0, -5.0)]);
    }

    #[tokio::test]
    async fn test_deferred_while_imaging_busy() {
        let manager = manager_with(MockHardware::new(), AutofocusConfig::default());
        manager.request().unwrap();

        assert_eq!(manager.check_and_run(false).await, None);
        assert_eq!(manager.state().phase(), AutofocusPhase::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let hardware = MockHardware::new().with_autofocus_hang();
        let config = AutofocusConfig {
            timeout_secs: 300,
            ..AutofocusConfig::default()
        };
        let manager = manager_with(hardware, config);
        manager.request().unwrap();

        let outcome = manager.check_and_run(true).await;
        assert_eq!(outcome, Some(AutofocusOutcome::TimedOut));
        assert_eq!(manager.state().phase(), AutofocusPhase::Idle);
        // Timed-out runs still refresh the timestamp.
        assert!(manager.state().last_run().is_some());
    }

    #[tokio::test]
    async fn test_failure_still_journals() {
        let hardware = MockHardware::new().with_autofocus_error("focuser jammed");
        let manager = manager_with(hardware, AutofocusConfig::default());
        manager.request().unwrap();

        let outcome = manager.check_and_run(true).await;
        assert!(matches!(outcome, Some(AutofocusOutcome::Failed(_))));
        assert!(manager.state().last_run().is_some());
    }

    #[tokio::test]
    async fn test_scheduled_autofocus_due_when_never_run() {
        let config = AutofocusConfig {
            scheduled_enabled: true,
            interval_minutes: 120,
            ..AutofocusConfig::default()
        };
        let manager = manager_with(MockHardware::new(), config);
        manager.maybe_schedule();
        assert_eq!(manager.state().phase(), AutofocusPhase::Requested);
    }

    #[tokio::test]
    async fn test_scheduled_autofocus_not_due_after_recent_run() {
        let config = AutofocusConfig {
            scheduled_enabled: true,
            interval_minutes: 120,
            ..AutofocusConfig::default()
        };
        let state = Arc::new(FocusState::new(Some(Utc::now())));
        let manager = AutofocusManager::new(
            state,
            Arc::new(MockHardware::new()),
            Arc::new(NullJournal),
            config,
        );
        manager.maybe_schedule();
        assert_eq!(manager.state().phase(), AutofocusPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancel_pending_request() {
        let manager = manager_with(MockHardware::new(), AutofocusConfig::default());
        manager.request().unwrap();
        assert!(manager.cancel());
        assert_eq!(manager.check_and_run(true).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_active_run() {
        let hardware = MockHardware::new().with_autofocus_delay(Duration::from_secs(60));
        let manager = Arc::new(manager_with(hardware, AutofocusConfig::default()));
        manager.request().unwrap();

        let runner = manager.clone();
        let handle = tokio::spawn(async move { runner.check_and_run(true).await });

        // Let the run start, then cancel it.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.state().phase(), AutofocusPhase::Running);
        assert!(manager.cancel());

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, Some(AutofocusOutcome::Cancelled));
    }
}
