//! Autofocus coordination.
//!
//! Autofocus and imaging are mutually exclusive: a run starts only while
//! the imaging queue is idle, and the imaging worker waits out an active
//! run. The runner loop drives both checks sequentially, so neither side
//! can wait on the other.

mod journal;
mod manager;

pub use journal::{AutofocusJournal, FileJournal, NullJournal};
pub use manager::{AutofocusError, AutofocusManager, AutofocusOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{watch, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutofocusPhase {
    Idle,
    /// Requested but waiting for the imaging queue to drain.
    Requested,
    Running,
}

/// Shared autofocus state, held by the manager, the imaging worker and
/// the status surface.
pub struct FocusState {
    phase: Mutex<AutofocusPhase>,
    /// Signalled on every phase change; imaging waits on it.
    changed: Notify,
    /// Signalled to interrupt an active run.
    cancel: Notify,
    cancel_requested: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    /// Progress feed of the active run, if any.
    progress: Mutex<Option<watch::Receiver<String>>>,
}

impl FocusState {
    pub fn new(last_run: Option<DateTime<Utc>>) -> Self {
        Self {
            phase: Mutex::new(AutofocusPhase::Idle),
            changed: Notify::new(),
            cancel: Notify::new(),
            cancel_requested: AtomicBool::new(false),
            last_run: Mutex::new(last_run),
            progress: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> AutofocusPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Requested or running. Task admission pauses while this holds.
    pub fn engaged(&self) -> bool {
        self.phase() != AutofocusPhase::Idle
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_phase(&self, phase: AutofocusPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
        self.changed.notify_waiters();
    }

    pub(crate) fn record_run(&self, at: DateTime<Utc>) {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// Latest progress message from the active run, if one is running.
    pub fn progress(&self) -> Option<String> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|rx| rx.borrow().clone())
    }

    pub(crate) fn set_progress(&self, rx: Option<watch::Receiver<String>>) {
        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = rx;
    }

    /// Moves Idle to Requested. Returns the phase after the call; an
    /// already requested or running autofocus is left alone.
    pub(crate) fn request(&self) -> AutofocusPhase {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase == AutofocusPhase::Idle {
            *phase = AutofocusPhase::Requested;
            drop(phase);
            self.changed.notify_waiters();
            return AutofocusPhase::Requested;
        }
        *phase
    }

    /// Withdraws a pending request, or interrupts an active run.
    /// Returns false when there was nothing to cancel.
    pub(crate) fn cancel(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        match *phase {
            AutofocusPhase::Idle => false,
            AutofocusPhase::Requested => {
                *phase = AutofocusPhase::Idle;
                drop(phase);
                self.changed.notify_waiters();
                true
            }
            AutofocusPhase::Running => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                self.cancel.notify_waiters();
                true
            }
        }
    }

    pub(crate) fn take_cancel(&self) -> bool {
        self.cancel_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn cancel_notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.cancel.notified()
    }

    /// Blocks while an autofocus run is active. A merely requested run
    /// does not block; it will itself wait for the imaging queue.
    pub async fn wait_while_running(&self) {
        loop {
            // Arm the wait before re-checking the phase, so a transition
            // landing between the check and the await is not missed.
            let changed = self.changed.notified();
            if self.phase() != AutofocusPhase::Running {
                return;
            }
            changed.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_idle() {
        let state = FocusState::new(None);
        assert_eq!(state.request(), AutofocusPhase::Requested);
        assert!(state.engaged());
    }

    #[test]
    fn test_request_while_running_is_noop() {
        let state = FocusState::new(None);
        state.set_phase(AutofocusPhase::Running);
        assert_eq!(state.request(), AutofocusPhase::Running);
    }

    #[test]
    fn test_cancel_pending_request() {
        let state = FocusState::new(None);
        state.request();
        assert!(state.cancel());
        assert_eq!(state.phase(), AutofocusPhase::Idle);
    }

    #[test]
    fn test_cancel_idle_reports_nothing() {
        let state = FocusState::new(None);
        assert!(!state.cancel());
    }

    #[test]
    fn test_cancel_running_sets_flag() {
        let state = FocusState::new(None);
        state.set_phase(AutofocusPhase::Running);
        assert!(state.cancel());
        assert!(state.take_cancel());
        // Flag is consumed.
        assert!(!state.take_cancel());
    }

    #[tokio::test]
    async fn test_wait_while_running_returns_on_idle() {
        let state = FocusState::new(None);
        // Not running, returns immediately.
        state.wait_while_running().await;

        state.set_phase(AutofocusPhase::Requested);
        state.wait_while_running().await;
    }

    #[tokio::test]
    async fn test_wait_while_running_wakes_on_transition() {
        let state = std::sync::Arc::new(FocusState::new(None));
        state.set_phase(AutofocusPhase::Running);

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_while_running().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        state.set_phase(AutofocusPhase::Idle);

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
