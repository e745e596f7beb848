use crate::task::Task;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("hardware not connected")]
    NotConnected,

    #[error("slew failed: {0}")]
    SlewFailed(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("autofocus failed: {0}")]
    AutofocusFailed(String),

    #[error("autofocus not supported by this adapter")]
    AutofocusUnsupported,

    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Abstraction over the telescope control stack (mount, camera, focuser).
///
/// Implementations wrap a concrete controller (N.I.N.A., KStars, INDI,
/// directly composed devices) or a simulation. All methods take `&self`;
/// adapters manage their own interior state and device connections.
#[async_trait]
pub trait HardwareAdapter: Send + Sync {
    /// Establishes connections to the underlying devices.
    async fn connect(&self) -> Result<(), HardwareError>;

    /// Tears down device connections. Errors are logged, not propagated.
    async fn disconnect(&self);

    /// Slews the mount to the given J2000 coordinates and waits for the
    /// slew to settle.
    async fn point_telescope(&self, ra_deg: f64, dec_deg: f64) -> Result<(), HardwareError>;

    /// Runs the full observation sequence for a task and returns the paths
    /// of the captured frames. At least one frame is returned on success.
    async fn perform_observation_sequence(&self, task: &Task)
        -> Result<Vec<PathBuf>, HardwareError>;

    /// Whether this adapter can run an autofocus routine.
    fn supports_autofocus(&self) -> bool;

    /// Slews to the given focus star and runs the autofocus routine to
    /// completion, publishing human-readable progress on the channel.
    ///
    /// Callers are expected to enforce their own timeout; implementations
    /// may block for minutes on real hardware.
    async fn do_autofocus(
        &self,
        target_ra_deg: f64,
        target_dec_deg: f64,
        progress: watch::Sender<String>,
    ) -> Result<(), HardwareError>;
}
