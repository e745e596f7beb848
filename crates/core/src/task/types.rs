//! Core task data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Orbital elements for a satellite target, as delivered by the backend.
///
/// The TLE lines are passed through to the hardware adapter verbatim; the
/// core never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SatelliteEphemeris {
    /// Backend identifier of the satellite.
    pub satellite_id: String,
    /// Human-readable satellite name (e.g., "ISS (ZARYA)").
    pub name: String,
    /// Two-line element set, most recent first.
    pub tle: [String; 2],
}

/// An observation task assigned to this telescope.
///
/// The identifier is opaque and stable across poll cycles; everything else
/// is a snapshot of what the backend knew when the task was fetched. A task
/// is mutated only by the pipeline stage currently owning it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier, assigned by the backend.
    pub id: String,

    /// Target right ascension in degrees.
    pub target_ra_deg: f64,

    /// Target declination in degrees.
    pub target_dec_deg: f64,

    /// Scheduled start of the observation window.
    pub start_at: DateTime<Utc>,

    /// Scheduled end of the observation window. Tasks whose window has
    /// closed before admission are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_at: Option<DateTime<Utc>>,

    /// Filter assigned by the scheduler, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_name: Option<String>,

    /// Satellite ephemeris for moving targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite: Option<SatelliteEphemeris>,
}

impl Task {
    /// Returns true if the task's observation window has already closed.
    pub fn window_closed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.stop_at, Some(stop) if stop < now)
    }

    /// Returns true if the task's start time has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now
    }
}

/// One phase of a task's lifecycle.
///
/// Progression is strictly forward:
///
/// ```text
/// Pending -> Imaging -> Processing -> Uploading -> Completed
///                                          |
///      (any in-flight stage) -------------> Failed
/// ```
///
/// No stage is ever revisited; upload retries stay within `Uploading`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Known to the scheduler, waiting for its start time.
    Pending,
    /// Hardware is capturing (or queued to capture) the observation.
    Imaging,
    /// Captured frames are running through the processor chain.
    Processing,
    /// Processed artifact is being transmitted to the backend.
    Uploading,
    /// Upload confirmed; task is done (terminal).
    Completed,
    /// A stage failed terminally (terminal).
    Failed,
}

impl Stage {
    /// Returns true if this is a terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Returns true if a worker currently owns the task.
    ///
    /// In-flight tasks are never re-admitted from a poll snapshot, even
    /// when the backend still lists them.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Stage::Imaging | Stage::Processing | Stage::Uploading)
    }

    /// Returns the stage as a string (for status payloads and filtering).
    pub fn state_type(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Imaging => "imaging",
            Stage::Processing => "processing",
            Stage::Uploading => "uploading",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// Returns the next in-flight stage, if any.
    ///
    /// Used by the board to enforce that transitions only ever move
    /// forward through the pipeline.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Imaging),
            Stage::Imaging => Some(Stage::Processing),
            Stage::Processing => Some(Stage::Uploading),
            Stage::Uploading | Stage::Completed | Stage::Failed => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.state_type())
    }
}
