//! Testing utilities and mock implementations.
//!
//! Mock implementations of the hardware, backend and processor traits,
//! allowing lifecycle tests without real infrastructure.

mod mock_backend;
mod mock_hardware;
mod mock_processor;

pub use mock_backend::MockBackend;
pub use mock_hardware::MockHardware;
pub use mock_processor::{FailingProcessor, RecordingProcessor};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::task::{SatelliteEphemeris, Task};
    use chrono::Utc;

    /// Create a test task with reasonable defaults, due immediately.
    pub fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            target_ra_deg: 10.0,
            target_dec_deg: 20.0,
            start_at: Utc::now(),
            stop_at: None,
            filter_name: None,
            satellite: None,
        }
    }

    /// Create a test task tracking a satellite.
    pub fn satellite_task(id: &str) -> Task {
        Task {
            satellite: Some(SatelliteEphemeris {
                satellite_id: format!("sat-{}", id),
                name: "TESTSAT".to_string(),
                tle: [
                    "1 25544U 98067A   24001.00000000  .00016717  00000-0  10270-3 0  9000"
                        .to_string(),
                    "2 25544  51.6400 208.9163 0006317  69.9862  25.2906 15.49560532    10"
                        .to_string(),
                ],
            }),
            ..task(id)
        }
    }
}
