//! Task data model: observation tasks and their lifecycle stages.

mod types;

pub use types::{SatelliteEphemeris, Stage, Task};
