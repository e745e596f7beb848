pub mod autofocus;
pub mod backend;
pub mod config;
pub mod hardware;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod processors;
pub mod status;
pub mod task;
pub mod testing;

pub use autofocus::{
    AutofocusError, AutofocusJournal, AutofocusManager, AutofocusOutcome, AutofocusPhase,
    FileJournal, FocusState, NullJournal,
};
pub use backend::{BackendError, HttpTaskBackend, TaskBackend};
pub use config::{
    load_config, load_config_from_str, AdapterBackend, Config, ConfigError, SanitizedConfig,
};
pub use hardware::{HardwareAdapter, HardwareError, SimAdapter};
pub use manager::{TaskBoard, TaskManager, TaskOutcome};
pub use pipeline::{RetryPolicy, StageError};
pub use processors::{Artifact, ImageProcessor, ProcessorChain, ProcessorError};
pub use status::{StatusHub, StatusSnapshot};
pub use task::{SatelliteEphemeris, Stage, Task};
