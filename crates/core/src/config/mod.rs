mod loader;
mod types;

pub use loader::{load_config, load_config_from_str, ConfigError};
pub use types::{
    AdapterBackend, ApiConfig, AutofocusConfig, Config, HardwareConfig, SanitizedConfig,
    ServerConfig, TasksConfig,
};
