use std::sync::Arc;
use scopehub_core::{Config, SanitizedConfig, StatusHub, TaskManager};

/// Shared application state
pub struct AppState {
    config: Config,
    manager: Arc<TaskManager>,
    status_hub: Arc<StatusHub>,
}

impl AppState {
    pub fn new(config: Config, manager: Arc<TaskManager>, status_hub: Arc<StatusHub>) -> Self {
        Self {
            config,
            manager,
            status_hub,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn status_hub(&self) -> &Arc<StatusHub> {
        &self.status_hub
    }
}
