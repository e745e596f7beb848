use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub autofocus: AutofocusConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Backend API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    /// Personal access token for the backend API.
    pub access_token: String,
    /// Backend identifier of this telescope.
    pub telescope_id: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u32,
}

impl ApiConfig {
    /// Base URL for the backend API.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

fn default_api_host() -> String {
    "api.example-observatory.net".to_string()
}

fn default_api_port() -> u16 {
    443
}

fn default_api_timeout() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

/// Hardware adapter selection and configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub adapter: AdapterBackend,
    /// Directory where captured frames are written.
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterBackend::default(),
            images_dir: default_images_dir(),
        }
    }
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("images")
}

/// Available hardware adapter backends.
///
/// The core depends only on the `HardwareAdapter` trait; this enum is used
/// at wiring time to pick a concrete implementation.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterBackend {
    /// Simulated hardware, for development and tests.
    #[default]
    Sim,
    /// N.I.N.A. advanced HTTP API.
    Nina,
    /// KStars/Ekos over DBus.
    Kstars,
    /// Raw INDI protocol.
    Indi,
    /// Directly composed devices (mount + camera + filter wheel).
    Direct,
}

/// Task polling, admission and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TasksConfig {
    /// Seconds between backend task-list polls (default: 15).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds between admission checks in the runner loop (default: 1).
    #[serde(default = "default_admission_tick")]
    pub admission_tick_secs: u64,
    /// Keep captured frames on disk after a successful upload.
    #[serde(default)]
    pub keep_images: bool,
    /// Maximum upload retry attempts before a task is failed (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_task_retries: u32,
    /// Delay before the first upload retry, in seconds (default: 30).
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_secs: u64,
    /// Cap on the upload retry delay, in seconds (default: 600).
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_secs: u64,
    /// Multiplicative backoff factor between retries (default: 2.0).
    #[serde(default = "default_backoff_factor")]
    pub retry_backoff_factor: f64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            admission_tick_secs: default_admission_tick(),
            keep_images: false,
            max_task_retries: default_max_retries(),
            initial_retry_delay_secs: default_initial_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
            retry_backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_poll_interval() -> u64 {
    15
}

fn default_admission_tick() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay() -> u64 {
    30
}

fn default_max_retry_delay() -> u64 {
    600
}

fn default_backoff_factor() -> f64 {
    2.0
}

/// Autofocus scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutofocusConfig {
    /// Run autofocus automatically on a fixed interval.
    #[serde(default)]
    pub scheduled_enabled: bool,
    /// Minutes between scheduled autofocus runs (default: 120).
    #[serde(default = "default_autofocus_interval")]
    pub interval_minutes: u64,
    /// Hard cap on a single autofocus hardware wait, in seconds
    /// (default: 300).
    #[serde(default = "default_autofocus_timeout")]
    pub timeout_secs: u64,
    /// Where the last-autofocus timestamp is journaled. No journal means
    /// scheduled autofocus treats every startup as overdue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
    /// Right ascension of the focus star, in degrees (default: Mirach).
    #[serde(default = "default_autofocus_target_ra")]
    pub target_ra_deg: f64,
    /// Declination of the focus star, in degrees (default: Mirach).
    #[serde(default = "default_autofocus_target_dec")]
    pub target_dec_deg: f64,
}

impl Default for AutofocusConfig {
    fn default() -> Self {
        Self {
            scheduled_enabled: false,
            interval_minutes: default_autofocus_interval(),
            timeout_secs: default_autofocus_timeout(),
            journal_path: None,
            target_ra_deg: default_autofocus_target_ra(),
            target_dec_deg: default_autofocus_target_dec(),
        }
    }
}

impl AutofocusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_autofocus_interval() -> u64 {
    120
}

fn default_autofocus_timeout() -> u64 {
    300
}

fn default_autofocus_target_ra() -> f64 {
    17.43
}

fn default_autofocus_target_dec() -> f64 {
    35.62
}

/// Local HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8585
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub api: SanitizedApiConfig,
    pub hardware: HardwareConfig,
    pub tasks: TasksConfig,
    pub autofocus: AutofocusConfig,
    pub server: ServerConfig,
}

/// Sanitized API config (access token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedApiConfig {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub access_token_configured: bool,
    pub telescope_id: String,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            api: SanitizedApiConfig {
                host: config.api.host.clone(),
                port: config.api.port,
                use_ssl: config.api.use_ssl,
                access_token_configured: !config.api.access_token.is_empty(),
                telescope_id: config.api.telescope_id.clone(),
                timeout_secs: config.api.timeout_secs,
            },
            hardware: config.hardware.clone(),
            tasks: config.tasks.clone(),
            autofocus: config.autofocus.clone(),
            server: config.server.clone(),
        }
    }
}
