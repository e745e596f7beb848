use super::types::Config;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, with `SCOPEHUB_*` environment
/// variables layered on top (e.g. `SCOPEHUB_API__ACCESS_TOKEN`).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("SCOPEHUB_").split("__"))
        .extract()
        .map_err(Box::new)?;
    validate(&config)?;
    Ok(config)
}

/// Loads configuration from a TOML string. Used in tests.
pub fn load_config_from_str(toml: &str) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Toml::string(toml))
        .extract()
        .map_err(Box::new)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.api.access_token.is_empty() {
        return Err(ConfigError::Invalid(
            "api.access_token must not be empty".to_string(),
        ));
    }
    if config.api.telescope_id.is_empty() {
        return Err(ConfigError::Invalid(
            "api.telescope_id must not be empty".to_string(),
        ));
    }
    if config.tasks.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "tasks.poll_interval_secs must be greater than zero".to_string(),
        ));
    }
    if config.tasks.admission_tick_secs == 0 {
        return Err(ConfigError::Invalid(
            "tasks.admission_tick_secs must be greater than zero".to_string(),
        ));
    }
    if config.tasks.retry_backoff_factor < 1.0 {
        return Err(ConfigError::Invalid(
            "tasks.retry_backoff_factor must be at least 1.0".to_string(),
        ));
    }
    if config.autofocus.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "autofocus.timeout_secs must be greater than zero".to_string(),
        ));
    }
    if config.autofocus.scheduled_enabled && config.autofocus.interval_minutes == 0 {
        return Err(ConfigError::Invalid(
            "autofocus.interval_minutes must be greater than zero when scheduling is enabled"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[api]
access_token = "tok"
telescope_id = "scope-1"
"#;

    #[test]
    fn test_load_valid_config() {
        let config = load_config_from_str(VALID).unwrap();
        assert_eq!(config.api.telescope_id, "scope-1");
    }

    #[test]
    fn test_reject_empty_token() {
        let toml = r#"
[api]
access_token = ""
telescope_id = "scope-1"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_reject_zero_poll_interval() {
        let toml = r#"
[api]
access_token = "tok"
telescope_id = "scope-1"

[tasks]
poll_interval_secs = 0
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_reject_backoff_factor_below_one() {
        let toml = r#"
[api]
access_token = "tok"
telescope_id = "scope-1"

[tasks]
retry_backoff_factor = 0.5
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_reject_scheduled_autofocus_without_interval() {
        let toml = r#"
[api]
access_token = "tok"
telescope_id = "scope-1"

[autofocus]
scheduled_enabled = true
interval_minutes = 0
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = load_config(Path::new("/nonexistent/scopehub.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
