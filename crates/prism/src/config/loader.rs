use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "PRISM_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Picks the config file: explicit path, then `$PRISM_CONFIG`, then
/// `<config_dir>/prism/config.json` if it exists. `None` means built-in
/// defaults.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("prism").join("config.json"))
        .filter(|path| path.is_file())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    for pattern in &config.intake.ignore_patterns {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    if config.intake.stability_polls == 0 {
        return Err(ConfigError::Validation {
            message: "intake.stability_polls must be at least 1".to_string(),
        });
    }

    for (lane, settings) in [("analyze", &config.queue.analyze), ("notify", &config.queue.notify)] {
        if settings.max_attempts == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("queue.{}.max_attempts must be at least 1", lane),
            });
        }
        if settings.concurrency == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("queue.{}.concurrency must be at least 1", lane),
            });
        }
    }

    for provider in &config.providers {
        if !has_secret_source(
            provider.api_key.as_deref(),
            provider.api_key_file.as_deref(),
            provider.api_key_env_var.as_deref(),
        ) {
            return Err(ConfigError::Validation {
                message: format!(
                    "Provider '{}' needs one of api_key, api_key_file or api_key_env_var",
                    provider.display_name()
                ),
            });
        }
    }

    let notifications = &config.notifications;
    if notifications.mode == crate::config::DeliveryMode::Live && notifications.api_url.is_none() {
        return Err(ConfigError::Validation {
            message: "notifications.api_url is required in live mode".to_string(),
        });
    }
    if notifications.attempts == 0 {
        return Err(ConfigError::Validation {
            message: "notifications.attempts must be at least 1".to_string(),
        });
    }

    Ok(())
}
