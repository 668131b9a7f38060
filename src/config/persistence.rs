use crate::error::{MirrorError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load `config.toml` from the config directory, falling back to defaults
/// when the file does not exist.
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        tracing::debug!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        return Ok(Config::default());
    }
    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    let toml_content = std::fs::read_to_string(config_path)
        .map_err(|e| MirrorError::Config(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&toml_content)
        .map_err(|e| MirrorError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MirrorError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| MirrorError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(config_path, toml_str)
        .map_err(|e| MirrorError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
