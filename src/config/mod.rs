mod types;

pub use types::*;

use crate::error::ConfigError;
use anyhow::{Context, Result};
use matchbox_common::FieldNumber;
use std::collections::HashMap;
use std::path::Path;

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Load config from default locations or return default config
///
/// The default config has no event code; callers that need a runnable
/// config validate it after applying command-line overrides.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./matchbox.toml",
        "./config.toml",
        "~/.config/matchbox/config.toml",
        "/etc/matchbox/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.event_code.trim().is_empty() {
        return Err(ConfigError::MissingEventCode);
    }

    if config.fields.count == 0 {
        return Err(ConfigError::NoFields);
    }
    scene_map(&config.fields)?;

    for (name, value) in [
        ("pre_buffer_secs", config.clips.pre_buffer_secs),
        ("post_buffer_secs", config.clips.post_buffer_secs),
        ("settle_secs", config.clips.settle_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidBuffer { name, value });
        }
    }

    if config.clips.workers == 0 {
        return Err(ConfigError::ZeroValue("clips.workers"));
    }
    if config.clips.max_attempts == 0 {
        return Err(ConfigError::ZeroValue("clips.max_attempts"));
    }
    if config.controller.switch_attempts == 0 {
        return Err(ConfigError::ZeroValue("controller.switch_attempts"));
    }
    // Omit the key to disable the timeout; zero would abort every match.
    if config.fields.stale_match_timeout_secs == Some(0) {
        return Err(ConfigError::ZeroValue("fields.stale_match_timeout_secs"));
    }

    if config.server.port == 0 {
        return Err(ConfigError::ZeroPort);
    }

    if let Some(path) = &config.recording.path {
        if !path.exists() {
            tracing::warn!("Recording path does not exist yet: {:?}", path);
        }
    }

    Ok(())
}

/// Resolve the field-to-scene mapping.
///
/// With no explicit mapping every configured field maps to "Field N".
/// Explicit mappings may leave fields unmapped; switching to such a field is
/// reported as a configuration error at the time it happens.
pub fn scene_map(fields: &FieldsConfig) -> std::result::Result<HashMap<FieldNumber, String>, ConfigError> {
    if fields.scenes.is_empty() {
        return Ok((1..=fields.count)
            .filter_map(|n| FieldNumber::new(n).ok())
            .map(|field| (field, format!("Field {}", field)))
            .collect());
    }

    let mut map = HashMap::with_capacity(fields.scenes.len());
    for (key, scene) in &fields.scenes {
        let field = key
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(|n| FieldNumber::new(n).ok())
            .ok_or_else(|| ConfigError::InvalidSceneKey(key.clone()))?;

        if field.get() > fields.count {
            return Err(ConfigError::UnknownField {
                field,
                count: fields.count,
            });
        }
        map.insert(field, scene.clone());
    }
    Ok(map)
}
