//! Loading [`Config`] from TOML files.

use std::path::Path;

use anyhow::{Context, Result};
use pf_core::Config;

/// Default search locations, tried in order.
const DEFAULT_PATHS: [&str; 4] = [
    "./config.toml",
    "./pixelforge.toml",
    "~/.config/pixelforge/config.toml",
    "/etc/pixelforge/config.toml",
];

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Load config from `custom_path`, else the first default location that
/// exists, else the built-in defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!(path = %path.display(), "using config file");
            return load_config(path);
        }
    }

    Ok(Config::default())
}
