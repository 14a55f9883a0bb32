//! Path resolution for converge
//!
//! # Environment Variables
//!
//! - `CONVERGE_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/converge`)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `CONVERGE_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/converge` (if set)
//! 3. `~/.config/converge`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "CONVERGE_CONFIG_DIR";

/// Name of the settings file inside the config directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Get the converge config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("converge");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("converge");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Default settings file location
pub fn settings_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
