//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate locations.
//!
//! # Environment Overrides
//!
//! - `COUNTDOWN_DATA_DIR` overrides [`data_dir`]
//! - `COUNTDOWN_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root (`dirs::data_dir()/countdown/`).
///
/// Holds the timer snapshot.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("COUNTDOWN_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("countdown"))
        .unwrap_or_else(|| PathBuf::from("/tmp/countdown-data"))
}

/// Application config directory (`dirs::config_dir()/countdown/`).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("COUNTDOWN_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("countdown"))
        .unwrap_or_else(|| PathBuf::from("/tmp/countdown-config"))
}

/// Config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Timer snapshot file (`data_dir()/timers.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    data_dir().join("timers.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_their_dirs() {
        assert!(config_file().starts_with(config_dir()));
        assert!(state_file().starts_with(data_dir()));
        assert_eq!(
            state_file().file_name().and_then(|n| n.to_str()),
            Some("timers.json")
        );
    }
}
