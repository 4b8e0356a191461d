//! Configuration types for the timer engine and host bridge.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Capacity and eviction limits.
    pub limits: LimitsConfig,
    /// Tick period and cleanup delays.
    pub timing: TimingConfig,
    /// Labels shown on the timer controls.
    pub appearance: AppearanceConfig,
    /// Snapshot location and identity.
    pub persistence: PersistenceConfig,
    /// Built-in event sink settings.
    pub render: RenderConfig,
}

/// Capacity and eviction limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrently active timers per scope.
    pub max_timers_per_scope: usize,
    /// Consecutive render failures after which a timer is evicted.
    pub max_render_failures: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_timers_per_scope: 5,
            max_render_failures: 3,
        }
    }
}

/// Tick period and cleanup delays, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Countdown period. Also the paused-state wake-up interval.
    pub tick_interval_ms: u64,
    /// How long `00:00:00` stays visible before the artifact is removed.
    pub finish_linger_ms: u64,
    /// Delay before retrying a failed render triggered by a toggle.
    pub toggle_retry_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            finish_linger_ms: 1000,
            toggle_retry_delay_ms: 500,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    #[must_use]
    pub fn finish_linger(&self) -> Duration {
        Duration::from_millis(self.finish_linger_ms)
    }

    #[must_use]
    pub fn toggle_retry_delay(&self) -> Duration {
        Duration::from_millis(self.toggle_retry_delay_ms)
    }
}

/// Labels shown on the timer controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    /// Shown on the toggle control while the timer runs.
    pub running_emoji: String,
    /// Shown on the toggle control while the timer is paused.
    pub paused_emoji: String,
    /// Shown on the reset control (visible only while paused).
    pub reset_emoji: String,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            running_emoji: "⏸️".to_owned(),
            paused_emoji: "▶️".to_owned(),
            reset_emoji: "⏹️".to_owned(),
        }
    }
}

/// Snapshot location and identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Record key in the snapshot store (process / bot identity).
    pub identity: String,
    /// Snapshot file (None = `data_dir()/timers.json`).
    pub state_path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            identity: "countdown".to_owned(),
            state_path: None,
        }
    }
}

impl PersistenceConfig {
    /// Effective snapshot file path.
    #[must_use]
    pub fn resolved_state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(crate::countdown_dirs::state_file)
    }
}

/// Built-in event sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Events allowed per scope per minute before renders are refused
    /// with a retry-after.
    pub max_messages_per_minute: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_messages_per_minute: 120,
        }
    }
}

impl TimerConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::TimerError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TimerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path: `config_dir()/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::countdown_dirs::config_file()
    }
}
