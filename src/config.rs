//! Process configuration
//!
//! Loaded once at startup and immutable for the process lifetime. The file
//! is JSON, discovered over a short candidate list unless an explicit path
//! is given; provider credentials may also come from the environment, which
//! takes precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Candidate config locations, tried in order
const CONFIG_PATHS: &[&str] = &["alarmd.json", "../alarmd.json", "~/.alarmd/config.json"];

pub const ENV_FCM_API_KEY: &str = "ALARMD_FCM_API_KEY";
pub const ENV_TELEGRAM_API_KEY: &str = "ALARMD_TELEGRAM_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("alarm_check_interval must be positive, got {0}")]
    InvalidInterval(f64),
}

/// Notification provider credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContacterConfig {
    #[serde(default)]
    pub fcm_api_key: Option<String>,
    #[serde(default)]
    pub telegram_api_key: Option<String>,
}

/// Everything the service needs, injected into the checker and contacter
/// at construction; no ambient globals
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Alarm registry database (alarm definitions)
    pub config_db: PathBuf,
    /// Condition store database (metric readings)
    pub cnr_db: PathBuf,
    /// Persisted alarm state file
    pub state_path: PathBuf,
    /// Seconds between evaluation cycles, fractional allowed
    #[serde(default = "default_check_interval")]
    pub alarm_check_interval: f64,
    #[serde(default)]
    pub contacter: ContacterConfig,
    /// Per-send timeout for notification providers
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Hard ceiling after which a stuck cycle is abandoned
    #[serde(default = "default_cycle_ceiling_secs")]
    pub cycle_ceiling_secs: u64,
    /// How long shutdown waits for an in-flight cycle
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_check_interval() -> f64 {
    60.0
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_cycle_ceiling_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl ServiceConfig {
    /// Load and validate a config file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: ServiceConfig = serde_json::from_str(&text)?;
        config.validate()?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Search the candidate paths for a config file
    pub fn discover() -> Option<PathBuf> {
        for candidate in CONFIG_PATHS {
            let path = match candidate.strip_prefix("~/") {
                Some(rest) => match std::env::var_os("HOME") {
                    Some(home) => PathBuf::from(home).join(rest),
                    None => continue,
                },
                None => PathBuf::from(candidate),
            };
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alarm_check_interval > 0.0) {
            return Err(ConfigError::InvalidInterval(self.alarm_check_interval));
        }
        Ok(())
    }

    /// Credentials from the environment win over the file
    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(key) = get(ENV_FCM_API_KEY) {
            self.contacter.fcm_api_key = Some(key);
        }
        if let Some(key) = get(ENV_TELEGRAM_API_KEY) {
            self.contacter.telegram_api_key = Some(key);
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.alarm_check_interval)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn cycle_ceiling(&self) -> Duration {
        Duration::from_secs(self.cycle_ceiling_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
