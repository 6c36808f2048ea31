//! Application-level configuration loading: display windows, room codes and actor tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "HAND_CRICKET_BACK_CONFIG_PATH";

const DEFAULT_REVEAL_WINDOW_MS: u64 = 2_000;
const DEFAULT_DISMISSAL_WINDOW_MS: u64 = 3_500;
const DEFAULT_ROOM_CODE_LENGTH: usize = 6;
const DEFAULT_FEED_CAPACITY: usize = 32;
const DEFAULT_ROOM_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long both choices stay on screen after a round resolves.
    pub reveal_window: Duration,
    /// How long the dismissal message stays up before the second innings starts.
    pub dismissal_window: Duration,
    /// Length of generated room codes; joins require at least this many characters.
    pub room_code_length: usize,
    /// Buffered records per room in the change feed.
    pub feed_capacity: usize,
    /// Idle time after which a room actor stops.
    pub room_idle_timeout: Duration,
    /// Upper bound for a command sent to a room actor.
    pub command_timeout: Duration,
    /// Whether the in-memory store offers atomic round resolution.
    pub atomic_rounds: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        reveal_ms = app_config.reveal_window.as_millis(),
                        dismissal_ms = app_config.dismissal_window.as_millis(),
                        atomic_rounds = app_config.atomic_rounds,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    reveal_window_ms: Option<u64>,
    dismissal_window_ms: Option<u64>,
    room_code_length: Option<usize>,
    feed_capacity: Option<usize>,
    room_idle_timeout_secs: Option<u64>,
    command_timeout_ms: Option<u64>,
    atomic_rounds: Option<bool>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            reveal_window: Duration::from_millis(
                value.reveal_window_ms.unwrap_or(DEFAULT_REVEAL_WINDOW_MS),
            ),
            dismissal_window: Duration::from_millis(
                value
                    .dismissal_window_ms
                    .unwrap_or(DEFAULT_DISMISSAL_WINDOW_MS),
            ),
            room_code_length: value
                .room_code_length
                .filter(|length| *length > 0)
                .unwrap_or(DEFAULT_ROOM_CODE_LENGTH),
            feed_capacity: value
                .feed_capacity
                .filter(|capacity| *capacity > 0)
                .unwrap_or(DEFAULT_FEED_CAPACITY),
            room_idle_timeout: Duration::from_secs(
                value
                    .room_idle_timeout_secs
                    .unwrap_or(DEFAULT_ROOM_IDLE_TIMEOUT_SECS),
            ),
            command_timeout: Duration::from_millis(
                value
                    .command_timeout_ms
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
            ),
            atomic_rounds: value.atomic_rounds.unwrap_or(true),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"reveal_window_ms": 500, "atomic_rounds": false}"#).unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.reveal_window, Duration::from_millis(500));
        assert_eq!(config.dismissal_window, Duration::from_millis(3_500));
        assert_eq!(config.room_code_length, 6);
        assert!(!config.atomic_rounds);
    }

    #[test]
    fn zero_sizes_fall_back_to_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"room_code_length": 0, "feed_capacity": 0}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.room_code_length, 6);
        assert_eq!(config.feed_capacity, 32);
    }
}
