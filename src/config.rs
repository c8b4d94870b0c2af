//! Application-level configuration loading: lobby timings and participant bounds.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the lobby looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/lobby.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BUNKER_LOBBY_CONFIG_PATH";

/// Smallest party that can start a round.
pub const MIN_PARTICIPANTS: usize = 4;
/// Largest party that can start a round.
pub const MAX_PARTICIPANTS: usize = 16;

/// Inclusive range of ready participants required to start a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantBounds {
    pub min: usize,
    pub max: usize,
}

impl ParticipantBounds {
    /// Whether `count` ready participants may start a round.
    pub fn contains(&self, count: usize) -> bool {
        (self.min..=self.max).contains(&count)
    }
}

impl Default for ParticipantBounds {
    fn default() -> Self {
        Self {
            min: MIN_PARTICIPANTS,
            max: MAX_PARTICIPANTS,
        }
    }
}

/// Timings and bounds governing one lobby session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbySettings {
    /// Age beyond which a presence record is logically absent.
    pub presence_ttl: Duration,
    /// Full resync period under the poll strategy.
    pub poll_interval: Duration,
    /// Self-heartbeat renewal period, active under both strategies.
    pub heartbeat_interval: Duration,
    /// Time a hidden session waits before retracting its readiness and presence.
    pub hidden_grace: Duration,
    pub bounds: ParticipantBounds,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            presence_ttl: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(10),
            hidden_grace: Duration::from_secs(5),
            bounds: ParticipantBounds::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub lobby: LobbySettings,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        ttl_ms = app_config.lobby.presence_ttl.as_millis() as u64,
                        min = app_config.lobby.bounds.min,
                        max = app_config.lobby.bounds.max,
                        "loaded lobby settings from config"
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

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
/// Every field is optional; missing ones keep their default.
struct RawConfig {
    presence_ttl_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    hidden_grace_ms: Option<u64>,
    min_participants: Option<usize>,
    max_participants: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = LobbySettings::default();
        let millis = |raw: Option<u64>, fallback: Duration| {
            raw.filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        let min = value.min_participants.unwrap_or(defaults.bounds.min).max(1);
        let max = value.max_participants.unwrap_or(defaults.bounds.max);
        let bounds = if min <= max {
            ParticipantBounds { min, max }
        } else {
            warn!(min, max, "participant bounds are inverted; using defaults");
            defaults.bounds
        };

        Self {
            lobby: LobbySettings {
                presence_ttl: millis(value.presence_ttl_ms, defaults.presence_ttl),
                poll_interval: millis(value.poll_interval_ms, defaults.poll_interval),
                heartbeat_interval: millis(value.heartbeat_interval_ms, defaults.heartbeat_interval),
                hidden_grace: millis(value.hidden_grace_ms, defaults.hidden_grace),
                bounds,
            },
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
