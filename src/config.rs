//! Application-level configuration loading: registration rules, match engine
//! endpoints and the seed accounts of the built-in identity provider.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TOS_REGISTRATION_CONFIG_PATH";

const DEFAULT_TEAM_NAME_MIN_LENGTH: usize = 3;
const DEFAULT_NAME_CHECK_DEBOUNCE_MS: u64 = 300;
const DEFAULT_LEADERBOARD_CACHE_TTL_SECS: u64 = 30;
const DEFAULT_LEADERBOARD_LIMIT: usize = 100;
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_ELIGIBLE_EVENT_IDS: [&str; 5] = ["pass-global", "pass-tech", "combo1", "combo2", "combo3"];

/// Seed account served by the built-in identity provider.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AccountConfig {
    /// Stable user id.
    pub uid: String,
    /// Sign-in email.
    pub email: String,
    /// Plain text password, for local setups only.
    pub password: String,
    /// Optional profile name.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Location of the external match engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MatchEngineConfig {
    /// Scheme, host and port of the engine.
    pub base_url: String,
    /// Path of the draft submission endpoint.
    #[serde(default = "default_submit_draft_path")]
    pub submit_draft_path: String,
    /// Path of the lock-in endpoint.
    #[serde(default = "default_lock_selection_path")]
    pub lock_selection_path: String,
    /// Request timeout in seconds.
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

impl MatchEngineConfig {
    /// [`MatchEngineConfig::timeout_secs`] as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MatchEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            submit_draft_path: default_submit_draft_path(),
            lock_selection_path: default_lock_selection_path(),
            timeout_secs: default_engine_timeout_secs(),
        }
    }
}

fn default_submit_draft_path() -> String {
    "/submit-draft".into()
}

fn default_lock_selection_path() -> String {
    "/lock-selection".into()
}

fn default_engine_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Shortest accepted team name, in characters.
    pub team_name_min_length: usize,
    /// Delay before a name check hits the store.
    pub name_check_debounce: Duration,
    /// How long a leaderboard snapshot is served from memory.
    pub leaderboard_cache_ttl: Duration,
    /// Entries returned when the query has no limit.
    pub leaderboard_default_limit: usize,
    /// Sessions without listeners or requests for this long are closed.
    pub session_idle_timeout: Duration,
    /// Match engine endpoints.
    pub match_engine: MatchEngineConfig,
    /// Ticket event ids that make an order eligible.
    pub eligible_event_ids: Vec<String>,
    /// Seed accounts of the built-in identity provider.
    pub accounts: Vec<AccountConfig>,
}


impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        accounts = app_config.accounts.len(),
                        engine = %app_config.match_engine.base_url,
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

    /// Parse a configuration document; absent keys take their default.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    team_name_min_length: Option<usize>,
    name_check_debounce_ms: Option<u64>,
    leaderboard_cache_ttl_secs: Option<u64>,
    leaderboard_default_limit: Option<usize>,
    session_idle_timeout_secs: Option<u64>,
    match_engine: Option<MatchEngineConfig>,
    eligible_event_ids: Option<Vec<String>>,
    #[serde(default)]
    accounts: Vec<AccountConfig>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            team_name_min_length: value
                .team_name_min_length
                .unwrap_or(DEFAULT_TEAM_NAME_MIN_LENGTH),
            name_check_debounce: Duration::from_millis(
                value
                    .name_check_debounce_ms
                    .unwrap_or(DEFAULT_NAME_CHECK_DEBOUNCE_MS),
            ),
            leaderboard_cache_ttl: Duration::from_secs(
                value
                    .leaderboard_cache_ttl_secs
                    .unwrap_or(DEFAULT_LEADERBOARD_CACHE_TTL_SECS),
            ),
            leaderboard_default_limit: value
                .leaderboard_default_limit
                .unwrap_or(DEFAULT_LEADERBOARD_LIMIT),
            session_idle_timeout: Duration::from_secs(
                value
                    .session_idle_timeout_secs
                    .unwrap_or(DEFAULT_SESSION_IDLE_TIMEOUT_SECS)
                    .max(1),
            ),
            match_engine: value.match_engine.unwrap_or_default(),
            eligible_event_ids: value.eligible_event_ids.unwrap_or_else(|| {
                DEFAULT_ELIGIBLE_EVENT_IDS
                    .iter()
                    .map(|id| id.to_string())
                    .collect()
            }),
            accounts: value.accounts,
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
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.team_name_min_length, 3);
        assert_eq!(config.name_check_debounce, Duration::from_millis(300));
        assert_eq!(config.leaderboard_default_limit, 100);
        assert_eq!(config.eligible_event_ids.len(), 5);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "team_name_min_length": 4,
                "session_idle_timeout_secs": 0,
                "match_engine": {"base_url": "http://engine:9000", "timeout_secs": 5},
                "eligible_event_ids": ["pass-tech"],
                "accounts": [{"uid": "u1", "email": "a@x.com", "password": "pw"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.team_name_min_length, 4);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1));
        assert_eq!(config.match_engine.base_url, "http://engine:9000");
        assert_eq!(config.match_engine.submit_draft_path, "/submit-draft");
        assert_eq!(config.match_engine.timeout(), Duration::from_secs(5));
        assert_eq!(config.eligible_event_ids, ["pass-tech"]);
        assert_eq!(config.accounts[0].display_name, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::from_json(r#"{"colors": []}"#).is_err());
    }
}
