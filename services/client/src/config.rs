use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Whether `start_capture` is permitted while a response is still in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Capture may only start from `ready` (the conservative default).
    RequireReady,
    /// Capture may also start while `processing`, allowing overlapping turns.
    AllowWhileProcessing,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// `ws://` or `wss://` endpoint of the voice service.
    pub server_url: String,
    /// Where the session mirror file lives.
    pub session_state_path: PathBuf,
    /// Records older than this are discarded, never resumed.
    pub session_max_age: Duration,
    /// How long to wait for a `pong` after a liveness probe.
    pub liveness_timeout: Duration,
    /// Encoding hint passed to the capture bridge and sent in `audio_start`.
    pub audio_format: String,
    pub capture_policy: CapturePolicy,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let server_url = std::env::var("SERVER_URL")
            .map_err(|_| ConfigError::MissingVar("SERVER_URL".to_string()))?;
        if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "SERVER_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", server_url),
            ));
        }

        let session_state_path = std::env::var("SESSION_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./murmur-session.json"));

        let max_age_str =
            std::env::var("SESSION_MAX_AGE_SECS").unwrap_or_else(|_| "3600".to_string());
        let session_max_age = max_age_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "SESSION_MAX_AGE_SECS".to_string(),
                    format!("'{}' is not a number of seconds", max_age_str),
                )
            })?;

        let liveness_str =
            std::env::var("LIVENESS_TIMEOUT_MS").unwrap_or_else(|_| "3000".to_string());
        let liveness_timeout = liveness_str
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "LIVENESS_TIMEOUT_MS".to_string(),
                    format!("'{}' is not a number of milliseconds", liveness_str),
                )
            })?;

        let audio_format = std::env::var("AUDIO_FORMAT").unwrap_or_else(|_| "webm".to_string());

        let policy_str = std::env::var("CAPTURE_POLICY").unwrap_or_else(|_| "ready".to_string());
        let capture_policy = match policy_str.to_lowercase().as_str() {
            "ready" => CapturePolicy::RequireReady,
            "overlap" => CapturePolicy::AllowWhileProcessing,
            other => {
                return Err(ConfigError::InvalidValue(
                    "CAPTURE_POLICY".to_string(),
                    format!("'{}' is not 'ready' or 'overlap'", other),
                ));
            }
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            server_url,
            session_state_path,
            session_max_age,
            liveness_timeout,
            audio_format,
            capture_policy,
            log_level,
        })
    }
}
