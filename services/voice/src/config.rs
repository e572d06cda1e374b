use crate::codec::CAPTURE_FRAME_LEN;
use gemini_realtime::client::{DEFAULT_ENDPOINT, DEFAULT_SETUP_TIMEOUT};
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Zephyr";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub live_model: String,
    pub live_voice: String,
    pub live_endpoint: String,
    pub generation_model: String,
    pub records_path: PathBuf,
    pub log_level: Level,
    pub capture_frame_size: usize,
    pub outbound_queue_depth: usize,
    pub connect_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model = qualify_model(
            &std::env::var("LIVE_MODEL").unwrap_or_else(|_| DEFAULT_LIVE_MODEL.to_string()),
        );
        let live_voice = std::env::var("LIVE_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());
        let live_endpoint =
            std::env::var("LIVE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let generation_model = std::env::var("GENERATION_MODEL")
            .unwrap_or_else(|_| DEFAULT_GENERATION_MODEL.to_string());

        let records_path = std::env::var("RECORDS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/records.json"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let capture_frame_size = positive_var("CAPTURE_FRAME_SIZE", CAPTURE_FRAME_LEN)?;
        let outbound_queue_depth = positive_var("OUTBOUND_QUEUE_DEPTH", 32)?;
        let connect_timeout = Duration::from_secs(positive_var(
            "CONNECT_TIMEOUT_SECS",
            DEFAULT_SETUP_TIMEOUT.as_secs(),
        )?);

        Ok(Self {
            gemini_api_key,
            live_model,
            live_voice,
            live_endpoint,
            generation_model,
            records_path,
            log_level,
            capture_frame_size,
            outbound_queue_depth,
            connect_timeout,
        })
    }
}

/// Live model ids are resource names; accept the bare id as well.
pub fn qualify_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn positive_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' must be greater than zero", raw),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("LIVE_MODEL");
            env::remove_var("LIVE_VOICE");
            env::remove_var("LIVE_ENDPOINT");
            env::remove_var("GENERATION_MODEL");
            env::remove_var("RECORDS_PATH");
            env::remove_var("RUST_LOG");
            env::remove_var("CAPTURE_FRAME_SIZE");
            env::remove_var("OUTBOUND_QUEUE_DEPTH");
            env::remove_var("CONNECT_TIMEOUT_SECS");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.gemini_api_key.expose_secret(), "test-gemini-key");
        assert_eq!(config.live_model, DEFAULT_LIVE_MODEL);
        assert_eq!(config.live_voice, "Zephyr");
        assert_eq!(config.live_endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.generation_model, "gemini-2.5-flash");
        assert_eq!(config.records_path, PathBuf::from("./data/records.json"));
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.capture_frame_size, 4096);
        assert_eq!(config.outbound_queue_depth, 32);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "custom-key");
            env::set_var("LIVE_MODEL", "gemini-live-2.5-flash-preview");
            env::set_var("LIVE_VOICE", "Kore");
            env::set_var("LIVE_ENDPOINT", "ws://127.0.0.1:9000/live");
            env::set_var("GENERATION_MODEL", "gemini-2.5-pro");
            env::set_var("RECORDS_PATH", "/srv/divewatch/records.json");
            env::set_var("RUST_LOG", "debug");
            env::set_var("CAPTURE_FRAME_SIZE", "2048");
            env::set_var("OUTBOUND_QUEUE_DEPTH", "8");
            env::set_var("CONNECT_TIMEOUT_SECS", "5");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.live_model, "models/gemini-live-2.5-flash-preview");
        assert_eq!(config.live_voice, "Kore");
        assert_eq!(config.live_endpoint, "ws://127.0.0.1:9000/live");
        assert_eq!(config.generation_model, "gemini-2.5-pro");
        assert_eq!(
            config.records_path,
            PathBuf::from("/srv/divewatch/records.json")
        );
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.capture_frame_size, 2048);
        assert_eq!(config.outbound_queue_depth, 8);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "   ");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "GEMINI_API_KEY"),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_and_garbage_sizes() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("OUTBOUND_QUEUE_DEPTH", "0");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "OUTBOUND_QUEUE_DEPTH"),
            _ => panic!("Expected InvalidValue for OUTBOUND_QUEUE_DEPTH"),
        }

        unsafe {
            env::remove_var("OUTBOUND_QUEUE_DEPTH");
            env::set_var("CAPTURE_FRAME_SIZE", "lots");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CAPTURE_FRAME_SIZE"),
            _ => panic!("Expected InvalidValue for CAPTURE_FRAME_SIZE"),
        }
    }

    #[test]
    fn test_qualify_model() {
        assert_eq!(qualify_model("models/x"), "models/x");
        assert_eq!(qualify_model("x"), "models/x");
    }
}
