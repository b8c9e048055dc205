use std::net::SocketAddr;
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

/// Tuning for the transcript consolidator.
///
/// These are deployment tuning values, not fixed constants; the defaults
/// match observed production behavior.
#[derive(Clone, Copy, Debug)]
pub struct ConsolidatorConfig {
    /// Quiet period after the last fragment before the buffer is flushed.
    pub debounce: Duration,
    /// Rolling window; fragments older than this are pruned from the buffer.
    pub window: Duration,
    /// Fragments shorter than this (in chars) are dropped outright.
    pub min_fragment_chars: usize,
    /// Fragments longer than this qualify for the freshness tiebreak.
    pub long_fragment_chars: usize,
    /// A recent long fragment replaces the longest one when its length is at
    /// least this fraction of the longest fragment's length.
    pub freshness_ratio: f64,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1_500),
            window: Duration::from_secs(10),
            min_fragment_chars: 2,
            long_fragment_chars: 50,
            freshness_ratio: 0.8,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub model: String,
    pub voice_name: String,
    /// Initial text pushed upstream to open the conversation. Empty disables.
    pub greeting: String,
    pub max_sessions: usize,
    pub handshake_timeout: Duration,
    pub consolidator: ConsolidatorConfig,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8003".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = std::env::var("GEMINI_MODEL")
            .unwrap_or_else(|_| "models/gemini-2.0-flash-exp".to_string());
        let voice_name = std::env::var("VOICE_NAME").unwrap_or_else(|_| "Aoede".to_string());
        let greeting = std::env::var("GREETING").unwrap_or_else(|_| "Hello".to_string());

        let max_sessions = parse_var("MAX_SESSIONS", 10usize)?;
        if max_sessions == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_SESSIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let handshake_timeout =
            Duration::from_secs(parse_var("UPSTREAM_HANDSHAKE_TIMEOUT_SECS", 10u64)?);

        let consolidator = ConsolidatorConfig {
            debounce: Duration::from_millis(parse_var("TRANSCRIPT_DEBOUNCE_MS", 1_500u64)?),
            window: Duration::from_secs(parse_var("TRANSCRIPT_WINDOW_SECS", 10u64)?),
            min_fragment_chars: parse_var("TRANSCRIPT_MIN_CHARS", 2usize)?,
            long_fragment_chars: parse_var("TRANSCRIPT_LONG_CHARS", 50usize)?,
            freshness_ratio: parse_var("TRANSCRIPT_FRESHNESS_RATIO", 0.8f64)?,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            model,
            voice_name,
            greeting,
            max_sessions,
            handshake_timeout,
            consolidator,
            log_level,
        })
    }
}

/// Parses an environment variable, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_MODEL");
            env::remove_var("VOICE_NAME");
            env::remove_var("GREETING");
            env::remove_var("MAX_SESSIONS");
            env::remove_var("UPSTREAM_HANDSHAKE_TIMEOUT_SECS");
            env::remove_var("TRANSCRIPT_DEBOUNCE_MS");
            env::remove_var("TRANSCRIPT_WINDOW_SECS");
            env::remove_var("TRANSCRIPT_MIN_CHARS");
            env::remove_var("TRANSCRIPT_LONG_CHARS");
            env::remove_var("TRANSCRIPT_FRESHNESS_RATIO");
            env::remove_var("RUST_LOG");
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
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8003");
        assert_eq!(config.gemini_api_key, "test-key");
        assert_eq!(config.model, "models/gemini-2.0-flash-exp");
        assert_eq!(config.voice_name, "Aoede");
        assert_eq!(config.greeting, "Hello");
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.consolidator.debounce, Duration::from_millis(1_500));
        assert_eq!(config.consolidator.window, Duration::from_secs(10));
        assert_eq!(config.consolidator.min_fragment_chars, 2);
        assert_eq!(config.consolidator.long_fragment_chars, 50);
        assert_eq!(config.consolidator.freshness_ratio, 0.8);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
            env::set_var("GEMINI_API_KEY", "custom-key");
            env::set_var("GEMINI_MODEL", "models/custom-live");
            env::set_var("VOICE_NAME", "Charon");
            env::set_var("GREETING", "Xin chào");
            env::set_var("MAX_SESSIONS", "25");
            env::set_var("UPSTREAM_HANDSHAKE_TIMEOUT_SECS", "15");
            env::set_var("TRANSCRIPT_DEBOUNCE_MS", "2000");
            env::set_var("TRANSCRIPT_WINDOW_SECS", "20");
            env::set_var("TRANSCRIPT_MIN_CHARS", "3");
            env::set_var("TRANSCRIPT_LONG_CHARS", "80");
            env::set_var("TRANSCRIPT_FRESHNESS_RATIO", "0.9");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
        assert_eq!(config.model, "models/custom-live");
        assert_eq!(config.voice_name, "Charon");
        assert_eq!(config.greeting, "Xin chào");
        assert_eq!(config.max_sessions, 25);
        assert_eq!(config.handshake_timeout, Duration::from_secs(15));
        assert_eq!(config.consolidator.debounce, Duration::from_millis(2_000));
        assert_eq!(config.consolidator.window, Duration::from_secs(20));
        assert_eq!(config.consolidator.min_fragment_chars, 3);
        assert_eq!(config.consolidator.long_fragment_chars, 80);
        assert_eq!(config.consolidator.freshness_ratio, 0.9);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "GEMINI_API_KEY"),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
            env::set_var("GEMINI_API_KEY", "test-key");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_max_sessions() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-key");
            env::set_var("MAX_SESSIONS", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, msg) => {
                assert_eq!(var, "MAX_SESSIONS");
                assert!(msg.contains("at least 1"));
            }
            _ => panic!("Expected InvalidValue for MAX_SESSIONS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_tuning_value() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-key");
            env::set_var("TRANSCRIPT_FRESHNESS_RATIO", "not-a-number");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TRANSCRIPT_FRESHNESS_RATIO"),
            _ => panic!("Expected InvalidValue for TRANSCRIPT_FRESHNESS_RATIO"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-key");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
