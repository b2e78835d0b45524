use realtime_rtc::RtcSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
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

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backend_url: String,
    pub store_id: String,
    pub realtime_url: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub stun_servers: Vec<String>,
    pub connect_timeout: Duration,
    pub signaling_timeout: Duration,
    pub ice_gather_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_connect_attempts: u32,
    pub retry_delay: Duration,
    pub tool_timeout: Duration,
    pub preferences_path: PathBuf,
    pub record_audio_path: Option<PathBuf>,
    /// When false the local track carries silence and no device is opened.
    pub capture_microphone: bool,
    pub audio_input_device: Option<String>,
    pub log_level: Level,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn default_preferences_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopper-assistant")
        .join("preferences.json")
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let backend_url = required_var("BACKEND_URL")?;
        url::Url::parse(&backend_url)
            .map_err(|e| ConfigError::InvalidValue("BACKEND_URL".to_string(), e.to_string()))?;
        let backend_url = backend_url.trim_end_matches('/').to_string();
        let store_id = required_var("STORE_ID")?;

        let rtc_defaults = RtcSettings::default();
        let realtime_url =
            std::env::var("REALTIME_URL").unwrap_or_else(|_| rtc_defaults.realtime_url.clone());
        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| rtc_defaults.model.clone());
        let realtime_voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let stun_servers = match std::env::var("STUN_SERVERS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => rtc_defaults.stun_servers.clone(),
        };

        let connect_timeout = Duration::from_secs(parse_var("CONNECT_TIMEOUT_SECS", 15)?);
        let signaling_timeout = Duration::from_secs(parse_var("SIGNALING_TIMEOUT_SECS", 10)?);
        let ice_gather_timeout = Duration::from_secs(parse_var("ICE_GATHER_TIMEOUT_SECS", 5)?);
        let heartbeat_interval = Duration::from_secs(parse_var("HEARTBEAT_INTERVAL_SECS", 30)?);
        let max_connect_attempts = parse_var("MAX_CONNECT_ATTEMPTS", 3u32)?;
        if max_connect_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONNECT_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry_delay = Duration::from_millis(parse_var("RETRY_DELAY_MS", 2000)?);
        let tool_timeout = Duration::from_secs(parse_var("TOOL_TIMEOUT_SECS", 30)?);

        let preferences_path = std::env::var("PREFERENCES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_preferences_path());
        let record_audio_path = std::env::var("RECORD_AUDIO_PATH").ok().map(PathBuf::from);
        let capture_microphone = parse_var("CAPTURE_MICROPHONE", true)?;
        let audio_input_device = std::env::var("AUDIO_INPUT_DEVICE")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            backend_url,
            store_id,
            realtime_url,
            realtime_model,
            realtime_voice,
            stun_servers,
            connect_timeout,
            signaling_timeout,
            ice_gather_timeout,
            heartbeat_interval,
            max_connect_attempts,
            retry_delay,
            tool_timeout,
            preferences_path,
            record_audio_path,
            capture_microphone,
            audio_input_device,
            log_level,
        })
    }

    /// Transport settings derived from this configuration.
    pub fn rtc_settings(&self) -> RtcSettings {
        RtcSettings {
            realtime_url: self.realtime_url.clone(),
            model: self.realtime_model.clone(),
            stun_servers: self.stun_servers.clone(),
            signaling_timeout: self.signaling_timeout,
            ice_gather_timeout: self.ice_gather_timeout,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}
