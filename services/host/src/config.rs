//! Environment-driven configuration, read once at startup (spec.md's
//! CLI/startup surface is explicitly out of scope; the ambient stack still
//! needs somewhere to read `BIND_ADDR`, `APP_BASE_DIR`, etc. from).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub app_base_dir: PathBuf,
    /// Root directory served under `/static/*` as a 404 fallback
    /// (spec.md §4.3); the route tree is always checked first.
    pub static_dir: PathBuf,
    pub health_check_interval: Duration,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("valid default address"),
            app_base_dir: PathBuf::from("./apps"),
            static_dir: PathBuf::from("./static"),
            health_check_interval: Duration::from_secs(5),
            auto_restart: true,
            max_restart_attempts: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("BIND_ADDR") {
            config.bind_addr = v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "BIND_ADDR",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("APP_BASE_DIR") {
            config.app_base_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STATIC_DIR") {
            config.static_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HEALTH_CHECK_INTERVAL_MS") {
            let ms: u64 = v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "HEALTH_CHECK_INTERVAL_MS",
                value: v,
            })?;
            config.health_check_interval = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("AUTO_RESTART") {
            config.auto_restart = parse_bool(&v).ok_or_else(|| ConfigError::InvalidValue {
                var: "AUTO_RESTART",
                value: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("MAX_RESTART_ATTEMPTS") {
            config.max_restart_attempts = v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "MAX_RESTART_ATTEMPTS",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        Ok(config)
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_localhost() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
