//! Shared wire/DTO types for the apphost REST API and the App runtime.
//!
//! Kept deliberately free of any I/O: this crate only describes shapes that
//! cross the HTTP boundary, so the runtime crate and the HTTP engine crate
//! can agree on them without depending on each other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metadata for one registered app.
///
/// `name` is the registry key and is immutable after registration;
/// `timestamp` is a monotonic id used to name the on-disk module file
/// (`<name>.<timestamp>.<ext>`) and strictly increases on every re-`init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: u64,
    /// Arbitrary string/number/boolean fields forwarded as environment to
    /// user code. Kept as an ordered map so re-serialization is stable.
    #[serde(flatten)]
    pub env: BTreeMap<String, serde_json::Value>,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, timestamp: u64) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: String::new(),
            timestamp,
            env: BTreeMap::new(),
        }
    }
}

/// The App FSM states (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Uninitialized,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppState::Uninitialized => "UNINITIALIZED",
            AppState::Initialized => "INITIALIZED",
            AppState::Running => "RUNNING",
            AppState::Stopping => "STOPPING",
            AppState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by `GET /@api/list` and `GET /@api/stat/:name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub state: AppState,
    pub version: String,
    pub description: String,
    pub timestamp: u64,
    pub start_time: Option<u64>,
    pub stop_time: Option<u64>,
    pub uptime_ms: u64,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

/// `POST /@api/control/:name` plaintext command bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
    Reload,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized control command {0:?}")]
pub struct UnknownControlCommand(pub String);

impl FromStr for ControlCommand {
    type Err = UnknownControlCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "START" => Ok(ControlCommand::Start),
            "STOP" => Ok(ControlCommand::Stop),
            "RESTART" => Ok(ControlCommand::Restart),
            "RELOAD" => Ok(ControlCommand::Reload),
            other => Err(UnknownControlCommand(other.to_owned())),
        }
    }
}

/// Body for `PUT /@api/control/:name`: `AppInfo` plus the module source.
#[derive(Debug, Clone, Deserialize)]
pub struct PutAppRequest {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(rename = "$code")]
    pub code: String,
    #[serde(flatten)]
    pub env: BTreeMap<String, serde_json::Value>,
}

impl PutAppRequest {
    /// The required-field check named in spec.md §6: `name`, `version`,
    /// `description`, `$code` must all be present and non-empty.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.name.is_empty() {
            Some("name")
        } else if self.version.is_empty() {
            Some("version")
        } else if self.description.is_empty() {
            Some("description")
        } else if self.code.is_empty() {
            Some("$code")
        } else {
            None
        }
    }
}

/// A single formatted log line, as produced by the Log Console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessageDto {
    pub level: LogLevel,
    pub message: Vec<serde_json::Value>,
    pub error: bool,
    pub html: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

/// Frozen HTTP error envelope used by all non-2xx JSON responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,
}

impl HttpErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            full: None,
        }
    }

    pub fn with_full(error: impl Into<String>, full: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            full: Some(full.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_command_parses_known_verbs_case_sensitively() {
        assert_eq!("START".parse::<ControlCommand>().unwrap(), ControlCommand::Start);
        assert_eq!("STOP".parse::<ControlCommand>().unwrap(), ControlCommand::Stop);
        assert_eq!("RESTART".parse::<ControlCommand>().unwrap(), ControlCommand::Restart);
        assert_eq!("RELOAD".parse::<ControlCommand>().unwrap(), ControlCommand::Reload);
        assert!("start".parse::<ControlCommand>().is_err());
        assert!("".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn app_state_display_matches_json_rendering() {
        assert_eq!(AppState::Running.to_string(), "RUNNING");
        let json = serde_json::to_string(&AppState::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
    }

    #[test]
    fn app_info_round_trips_arbitrary_env_fields() {
        let mut env = BTreeMap::new();
        env.insert("region".to_owned(), serde_json::json!("us-east"));
        env.insert("retries".to_owned(), serde_json::json!(3));
        let info = AppInfo {
            name: "worker".to_owned(),
            version: "1.0.0".to_owned(),
            description: "a worker".to_owned(),
            timestamp: 42,
            env,
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: AppInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.env.get("region").unwrap(), "us-east");
    }

    #[test]
    fn put_app_request_reports_first_missing_field() {
        let mut env = BTreeMap::new();
        env.insert("x".to_owned(), serde_json::json!(1));
        let req = PutAppRequest {
            name: String::new(),
            version: "1".to_owned(),
            description: "d".to_owned(),
            code: "fn run(){}".to_owned(),
            env,
        };
        assert_eq!(req.missing_field(), Some("name"));

        let req = PutAppRequest {
            name: "a".to_owned(),
            version: "1".to_owned(),
            description: "d".to_owned(),
            code: String::new(),
            env: BTreeMap::new(),
        };
        assert_eq!(req.missing_field(), Some("$code"));
    }
}
