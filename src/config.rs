//! Runtime configuration, read from the environment at startup.

use std::time::Duration;

use crate::error::ConfigError;

/// Opening message sent to a guardian when a conversation is initiated.
/// `{student_name}` is substituted before drafting.
pub const DEFAULT_OPENING_TEMPLATE: &str = "Hi there! This is the school attendance office. \
     We noticed that {student_name} was not able to make it to school today. \
     Can you please provide a reason for their absence? \
     Also please let us know how we can help. Thanks!";

/// Top-level service configuration.
///
/// `auto_approve` is an explicit value threaded into every `open` /
/// `on_inbound_reply` call rather than a process-wide mutable flag.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Path of the local libSQL database file.
    pub db_path: String,
    /// Whether drafted outbound messages dispatch immediately or wait for
    /// human approval.
    pub auto_approve: bool,
    /// Template for the first outbound message of a conversation.
    pub opening_template: String,
    /// Publicly reachable base URL the transport posts delivery callbacks to.
    pub callback_base_url: String,
    /// Upper bound on one outbound transport send.
    pub dispatch_timeout: Duration,
    /// Upper bound on one classifier call.
    pub classify_timeout: Duration,
}

impl AppConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let callback_base_url = std::env::var("ABSENCE_LINE_CALLBACK_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ABSENCE_LINE_CALLBACK_BASE_URL".into()))?;

        Ok(Self {
            bind_addr: std::env::var("ABSENCE_LINE_BIND")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            db_path: std::env::var("ABSENCE_LINE_DB_PATH")
                .unwrap_or_else(|_| "./data/absence-line.db".to_string()),
            auto_approve: env_bool("ABSENCE_LINE_AUTO_APPROVE", true)?,
            opening_template: std::env::var("ABSENCE_LINE_OPENING_TEMPLATE")
                .unwrap_or_else(|_| DEFAULT_OPENING_TEMPLATE.to_string()),
            callback_base_url,
            dispatch_timeout: env_secs("ABSENCE_LINE_DISPATCH_TIMEOUT_SECS", 15)?,
            classify_timeout: env_secs("ABSENCE_LINE_CLASSIFY_TIMEOUT_SECS", 30)?,
        })
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {other:?}"),
            }),
        },
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected seconds as an integer, got {v:?}"),
            }),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
