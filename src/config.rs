//! Runtime configuration
//!
//! Layered: serialized defaults, then `gatelock.toml`, then `GATELOCK_`
//! environment variables. The token secret has no default and must be set.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{GateError, GateResult};
use crate::gateway::GatewayDefinition;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Server secret the token key is derived from. Required.
    pub token_secret: String,
    /// Rotation salt for token key derivation; changing it invalidates
    /// every outstanding token.
    #[serde(default = "default_token_salt")]
    pub token_salt: String,
    #[serde(default = "default_db_backend")]
    pub db_backend: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_event_log_path")]
    pub event_log_path: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub limits: LimitSettings,
    /// Gateway definitions seeded directly in config.
    #[serde(default)]
    pub gateways: Vec<GatewayDefinition>,
    /// Optional TOML file with further `[[gateways]]` entries.
    #[serde(default)]
    pub gateway_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitSettings {
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,
    #[serde(default = "default_token_max_age_minutes")]
    pub token_max_age_minutes: i64,
    #[serde(default = "default_advance_window_seconds")]
    pub advance_window_seconds: i64,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
}

fn default_token_salt() -> String {
    "stage-token-v1".to_string()
}

fn default_db_backend() -> String {
    "sled".to_string()
}

fn default_data_dir() -> String {
    "./gatelock-data".to_string()
}

fn default_event_log_path() -> String {
    "./gatelock-events.jsonl".to_string()
}

fn default_session_ttl_minutes() -> i64 {
    45
}

fn default_token_max_age_minutes() -> i64 {
    30
}

fn default_advance_window_seconds() -> i64 {
    30
}

fn default_rate_limit_requests() -> usize {
    120
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            session_ttl_minutes: default_session_ttl_minutes(),
            token_max_age_minutes: default_token_max_age_minutes(),
            advance_window_seconds: default_advance_window_seconds(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
        }
    }
}

impl GatewayConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.limits.session_ttl_minutes)
    }

    pub fn token_max_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.limits.token_max_age_minutes)
    }

    pub fn advance_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.limits.advance_window_seconds)
    }
}

/// Defaults serialized into the base layer; everything except the secret.
#[derive(Serialize)]
struct GatewayConfigDefaults {
    token_salt: String,
    db_backend: String,
    data_dir: String,
    event_log_path: String,
    limits: LimitSettings,
}

pub fn load_config() -> GateResult<GatewayConfig> {
    let figment = Figment::from(Serialized::defaults(GatewayConfigDefaults {
        token_salt: default_token_salt(),
        db_backend: default_db_backend(),
        data_dir: default_data_dir(),
        event_log_path: default_event_log_path(),
        limits: LimitSettings::default(),
    }))
    .merge(Toml::file("gatelock.toml"))
    .merge(Env::prefixed("GATELOCK_"));

    let config: GatewayConfig = figment
        .extract()
        .map_err(|e| GateError::config(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &GatewayConfig) -> GateResult<()> {
    if config.token_secret.trim().is_empty() {
        return Err(GateError::config("token_secret must be set"));
    }
    if config.db_backend != "sled" && config.db_backend != "memory" {
        return Err(GateError::config(format!(
            "unknown db_backend '{}', expected 'sled' or 'memory'",
            config.db_backend
        )));
    }
    if config.limits.session_ttl_minutes <= 0 {
        return Err(GateError::config("session_ttl_minutes must be positive"));
    }
    if config.limits.token_max_age_minutes <= 0 {
        return Err(GateError::config("token_max_age_minutes must be positive"));
    }
    if config.limits.advance_window_seconds <= 0 {
        return Err(GateError::config("advance_window_seconds must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> GatewayConfig {
        GatewayConfig {
            token_secret: "test-secret".to_string(),
            token_salt: default_token_salt(),
            db_backend: "memory".to_string(),
            data_dir: default_data_dir(),
            event_log_path: default_event_log_path(),
            webhook_url: None,
            limits: LimitSettings::default(),
            gateways: Vec::new(),
            gateway_file: None,
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = base_config();
        assert!(validate(&config).is_ok());
        assert_eq!(config.session_ttl(), chrono::Duration::minutes(45));
        assert_eq!(config.token_max_age(), chrono::Duration::minutes(30));
        assert_eq!(config.advance_window(), chrono::Duration::seconds(30));
    }

    #[test]
    fn empty_secret_rejected() {
        let mut config = base_config();
        config.token_secret = "   ".to_string();
        assert!(matches!(validate(&config), Err(GateError::Config { .. })));
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = base_config();
        config.db_backend = "postgres".to_string();
        assert!(matches!(validate(&config), Err(GateError::Config { .. })));
    }
}
