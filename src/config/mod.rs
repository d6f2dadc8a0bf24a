//! Configuration management
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file
//! (`intercom.toml` or the path in `INTERCOM_CONFIG`), then `INTERCOM__*`
//! environment variables with `__` between sections
//! (`INTERCOM__SERVER__PORT=3001`). `DATABASE_URL` overrides the database URL.

use crate::application::{CredentialSettings, FanoutSettings};
use crate::domain::access::RateLimitPolicy;
use crate::domain::credential::{CredentialRole, TtlPolicy, DEFAULT_TTL_SECONDS, STANDBY_TTL_SECONDS};
use crate::infrastructure::identity::HttpIdentityConfig;
use crate::infrastructure::push::{ExpoPushConfig, DEFAULT_EXPO_ENDPOINT};
use ::config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "intercom.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub media: MediaSettings,
    pub fanout: FanoutConfig,
    pub push: PushSettings,
    pub identity: IdentitySettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Error details reach clients only in development
    pub environment: RuntimeEnvironment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            environment: RuntimeEnvironment::Development,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost/intercom".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 5,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub app_id: String,
    /// Signing secret; empty disables credential issuance
    pub app_certificate: String,
    pub default_ttl_seconds: i64,
    pub standby_ttl_seconds: i64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_certificate: String::new(),
            default_ttl_seconds: DEFAULT_TTL_SECONDS as i64,
            standby_ttl_seconds: STANDBY_TTL_SECONDS as i64,
        }
    }
}

impl MediaSettings {
    pub fn is_configured(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.app_certificate.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Push transport on/off; ring deadlines run either way
    pub enabled: bool,
    pub tick_interval_ms: u64,
    pub ring_timeout_secs: u64,
    pub push_timeout_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 2000,
            ring_timeout_secs: 45,
            push_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    pub endpoint: String,
    pub access_token: Option<String>,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_EXPO_ENDPOINT.to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
            sweep_interval_secs: 60,
        }
    }
}

/// Non-positive lifetimes fall back to the built-in value
fn ttl_policy(configured: i64, fallback: u64) -> TtlPolicy {
    if configured > 0 {
        TtlPolicy::new(configured as u64)
    } else {
        TtlPolicy::new(fallback)
    }
}

impl Config {
    /// Load all layers
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("INTERCOM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config: Config = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Config::default())?)
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("INTERCOM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.server.environment == RuntimeEnvironment::Development
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn fanout_settings(&self) -> FanoutSettings {
        FanoutSettings {
            tick_interval: Duration::from_millis(self.fanout.tick_interval_ms.max(100)),
            ring_timeout: Duration::from_secs(self.fanout.ring_timeout_secs.max(1)),
            push_timeout: Duration::from_millis(self.fanout.push_timeout_ms.max(100)),
        }
    }

    pub fn credential_settings(&self) -> CredentialSettings {
        CredentialSettings {
            ttl: ttl_policy(self.media.default_ttl_seconds, DEFAULT_TTL_SECONDS),
            standby_ttl: ttl_policy(self.media.standby_ttl_seconds, STANDBY_TTL_SECONDS),
            default_role: CredentialRole::Publisher,
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.rate_limit.max_requests.max(1),
            window: Duration::from_secs(self.rate_limit.window_secs.max(1)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit.sweep_interval_secs.max(1))
    }

    pub fn push_config(&self) -> ExpoPushConfig {
        ExpoPushConfig {
            endpoint: self.push.endpoint.clone(),
            access_token: self
                .push
                .access_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            enabled: self.fanout.enabled,
            timeout: Duration::from_millis(self.fanout.push_timeout_ms.max(100)),
        }
    }

    pub fn identity_config(&self) -> HttpIdentityConfig {
        HttpIdentityConfig {
            base_url: self.identity.base_url.clone(),
            api_key: self.identity.api_key.clone(),
            timeout: Duration::from_millis(self.identity.timeout_ms.max(100)),
        }
    }
}
