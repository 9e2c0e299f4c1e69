//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub auth: AuthConfig,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
    pub rate_limit: RateLimitConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Credentials
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub token: String,
}

impl AuthConfig {
    /// Value for the `Authorization` header
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }
}

// Never print the token
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("token", &"<redacted>").finish()
    }
}

/// REST transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-call transport timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline applied to requests submitted without one (0 = none)
    #[serde(default)]
    pub default_deadline_ms: u64,
}

impl RestConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn default_deadline(&self) -> Option<Duration> {
        (self.default_deadline_ms > 0).then(|| Duration::from_millis(self.default_deadline_ms))
    }
}

/// Gateway session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Explicit gateway URL; discovered through the REST API when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_intents")]
    pub intents: u64,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Override for the global REST bucket
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_max")]
    pub global_max: u32,
    #[serde(default = "default_global_window_secs")]
    pub global_window_secs: u64,
}

// Default value functions
fn default_app_name() -> String {
    "chat-client".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_rest_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_user_agent() -> String {
    format!("DiscordBot (chat-client, {})", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_intents() -> u64 {
    513 // GUILDS | GUILD_MESSAGES
}

fn default_hello_timeout_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_global_max() -> u32 {
    50
}

fn default_global_window_secs() -> u64 {
    1
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout_ms(),
            default_deadline_ms: 0,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            intents: default_intents(),
            hello_timeout_ms: default_hello_timeout_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_max: default_global_max(),
            global_window_secs: default_global_window_secs(),
        }
    }
}

/// Read an optional variable, rejecting values that fail to parse.
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHAT_TOKEN` is missing or a numeric variable is malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            auth: AuthConfig {
                token: env::var("CHAT_TOKEN")
                    .ok()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(ConfigError::MissingVar("CHAT_TOKEN"))?,
            },
            rest: RestConfig {
                base_url: env::var("REST_BASE_URL").unwrap_or_else(|_| default_rest_base_url()),
                user_agent: env::var("REST_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
                request_timeout_ms: parse_var("REST_REQUEST_TIMEOUT_MS")?
                    .unwrap_or_else(default_request_timeout_ms),
                default_deadline_ms: parse_var("REST_DEFAULT_DEADLINE_MS")?.unwrap_or(0),
            },
            gateway: GatewayConfig {
                url: env::var("GATEWAY_URL").ok().filter(|u| !u.is_empty()),
                intents: parse_var("GATEWAY_INTENTS")?.unwrap_or_else(default_intents),
                hello_timeout_ms: parse_var("GATEWAY_HELLO_TIMEOUT_MS")?
                    .unwrap_or_else(default_hello_timeout_ms),
                max_backoff_ms: parse_var("GATEWAY_MAX_BACKOFF_MS")?
                    .unwrap_or_else(default_max_backoff_ms),
            },
            rate_limit: RateLimitConfig {
                global_max: parse_var("RATE_LIMIT_GLOBAL_MAX")?.unwrap_or_else(default_global_max),
                global_window_secs: parse_var("RATE_LIMIT_GLOBAL_WINDOW_SECS")?
                    .unwrap_or_else(default_global_window_secs),
            },
        })
    }

    /// Build a configuration with defaults for everything but the token
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: default_env(),
            },
            auth: AuthConfig {
                token: token.into(),
            },
            rest: RestConfig::default(),
            gateway: GatewayConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
