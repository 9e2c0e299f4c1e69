//! Session configuration

use crate::protocol::{IdentifyPayload, IdentifyProperties};
use chat_common::{ClientConfig, GatewayConfig};
use std::time::Duration;

#[derive(Clone)]
pub struct SessionConfig {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
    /// How long to wait for Hello after the socket opens
    pub hello_timeout: Duration,
    /// Cap of the reconnect backoff
    pub max_backoff: Duration,
}

impl SessionConfig {
    pub fn new(token: impl Into<String>, intents: u64) -> Self {
        let defaults = GatewayConfig::default();
        Self {
            token: token.into(),
            intents,
            properties: IdentifyProperties::current(),
            hello_timeout: Duration::from_millis(defaults.hello_timeout_ms),
            max_backoff: Duration::from_millis(defaults.max_backoff_ms),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            hello_timeout: Duration::from_millis(config.gateway.hello_timeout_ms),
            max_backoff: Duration::from_millis(config.gateway.max_backoff_ms),
            ..Self::new(config.auth.token.clone(), config.gateway.intents)
        }
    }

    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    pub(crate) fn identify(&self) -> IdentifyPayload {
        IdentifyPayload::new(self.token.clone(), self.intents).with_properties(self.properties.clone())
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("token", &"[redacted]")
            .field("intents", &self.intents)
            .field("hello_timeout", &self.hello_timeout)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}
