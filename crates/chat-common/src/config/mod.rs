//! Configuration structs

mod client_config;

pub use client_config::{
    AppSettings, AuthConfig, ClientConfig, ConfigError, Environment, GatewayConfig,
    RateLimitConfig, RestConfig,
};
