//! Client facade

use crate::entity::{Entity, EntityKey};
use crate::error::{ClientError, ClientResult};
use crate::updater::CacheUpdater;
use chat_cache::{EntityCache, EntityHandle};
use chat_common::ClientConfig;
use chat_core::Snowflake;
use chat_gateway::protocol::GatewayInfo;
use chat_gateway::{GatewayConnector, GatewaySession, SessionConfig, TungsteniteConnector};
use chat_rest::{BucketCatalog, Dispatcher, HttpRequest, HttpTransport, ReqwestTransport, Route};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// REST dispatcher, gateway session and entity cache behind one handle
pub struct ChatClient {
    config: ClientConfig,
    rest: Dispatcher,
    gateway: GatewaySession,
    cache: EntityCache<EntityKey, Entity>,
    updater: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Client over `reqwest` and `tokio-tungstenite`
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let http = ReqwestTransport::new(&config.rest, &config.auth)?;
        Ok(Self::with_transports(
            config,
            Arc::new(http),
            Arc::new(TungsteniteConnector::new()),
        ))
    }

    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn with_transports(
        config: ClientConfig,
        http: Arc<dyn HttpTransport>,
        connector: Arc<dyn GatewayConnector>,
    ) -> Self {
        let rest = Dispatcher::new(http, BucketCatalog::from(&config.rate_limit))
            .with_default_deadline(config.rest.default_deadline());
        let gateway = GatewaySession::new(connector, SessionConfig::from_config(&config));

        Self {
            config,
            rest,
            gateway,
            cache: EntityCache::new(),
            updater: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rest(&self) -> &Dispatcher {
        &self.rest
    }

    pub fn gateway(&self) -> &GatewaySession {
        &self.gateway
    }

    pub fn cache(&self) -> &EntityCache<EntityKey, Entity> {
        &self.cache
    }

    /// Configured gateway URL, or the one advertised by `GET /gateway`
    pub async fn gateway_url(&self) -> ClientResult<String> {
        if let Some(url) = &self.config.gateway.url {
            return Ok(url.clone());
        }
        let info: GatewayInfo = self
            .rest
            .send_json(Route::global(), HttpRequest::get("/gateway"))
            .await?;
        tracing::debug!(url = %info.url, "Discovered gateway URL");
        Ok(info.url)
    }

    /// Start the gateway session and the cache updater
    pub async fn connect(&self) -> ClientResult<()> {
        let url = self.gateway_url().await?;

        {
            let mut updater = self.updater.lock();
            if updater.as_ref().map_or(true, JoinHandle::is_finished) {
                let handler = Arc::new(CacheUpdater::new(self.cache.clone()));
                *updater = Some(self.gateway.subscribe_handler(handler));
            }
        }

        self.gateway.connect(url)?;
        tracing::info!(app = %self.config.app.name, "Client connecting");
        Ok(())
    }

    /// Stop the gateway session; REST stays usable
    pub async fn disconnect(&self) {
        self.gateway.disconnect().await;
    }

    /// Stop everything; queued REST requests complete with `Closed`
    pub async fn shutdown(&self) {
        self.gateway.disconnect().await;
        self.rest.shutdown();
        if let Some(updater) = self.updater.lock().take() {
            updater.abort();
        }
        tracing::info!("Client shut down");
    }

    /// Cached entity for `key`, fetched from `path` on a miss. Concurrent
    /// callers for one key share a single request.
    pub async fn fetch(&self, key: EntityKey, path: String) -> ClientResult<EntityHandle<EntityKey, Entity>> {
        let rest = self.rest.clone();
        let handle = self
            .cache
            .get_or_create(key, || async move {
                let data: Value = rest.send_json(Route::global(), HttpRequest::get(path)).await?;
                Ok::<_, ClientError>(Entity::new(key, data))
            })
            .await?;
        Ok(handle)
    }

    pub async fn channel(&self, id: Snowflake) -> ClientResult<EntityHandle<EntityKey, Entity>> {
        self.fetch(EntityKey::channel(id), format!("/channels/{id}")).await
    }

    pub async fn guild(&self, id: Snowflake) -> ClientResult<EntityHandle<EntityKey, Entity>> {
        self.fetch(EntityKey::guild(id), format!("/guilds/{id}")).await
    }

    pub async fn user(&self, id: Snowflake) -> ClientResult<EntityHandle<EntityKey, Entity>> {
        self.fetch(EntityKey::user(id), format!("/users/{id}")).await
    }

    pub async fn member(&self, guild: Snowflake, user: Snowflake) -> ClientResult<EntityHandle<EntityKey, Entity>> {
        self.fetch(
            EntityKey::member(guild, user),
            format!("/guilds/{guild}/members/{user}"),
        )
        .await
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("rest", &self.rest)
            .field("gateway", &self.gateway)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
