//! HTTP transport seam
//!
//! The dispatcher talks to the network only through [`HttpTransport`], so tests
//! can script responses and the client can run on `reqwest`.

use super::request::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use chat_common::{AuthConfig, RestConfig};
use std::collections::HashMap;

/// Errors raised below the HTTP status line
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport timed out")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Sends one request and returns the raw response
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl ReqwestTransport {
    /// Build a transport from the shared REST and auth configuration
    pub fn new(rest: &RestConfig, auth: &AuthConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(rest.user_agent.clone())
            .timeout(rest.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: rest.base_url.trim_end_matches('/').to_string(),
            authorization: auth.authorization(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(to_reqwest(request.method), self.url(&request.path))
            .header(reqwest::header::AUTHORIZATION, &self.authorization);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        tracing::trace!(%status, method = %request.method, path = %request.path, "HTTP response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
