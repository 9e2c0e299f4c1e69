//! # chat-rest
//!
//! REST side of the client: an endpoint-agnostic HTTP transport and a
//! dispatcher that throttles requests through hierarchical rate-limit buckets.
//!
//! ```ignore
//! let dispatcher = Dispatcher::from_config(&config)?;
//! let response = dispatcher
//!     .send(Route::send_message(channel_id), HttpRequest::post(path, body))
//!     .await?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod ratelimit;

// Re-export commonly used types at crate root
pub use dispatcher::{Dispatcher, Route};
pub use error::{CatalogError, RestError, RestResult};
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport, TransportError};
pub use ratelimit::{
    Bucket, BucketCatalog, BucketKey, BucketKind, BucketRegistry, BucketSpec, RateLimitEvent,
    RateLimitInfo, Scope,
};
