//! Hierarchical rate limiting
//!
//! Requests queue on a leaf bucket; a dispatch needs a free slot in the leaf
//! and in every ancestor. Server rate limits pause the affected bucket.

mod bucket;
mod catalog;
mod events;
mod headers;
mod registry;
mod window;
mod worker;

pub use bucket::{Bucket, PendingRequest};
pub use catalog::{BucketCatalog, BucketKey, BucketKind, BucketSpec, Scope};
pub use events::RateLimitEvent;
pub use headers::RateLimitInfo;
pub use registry::BucketRegistry;
