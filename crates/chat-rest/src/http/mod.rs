//! HTTP request/response types and the transport seam

mod request;
mod transport;

pub use request::{HttpRequest, HttpResponse, Method};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
