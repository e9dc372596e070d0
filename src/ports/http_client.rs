use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connecting to the upstream or exchanging the request failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The request cannot be sent as built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for sending requests to upstreams
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a fully shaped request and return the upstream's response head
    /// with a streaming body.
    ///
    /// Implementations must not apply their own overall deadline; call
    /// deadlines are enforced by the caller, which may drop this future.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
