use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Transport-level failures talking to a backend.
///
/// A response with an error status is not an error here; the dispatcher relays it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The backend actively refused the TCP connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// DNS, TLS or connect failures other than a refusal
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// No response head within the configured timeout
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection dropped or protocol error after connecting
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `req` exactly once. The returned body streams from the backend.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// `GET url` bounded by `timeout`; `Ok(true)` only for a 2xx answer.
    ///
    /// Refusals and non-2xx answers are `Ok(false)`; an elapsed timeout is
    /// [`HttpClientError::Timeout`].
    async fn health_check(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;
}
