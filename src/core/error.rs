//! Gateway error taxonomy.
//!
//! Each error is handled at the boundary nearest its origin (auth gate, dispatcher,
//! local handler) and rendered as the same JSON shape:
//!
//! ```json
//! { "error": "Bad Gateway", "message": "Service temporarily unavailable", "statusCode": 502 }
//! ```
//!
//! The underlying cause is logged when the response is built and never echoed back.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::identity_provider::IdentityError;

/// Authentication / authorization failures raised by the auth gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Access token required")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    /// Reported to the caller exactly like [`AuthError::InvalidToken`]
    #[error("Identity provider unavailable")]
    ProviderUnavailable,
    #[error("Insufficient permissions for this resource")]
    Forbidden,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Short label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ProviderUnavailable => "provider_unavailable",
            AuthError::Forbidden => "forbidden",
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Access token required",
            AuthError::InvalidToken | AuthError::ProviderUnavailable => "Invalid token",
            AuthError::Forbidden => "Insufficient permissions for this resource",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No service registered for path '{path}'")]
    NoMatchingService { path: String },
}

/// Transport failures talking to a backend service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Connection to '{service}' refused: {detail}")]
    ConnectionRefused { service: String, detail: String },
    #[error("'{service}' unreachable: {detail}")]
    Unreachable { service: String, detail: String },
    #[error("'{service}' did not answer within {secs}s")]
    Timeout { service: String, secs: u64 },
    #[error("Request to '{service}' failed: {detail}")]
    Other { service: String, detail: String },
}

impl UpstreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::ConnectionRefused { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Every error that can leave the gateway as an HTTP response.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Failure inside a local handler
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<eyre::Report> for GatewayError {
    fn from(report: eyre::Report) -> Self {
        GatewayError::Internal(format!("{report:#}"))
    }
}

/// Wire shape of every gateway-generated error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message: message.into(),
            status_code: status.as_u16(),
        }
    }

    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Auth(e) => e.status_code(),
            GatewayError::Routing(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(e) => e.status_code(),
            GatewayError::Identity(e) => e.status_code(),
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing message; never includes upstream addresses or internal causes.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Auth(e) => e.public_message().to_string(),
            GatewayError::Routing(_) => "No service is registered for this path".to_string(),
            GatewayError::Upstream(UpstreamError::ConnectionRefused { .. }) => {
                "The requested service is temporarily unavailable".to_string()
            }
            GatewayError::Upstream(_) => "Service temporarily unavailable".to_string(),
            GatewayError::Identity(e) => e.public_message(),
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::MethodNotAllowed => "Method not allowed for this route".to_string(),
            GatewayError::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.status_code(), self.public_message())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        } else {
            tracing::debug!(status = status.as_u16(), "{}", self);
        }
        self.body().into_response_with(status)
    }
}
