//! Gateway error taxonomy and its JSON rendering.
use std::time::Duration;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-request failures. None of these is fatal to the process.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum GatewayError {
    /// No upstream is registered under the requested name.
    #[error("no upstream registered for service '{service}'")]
    ConfigurationMissing { service: String },

    /// The forward failed at the connection level.
    #[error("Failed to reach backend service: {cause}")]
    UpstreamUnreachable { cause: String },

    /// The per-service deadline elapsed before the forward completed.
    #[error("service '{service}' did not respond within {timeout:?}")]
    UpstreamTimeout { service: String, timeout: Duration },

    /// Registration-time rejection of a base address.
    #[error("invalid base address '{address}' for service '{service}': {reason}")]
    MalformedUpstreamAddress {
        service: String,
        address: String,
        reason: String,
    },
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ConfigurationMissing { .. }
            | GatewayError::MalformedUpstreamAddress { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Text shown to clients. Internal details such as service names stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::ConfigurationMissing { .. }
            | GatewayError::MalformedUpstreamAddress { .. } => {
                "Service configuration not found".to_string()
            }
            GatewayError::UpstreamUnreachable { .. } => self.to_string(),
            GatewayError::UpstreamTimeout { .. } => {
                "Backend service did not respond in time".to_string()
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.status_code(), self.client_message())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

/// Wire shape of every gateway-generated error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    /// `error` is the canonical reason phrase of `status`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// 404 for paths no route matched.
pub fn not_found(path: &str) -> Response {
    let body = ErrorBody::new(
        StatusCode::NOT_FOUND,
        "The requested endpoint does not exist",
    )
    .with_path(path);
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// 405 for a known path requested with an unsupported method.
pub fn method_not_allowed(method: &Method, path: &str) -> Response {
    let body = ErrorBody::new(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Method {method} is not allowed for this endpoint"),
    )
    .with_path(path);
    (StatusCode::METHOD_NOT_ALLOWED, Json(body)).into_response()
}
