use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use services::entitlement::ports::EntitlementError;
use utoipa::ToSchema;

/// Structured error response returned to API consumers
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Convenient wrapper type for API errors that combines status code with error response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ApiErrorResponse,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            response: ApiErrorResponse {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Add optional details to the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.response.details = Some(details.into());
        self
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 401 Unauthorized
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 500 Internal Server Error
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_server_error",
            message,
        )
    }

    /// 502 Bad Gateway
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "bad_gateway", message)
    }

    // Auth-specific errors with more context

    /// Missing authorization header
    pub fn missing_auth_header() -> Self {
        Self::unauthorized("Missing authorization header")
            .with_details("Include an 'Authorization: Bearer <session_token>' header")
    }

    /// Malformed authorization header
    pub fn invalid_auth_header() -> Self {
        Self::unauthorized("Invalid authorization header")
            .with_details("Authorization header must use the Bearer scheme")
    }

    /// Invalid or malformed session token
    pub fn invalid_token() -> Self {
        Self::unauthorized("Invalid or malformed session token")
            .with_details("Session token must start with 'sess_' and be 37 characters long")
    }

    /// Session token not found
    pub fn session_not_found() -> Self {
        Self::unauthorized("Session not found")
            .with_details("The provided session token does not match any active session")
    }

    /// Session expired
    pub fn session_expired() -> Self {
        Self::unauthorized("Session expired").with_details("Sign in again to continue")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<EntitlementError> for ApiError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::ProfileNotFound => Self::not_found("No profile found for tenant"),
            EntitlementError::ProviderUnavailable(msg) => {
                tracing::error!("Billing provider unavailable: {}", msg);
                Self::bad_gateway("Billing provider unavailable")
            }
            EntitlementError::InvalidSignature(msg) => {
                tracing::warn!("Webhook signature rejected: {}", msg);
                Self::bad_request("Invalid webhook signature")
            }
            EntitlementError::InvalidPrice(msg) => {
                Self::bad_request(format!("Invalid price: {}", msg))
            }
            EntitlementError::InvalidRedirect(msg) => {
                Self::bad_request(format!("Invalid returnUrl: {}", msg))
            }
            EntitlementError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                Self::internal_server_error("Internal error")
            }
            EntitlementError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal_server_error("Internal error")
            }
        }
    }
}
