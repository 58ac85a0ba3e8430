use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use services::entitlement::ports::Role;
use services::{SessionId, TenantId};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::ApiError;

/// Authenticated tenant information inserted into request extensions by the
/// auth middleware. Extract in route handlers using `Extension<AuthenticatedTenant>`
#[derive(Debug, Clone)]
pub struct AuthenticatedTenant {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub email: String,
    pub email_verified: bool,
    pub role: Role,
}

/// State for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub session_repository: Arc<dyn services::auth::ports::SessionRepository>,
}

/// Hash a session token for lookup
fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract and validate token from Authorization header
fn extract_token_from_request(request: &Request) -> Result<String, ApiError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_value = auth_header.ok_or_else(|| {
        tracing::warn!("No authorization header found");
        ApiError::missing_auth_header()
    })?;

    let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Authorization header does not use the Bearer scheme");
        ApiError::invalid_auth_header()
    })?;

    // Tokens are "sess_" plus a 32-char hex uuid
    if !token.starts_with("sess_") || token.len() != 37 {
        tracing::warn!("Invalid session token format");
        return Err(ApiError::invalid_token());
    }

    Ok(token.to_string())
}

/// Authenticate a session by token hash
async fn authenticate_session_by_token(
    state: &AuthState,
    token_hash: String,
) -> Result<AuthenticatedTenant, ApiError> {
    let session = state
        .session_repository
        .get_session_by_token_hash(token_hash.clone())
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to get session from repository for token_hash {}...: {}",
                &token_hash.chars().take(16).collect::<String>(),
                e
            );
            ApiError::internal_server_error("Failed to authenticate session")
        })?
        .ok_or_else(|| {
            tracing::warn!(
                "Session not found for token_hash: {}...",
                &token_hash.chars().take(16).collect::<String>()
            );
            ApiError::session_not_found()
        })?;

    if session.is_expired(Utc::now()) {
        tracing::warn!("Session expired: session_id={}", session.session_id);
        return Err(ApiError::session_expired());
    }

    tracing::debug!(
        "Authenticated session: tenant_id={}, session_id={}",
        session.tenant_id,
        session.session_id
    );

    Ok(AuthenticatedTenant {
        tenant_id: session.tenant_id,
        session_id: session.session_id,
        email: session.email,
        email_verified: session.email_verified,
        role: session.role,
    })
}

/// Authentication middleware for protected routes
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_token_from_request(&request) {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    let tenant = match authenticate_session_by_token(&auth_state, hash_session_token(&token)).await
    {
        Ok(tenant) => tenant,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(tenant);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_format_is_enforced() {
        let request = Request::builder()
            .header("authorization", "Bearer not-a-session-token")
            .body(axum::body::Body::empty())
            .expect("request");
        assert!(extract_token_from_request(&request).is_err());

        let token = format!("sess_{}", "a".repeat(32));
        let request = Request::builder()
            .header("authorization", format!("Bearer {}", token))
            .body(axum::body::Body::empty())
            .expect("request");
        assert_eq!(extract_token_from_request(&request).expect("token"), token);
    }

    #[test]
    fn bearer_scheme_is_required() {
        let request = Request::builder()
            .header("authorization", "Basic abc")
            .body(axum::body::Body::empty())
            .expect("request");
        assert!(extract_token_from_request(&request).is_err());

        let request = Request::builder()
            .body(axum::body::Body::empty())
            .expect("request");
        assert!(extract_token_from_request(&request).is_err());
    }
}
