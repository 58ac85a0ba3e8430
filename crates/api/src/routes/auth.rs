use crate::{error::ApiError, middleware::AuthenticatedTenant, state::AppState};
use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Terminate the current session
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Session terminated", body = LogoutResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn logout(
    State(app_state): State<AppState>,
    Extension(tenant): Extension<AuthenticatedTenant>,
) -> Result<Json<LogoutResponse>, ApiError> {
    app_state
        .session_repository
        .delete_session(tenant.session_id)
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to delete session: session_id={}, error={}",
                tenant.session_id,
                e
            );
            ApiError::internal_server_error("Failed to log out")
        })?;

    tracing::info!(
        "Session terminated: tenant_id={}, session_id={}",
        tenant.tenant_id,
        tenant.session_id
    );

    Ok(Json(LogoutResponse {
        message: "Logged out".to_string(),
    }))
}
