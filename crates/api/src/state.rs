use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub entitlement_service: Arc<dyn services::entitlement::ports::EntitlementService>,
    pub session_repository: Arc<dyn services::auth::ports::SessionRepository>,
}
