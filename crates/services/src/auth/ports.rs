use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entitlement::ports::Role;
use crate::types::{SessionId, TenantId};

/// Authenticated session for a tenant principal.
#[derive(Debug, Clone)]
pub struct TenantSession {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub email: String,
    /// Whether the principal has confirmed their email address. Unverified
    /// principals are signed out by the access gate.
    pub email_verified: bool,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The actual session token (only populated on creation, not on retrieval)
    pub token: Option<String>,
}

impl TenantSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Repository trait for authentication session management
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a session for a tenant (returns the session with the unhashed token)
    async fn create_session(&self, tenant_id: TenantId) -> anyhow::Result<TenantSession>;

    /// Retrieve a session by token hash
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<TenantSession>>;

    /// Delete a session
    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()>;
}
