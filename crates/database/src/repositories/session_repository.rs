use crate::pool::DbPool;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use services::{
    auth::ports::{SessionRepository, TenantSession},
    SessionId, TenantId,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub struct PostgresSessionRepository {
    pool: DbPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Generate a new session token
    fn generate_session_token() -> String {
        format!("sess_{}", Uuid::new_v4().to_string().replace("-", ""))
    }

    /// Hash a session token for storage
    fn hash_session_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn row_to_session(row: &tokio_postgres::Row) -> anyhow::Result<TenantSession> {
        let role: String = row.get("role");
        Ok(TenantSession {
            session_id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            email: row.get("email"),
            email_verified: row.get("email_verified"),
            role: role.parse()?,
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            token: None,
        })
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn create_session(&self, tenant_id: TenantId) -> anyhow::Result<TenantSession> {
        tracing::info!("Creating session for tenant_id={}", tenant_id);

        let client = self.pool.get().await?;

        let created_at = Utc::now();
        // Sessions expire after 30 days
        let expires_at = created_at + Duration::days(30);

        let token = Self::generate_session_token();
        let token_hash = Self::hash_session_token(&token);

        let row = client
            .query_one(
                "WITH s AS (
                     INSERT INTO sessions (tenant_id, created_at, expires_at, token_hash)
                     VALUES ($1, $2, $3, $4)
                     RETURNING id, tenant_id, created_at, expires_at
                 )
                 SELECT s.id, s.tenant_id, s.created_at, s.expires_at,
                        p.email, p.email_verified, p.role
                 FROM s JOIN profiles p ON p.id = s.tenant_id",
                &[&tenant_id, &created_at, &expires_at, &token_hash],
            )
            .await?;

        let mut session = Self::row_to_session(&row)?;
        // Return the unhashed token only on creation
        session.token = Some(token);

        tracing::info!(
            "Session created: session_id={}, tenant_id={}, expires_at={}",
            session.session_id,
            session.tenant_id,
            session.expires_at
        );

        Ok(session)
    }

    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<TenantSession>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT s.id, s.tenant_id, s.created_at, s.expires_at,
                        p.email, p.email_verified, p.role
                 FROM sessions s
                 JOIN profiles p ON p.id = s.tenant_id
                 WHERE s.token_hash = $1",
                &[&token_hash],
            )
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()> {
        tracing::info!("Deleting session: session_id={}", session_id);
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM sessions WHERE id = $1", &[&session_id])
            .await?;
        Ok(())
    }
}
