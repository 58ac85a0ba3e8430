use crate::pool::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use services::entitlement::ports::{Plan, Profile, ProfileRepository};
use services::TenantId;

const PROFILE_COLUMNS: &str = "id, name, role, plan, plan_started_at, trial_end_date, \
     stripe_customer_id, created_at, updated_at";

pub struct PostgresProfileRepository {
    pool: DbPool,
}

impl PostgresProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_profile(row: &tokio_postgres::Row) -> anyhow::Result<Profile> {
        let role: String = row.get("role");
        let plan: String = row.get("plan");
        Ok(Profile {
            id: row.get("id"),
            name: row.get("name"),
            role: role.parse()?,
            plan: plan.parse()?,
            plan_started_at: row.get("plan_started_at"),
            trial_end_date: row.get("trial_end_date"),
            billing_customer_id: row.get("stripe_customer_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ProfileRepository for PostgresProfileRepository {
    async fn get_profile(&self, tenant_id: TenantId) -> anyhow::Result<Option<Profile>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM profiles WHERE id = $1", PROFILE_COLUMNS),
                &[&tenant_id],
            )
            .await?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn find_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> anyhow::Result<Option<Profile>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM profiles WHERE stripe_customer_id = $1",
                    PROFILE_COLUMNS
                ),
                &[&customer_id],
            )
            .await?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn update_entitlement(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        plan_started_at: Option<DateTime<Utc>>,
        billing_customer_id: Option<&str>,
    ) -> anyhow::Result<()> {
        tracing::info!(
            "Repository: Updating entitlement - tenant_id={}, plan={}",
            tenant_id,
            plan
        );

        let client = self.pool.get().await?;
        // Single statement so plan, plan_started_at and the customer id can
        // never be observed half-written
        let updated = client
            .execute(
                "UPDATE profiles
                 SET plan = $2,
                     plan_started_at = $3,
                     stripe_customer_id = COALESCE($4, stripe_customer_id),
                     updated_at = NOW()
                 WHERE id = $1",
                &[
                    &tenant_id,
                    &plan.as_str(),
                    &plan_started_at,
                    &billing_customer_id,
                ],
            )
            .await?;

        if updated == 0 {
            anyhow::bail!("No profile row for tenant_id={}", tenant_id);
        }
        Ok(())
    }

    async fn set_billing_customer(
        &self,
        tenant_id: TenantId,
        customer_id: &str,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE profiles SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1",
                &[&tenant_id, &customer_id],
            )
            .await?;
        Ok(())
    }
}
