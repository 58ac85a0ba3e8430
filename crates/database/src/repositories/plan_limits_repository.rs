use crate::pool::DbPool;
use async_trait::async_trait;
use services::entitlement::ports::{FreePlanLimits, PlanLimitsRepository};

/// Reads the free-tier ceilings from the server-side SQL function, keeping
/// the database as the single source of truth for limit values.
pub struct PostgresPlanLimitsRepository {
    pool: DbPool,
}

impl PostgresPlanLimitsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanLimitsRepository for PostgresPlanLimitsRepository {
    async fn free_plan_limits(&self) -> anyhow::Result<FreePlanLimits> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT get_free_plan_limits()", &[])
            .await?;
        let value: serde_json::Value = row.get(0);
        Ok(serde_json::from_value(value)?)
    }
}
