use crate::pool::DbPool;
use async_trait::async_trait;
use services::entitlement::ports::{SnapshotRepository, SubscriptionSnapshot};
use services::TenantId;

const SNAPSHOT_COLUMNS: &str = "id, user_id, price_id, status, current_period_start, \
     current_period_end, cancel_at_period_end, amount, currency, \"interval\", \
     interval_count, stripe_customer_id, raw, updated_at";

pub struct PostgresSnapshotRepository {
    pool: DbPool,
}

impl PostgresSnapshotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_snapshot(row: &tokio_postgres::Row) -> anyhow::Result<SubscriptionSnapshot> {
        let status: String = row.get("status");
        Ok(SubscriptionSnapshot {
            id: row.get("id"),
            tenant_id: row.get("user_id"),
            price_id: row.get("price_id"),
            status: status.parse()?,
            current_period_start: row.get("current_period_start"),
            current_period_end: row.get("current_period_end"),
            cancel_at_period_end: row.get("cancel_at_period_end"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            interval: row.get("interval"),
            interval_count: row.get("interval_count"),
            billing_customer_id: row.get("stripe_customer_id"),
            raw: row.get("raw"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SnapshotRepository for PostgresSnapshotRepository {
    async fn upsert_snapshot(
        &self,
        snapshot: SubscriptionSnapshot,
    ) -> anyhow::Result<SubscriptionSnapshot> {
        tracing::info!(
            "Repository: Upserting subscription snapshot - id={}, tenant_id={}, status={}",
            snapshot.id,
            snapshot.tenant_id,
            snapshot.status
        );

        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO subscriptions (
                        id, user_id, price_id, status, current_period_start,
                        current_period_end, cancel_at_period_end, amount, currency,
                        \"interval\", interval_count, stripe_customer_id, raw, updated_at
                     )
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
                     ON CONFLICT (id)
                     DO UPDATE SET
                         user_id = EXCLUDED.user_id,
                         price_id = EXCLUDED.price_id,
                         status = EXCLUDED.status,
                         current_period_start = EXCLUDED.current_period_start,
                         current_period_end = EXCLUDED.current_period_end,
                         cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                         amount = EXCLUDED.amount,
                         currency = EXCLUDED.currency,
                         \"interval\" = EXCLUDED.\"interval\",
                         interval_count = EXCLUDED.interval_count,
                         stripe_customer_id = EXCLUDED.stripe_customer_id,
                         raw = EXCLUDED.raw,
                         updated_at = NOW()
                     RETURNING {}",
                    SNAPSHOT_COLUMNS
                ),
                &[
                    &snapshot.id,
                    &snapshot.tenant_id,
                    &snapshot.price_id,
                    &snapshot.status.as_str(),
                    &snapshot.current_period_start,
                    &snapshot.current_period_end,
                    &snapshot.cancel_at_period_end,
                    &snapshot.amount,
                    &snapshot.currency,
                    &snapshot.interval,
                    &snapshot.interval_count,
                    &snapshot.billing_customer_id,
                    &snapshot.raw,
                ],
            )
            .await?;

        Self::row_to_snapshot(&row)
    }

    async fn latest_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> anyhow::Result<Option<SubscriptionSnapshot>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM subscriptions
                     WHERE user_id = $1
                     ORDER BY updated_at DESC
                     LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                &[&tenant_id],
            )
            .await?;

        row.as_ref().map(Self::row_to_snapshot).transpose()
    }
}
