use crate::pool::DbPool;
use anyhow::Result;

/// Schema is idempotent; every statement guards its own existence so the
/// whole block can run on every startup.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id UUID PRIMARY KEY,
    name TEXT,
    email TEXT NOT NULL UNIQUE,
    email_verified BOOLEAN NOT NULL DEFAULT FALSE,
    role TEXT NOT NULL DEFAULT 'admin',
    plan TEXT NOT NULL DEFAULT 'free',
    plan_started_at TIMESTAMPTZ,
    trial_end_date TIMESTAMPTZ,
    stripe_customer_id TEXT UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT plan_start_matches_plan CHECK (
        (plan = 'pro') = (plan_started_at IS NOT NULL)
    )
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    price_id TEXT,
    status TEXT NOT NULL,
    current_period_start TIMESTAMPTZ NOT NULL,
    current_period_end TIMESTAMPTZ NOT NULL,
    cancel_at_period_end BOOLEAN NOT NULL DEFAULT FALSE,
    amount DOUBLE PRECISION,
    currency TEXT,
    "interval" TEXT,
    interval_count INTEGER,
    stripe_customer_id TEXT,
    raw JSONB NOT NULL DEFAULT '{}'::jsonb,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_user_updated
    ON subscriptions (user_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    tenant_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions (expires_at);

CREATE OR REPLACE FUNCTION get_free_plan_limits() RETURNS jsonb AS $fn$
    SELECT jsonb_build_object(
        'pets', 10,
        'products', 20,
        'services', 5,
        'appointmentsPerMonth', 15
    );
$fn$ LANGUAGE sql STABLE;
"#;

/// Run database migrations
pub async fn run(pool: &DbPool) -> Result<()> {
    tracing::info!("Applying database schema");
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    tracing::info!("Database schema up to date");
    Ok(())
}
