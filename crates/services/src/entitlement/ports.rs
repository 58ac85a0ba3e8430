use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::billing::ports::{BillingError, ProviderCheckoutSession};
use crate::TenantId;

/// Entitlement tier granted to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            other => Err(UnknownValue {
                kind: "plan",
                value: other.to_string(),
            }),
        }
    }
}

/// Role of an authenticated principal within a tenant account.
/// Attendants cannot reach admin-only routes (reports, billing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "atendente")]
    Attendant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Attendant => "atendente",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "atendente" => Ok(Self::Attendant),
            other => Err(UnknownValue {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Subscription lifecycle status as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    /// Statuses that grant `pro` entitlement. `past_due` and `unpaid` stay
    /// pro so a transient payment failure does not lock the tenant out
    /// while the provider retries the charge.
    pub fn is_pro_eligible(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::Trialing | Self::PastDue | Self::Unpaid
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "canceled" => Ok(Self::Canceled),
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "paused" => Ok(Self::Paused),
            other => Err(UnknownValue {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

/// Error for strings that do not match a closed enum.
#[derive(Debug)]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownValue {}

/// Per-tenant profile row. `plan` is the authoritative entitlement tier;
/// `plan_started_at` is non-null exactly when `plan` is pro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: TenantId,
    pub name: Option<String>,
    pub role: Role,
    pub plan: Plan,
    pub plan_started_at: Option<DateTime<Utc>>,
    /// Set once at signup, never renewed.
    pub trial_end_date: Option<DateTime<Utc>>,
    pub billing_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Trial flag is orthogonal to `plan`.
    pub fn trial_active(&self, now: DateTime<Utc>) -> bool {
        self.trial_end_date.map(|end| now < end).unwrap_or(false)
    }
}

/// Mirror of the billing provider's subscription object, one row per
/// external subscription id. Superseded in place by newer snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub tenant_id: TenantId,
    pub price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Unit amount in currency units (provider reports cents).
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i32>,
    pub billing_customer_id: Option<String>,
    /// Opaque provider payload, retained for audit/debugging.
    pub raw: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Ceilings for free-tier tenants, sourced from a server-side database
/// function. The presentation layer uses these to warn/block near capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreePlanLimits {
    pub pets: i32,
    pub products: i32,
    pub services: i32,
    pub appointments_per_month: i32,
}

/// Subscription details included in the pull status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    pub id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i32>,
}

impl From<&SubscriptionSnapshot> for SubscriptionSummary {
    fn from(snapshot: &SubscriptionSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            status: snapshot.status,
            price_id: snapshot.price_id.clone(),
            cancel_at_period_end: snapshot.cancel_at_period_end,
            current_period_start: snapshot.current_period_start,
            current_period_end: snapshot.current_period_end,
            amount: snapshot.amount,
            currency: snapshot.currency.clone(),
            interval: snapshot.interval.clone(),
            interval_count: snapshot.interval_count,
        }
    }
}

/// Reconciled entitlement state returned by the pull status check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub plan: Plan,
    pub is_subscribed: bool,
    pub trial_active: bool,
    pub subscription: Option<SubscriptionSummary>,
    /// Populated for free-tier tenants only.
    pub free_limits: Option<FreePlanLimits>,
}

/// Price catalog entry for the paywall page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInfo {
    pub id: String,
    /// Unit amount in currency units.
    pub amount: f64,
    pub currency: String,
}

/// Configured prices by billing interval. Entries are `None` when the
/// interval is not offered or the provider lookup failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionPrices {
    pub monthly: Option<PriceInfo>,
    pub quarterly: Option<PriceInfo>,
    pub semiannual: Option<PriceInfo>,
}

/// Error types for entitlement operations
#[derive(Debug)]
pub enum EntitlementError {
    /// No profile row exists for the tenant (profile creation is owned by
    /// the signup flow, not by reconciliation)
    ProfileNotFound,
    /// Billing provider call failed (network/outage); stored state is left
    /// untouched
    ProviderUnavailable(String),
    /// Webhook signature verification failed
    InvalidSignature(String),
    /// Price identifier not recognized by the billing provider
    InvalidPrice(String),
    /// Checkout return URL is not an absolute http(s) URL
    InvalidRedirect(String),
    /// Database error
    DatabaseError(String),
    /// Internal error
    InternalError(String),
}

impl fmt::Display for EntitlementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProfileNotFound => write!(f, "No profile found for tenant"),
            Self::ProviderUnavailable(msg) => write!(f, "Billing provider unavailable: {}", msg),
            Self::InvalidSignature(msg) => {
                write!(f, "Webhook signature verification failed: {}", msg)
            }
            Self::InvalidPrice(msg) => write!(f, "Invalid price: {}", msg),
            Self::InvalidRedirect(msg) => write!(f, "Invalid return URL: {}", msg),
            Self::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for EntitlementError {}

impl From<anyhow::Error> for EntitlementError {
    fn from(err: anyhow::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<BillingError> for EntitlementError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::ProviderUnavailable(msg) => Self::ProviderUnavailable(msg),
            BillingError::InvalidSignature(msg) => Self::InvalidSignature(msg),
            BillingError::InvalidPrice(msg) => Self::InvalidPrice(msg),
            BillingError::InvalidRequest(msg) => Self::InternalError(msg),
        }
    }
}

/// Repository trait for tenant profiles
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Fetch a profile by tenant id
    async fn get_profile(&self, tenant_id: TenantId) -> anyhow::Result<Option<Profile>>;

    /// Find the profile owning a billing customer id
    async fn find_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> anyhow::Result<Option<Profile>>;

    /// Write the full derived entitlement field set in one statement:
    /// `plan`, `plan_started_at` and (when newly discovered) the billing
    /// customer id. No other code path writes these fields.
    async fn update_entitlement(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        plan_started_at: Option<DateTime<Utc>>,
        billing_customer_id: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Persist a newly resolved billing customer id
    async fn set_billing_customer(
        &self,
        tenant_id: TenantId,
        customer_id: &str,
    ) -> anyhow::Result<()>;
}

/// Repository trait for subscription snapshots
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or update a snapshot keyed by the external subscription id
    async fn upsert_snapshot(
        &self,
        snapshot: SubscriptionSnapshot,
    ) -> anyhow::Result<SubscriptionSnapshot>;

    /// Most recently updated snapshot for a tenant
    async fn latest_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> anyhow::Result<Option<SubscriptionSnapshot>>;
}

/// Repository trait for free-tier plan limits (server-side SQL function,
/// treated as an external collaborator)
#[async_trait]
pub trait PlanLimitsRepository: Send + Sync {
    async fn free_plan_limits(&self) -> anyhow::Result<FreePlanLimits>;
}

/// Service trait for entitlement reconciliation
#[async_trait]
pub trait EntitlementService: Send + Sync {
    /// Pull path: recompute the tenant's entitlement from the provider's
    /// latest subscription state and return the reconciled summary. The
    /// email is used to recover a customer mapping the profile lost. Falls
    /// back to the stored plan when the provider is unreachable.
    async fn check_status(
        &self,
        tenant_id: TenantId,
        email: Option<&str>,
    ) -> Result<StatusSummary, EntitlementError>;

    /// Push path: verify the webhook signature, then feed subscription
    /// lifecycle events into reconciliation. Unrecognized event types are
    /// acknowledged and ignored.
    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), EntitlementError>;

    /// Resolve the tenant's billing customer (creating one if needed) and
    /// open a checkout session for the given price. Does not mutate `plan`;
    /// that happens later via webhook or a subsequent status check.
    async fn create_checkout(
        &self,
        tenant_id: TenantId,
        email: Option<String>,
        price_id: String,
        return_url: String,
    ) -> Result<ProviderCheckoutSession, EntitlementError>;

    /// Configured subscription prices for the paywall page.
    async fn subscription_prices(&self) -> Result<SubscriptionPrices, EntitlementError>;
}
