use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::entitlement::ports::SubscriptionStatus;
use crate::TenantId;

/// Error types for billing provider operations
#[derive(Debug)]
pub enum BillingError {
    /// Provider call failed (network, outage, rate limit). Callers must
    /// treat this as "no information", never as "no subscription".
    ProviderUnavailable(String),
    /// Webhook signature verification failed
    InvalidSignature(String),
    /// Price identifier rejected by the provider
    InvalidPrice(String),
    /// Malformed identifier or payload on our side of the call
    InvalidRequest(String),
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable(msg) => write!(f, "Billing provider unavailable: {}", msg),
            Self::InvalidSignature(msg) => {
                write!(f, "Webhook signature verification failed: {}", msg)
            }
            Self::InvalidPrice(msg) => write!(f, "Invalid price: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid billing request: {}", msg),
        }
    }
}

impl std::error::Error for BillingError {}

/// Provider-side subscription state, normalized into domain terms.
/// `tenant_ref` is the tenant id carried in the subscription metadata,
/// when the provider object has one.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub tenant_ref: Option<TenantId>,
    pub price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Unit amount in currency units.
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i32>,
    /// Raw provider payload, passed through for snapshot audit storage.
    pub raw: serde_json::Value,
}

/// Verified webhook event, reduced to the cases reconciliation acts on.
/// Everything else arrives as `Ignored` and is acknowledged without effect.
#[derive(Debug, Clone)]
pub enum BillingEvent {
    /// A subscription was created, updated or deleted
    SubscriptionChanged {
        subscription: ProviderSubscription,
    },
    /// A checkout session finished; the subscription event usually follows,
    /// but the customer linkage can be persisted right away
    CheckoutCompleted {
        tenant_ref: Option<TenantId>,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    },
    /// Signature was valid but the event type is not one we handle
    Ignored { event_type: String },
}

/// Hosted checkout session handle returned to the caller for redirect.
#[derive(Debug, Clone)]
pub struct ProviderCheckoutSession {
    pub id: String,
    pub url: String,
}

/// Price catalog entry as reported by the provider.
#[derive(Debug, Clone)]
pub struct ProviderPrice {
    pub id: String,
    /// Unit amount in currency units.
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

/// Port over the external billing provider. All payment-provider traffic
/// in the codebase goes through this trait.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Look up an existing customer by email. `Ok(None)` means the provider
    /// answered and no customer exists.
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>, BillingError>;

    /// Create a customer tagged with the tenant id and return its id
    async fn create_customer(
        &self,
        tenant_id: TenantId,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, BillingError>;

    /// Most recent subscription for a customer. `Ok(None)` means the
    /// provider answered and the customer has no live subscription.
    async fn latest_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderSubscription>, BillingError>;

    /// Fetch a subscription by its provider id
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, BillingError>;

    /// Open a hosted checkout session for a subscription purchase
    async fn create_checkout_session(
        &self,
        tenant_id: TenantId,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<ProviderCheckoutSession, BillingError>;

    /// Verify the webhook signature and classify the event. Rejects the
    /// payload before any parsing when the signature does not check out.
    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<BillingEvent, BillingError>;

    /// Fetch a price for the paywall catalog
    async fn retrieve_price(&self, price_id: &str) -> Result<ProviderPrice, BillingError>;
}
